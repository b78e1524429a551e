//! Source fetching with bounded concurrency and per-source retry.
//!
//! This crate provides:
//! - [`Fetcher`]: fetches every registered source, one task per source
//! - [`RetryPolicy`]: which failures are retried and how long to wait

pub mod engine;
pub mod retry;

pub use engine::Fetcher;
pub use retry::RetryPolicy;
