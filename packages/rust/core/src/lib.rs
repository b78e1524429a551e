//! Core pipeline orchestration and domain logic for subharvest.
//!
//! This crate ties together fetching, parsing, validation, deduplication,
//! classification and artifact writing into one end-to-end run.

pub mod classify;
pub mod dedup;
pub mod pipeline;
pub mod tagging;

pub use classify::classify;
pub use dedup::Deduplicator;
pub use pipeline::{ProgressReporter, RunConfig, SilentProgress, run};
pub use tagging::TagMatcher;
