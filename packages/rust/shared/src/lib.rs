//! Shared types, error model, and configuration for subharvest.
//!
//! This crate is the foundation depended on by all other subharvest crates.
//! It provides:
//! - [`HarvestError`]: the unified error type
//! - Domain types ([`Source`], [`RawPayload`], [`Entry`], [`RunResult`], [`Protocol`])
//! - Configuration ([`AppConfig`], [`FetchConfig`], [`OutputConfig`], config loading)

pub mod config;
pub mod encoding;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CONFIG_FILE_NAME, EmptyBucketPolicy, EntryOrdering, FetchConfig, LoadedConfig,
    OutputConfig, config_dir, home_config_path, init_config, load_config, load_config_from,
    parse_utc_offset,
};
pub use error::{HarvestError, Result};
pub use types::{
    ArtifactReport, ArtifactStatus, Buckets, Entry, FetchOutcome, Protocol, RawPayload,
    Rejection, RunId, RunResult, RunStats, Source, SourceFormat, SourceReport, SourceStatus,
    TagBuckets,
};
