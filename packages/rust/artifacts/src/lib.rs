//! Output artifacts: per-protocol entry files, the manifest, and the summary.
//!
//! - [`writer`]: write-then-swap persistence of bucket files
//! - [`manifest`]: timestamp-free digest of what is on disk
//! - [`summary`]: the human-readable Markdown report

pub mod manifest;
pub mod summary;
pub mod writer;

pub use manifest::{MANIFEST_FILE, Manifest, ManifestArtifact, build_manifest};
pub use summary::{SummaryOptions, render_summary};
pub use writer::{ArtifactPlan, TAGS_DIR, WriteOptions, plan_artifacts, render_entries, write_all, write_atomic};
