//! Core domain types for a harvest run.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for run identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

/// Declared content format of a source payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    /// One entry per line.
    Plain,
    /// The whole payload is a single base64 block wrapping line-delimited text.
    Base64,
    /// An HTML page whose visible text is scanned for entries.
    Html,
    /// A JSON array of strings or objects carrying a URI field.
    Json,
    /// Base64 when the payload decodes cleanly, plain otherwise.
    #[default]
    Auto,
}

impl std::fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Plain => "plain",
            Self::Base64 => "base64",
            Self::Html => "html",
            Self::Json => "json",
            Self::Auto => "auto",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for SourceFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "plain" => Ok(Self::Plain),
            "base64" => Ok(Self::Base64),
            "html" => Ok(Self::Html),
            "json" => Ok(Self::Json),
            "auto" => Ok(Self::Auto),
            other => Err(format!("unknown source format '{other}'")),
        }
    }
}

/// A configured remote (or local) endpoint that publishes entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    /// Unique identifier, used in logs and the summary.
    pub id: String,
    /// Where to fetch from (`http`, `https` or `file`).
    pub location: Url,
    /// Expected payload format.
    #[serde(default)]
    pub format: SourceFormat,
}

// ---------------------------------------------------------------------------
// RawPayload
// ---------------------------------------------------------------------------

/// Result of fetching one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Success { body: String },
    Timeout,
    Status { code: u16 },
    Connection { cause: String },
}

impl FetchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Short human-readable failure reason; `None` on success.
    pub fn failure_reason(&self) -> Option<String> {
        match self {
            Self::Success { .. } => None,
            Self::Timeout => Some("timeout".into()),
            Self::Status { code } => Some(format!("HTTP {code}")),
            Self::Connection { cause } => Some(cause.clone()),
        }
    }
}

/// Raw content fetched from one source, tagged with the outcome.
#[derive(Debug, Clone)]
pub struct RawPayload {
    pub source_id: String,
    pub format: SourceFormat,
    pub outcome: FetchOutcome,
    /// Number of requests made, including retries.
    pub attempts: u32,
}

// ---------------------------------------------------------------------------
// Protocol
// ---------------------------------------------------------------------------

/// Closed set of supported entry protocols.
///
/// Variants are declared in tag order so `Ord` sorts alphabetically by tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Protocol {
    Hysteria2,
    ShadowSocks,
    ShadowSocksR,
    Trojan,
    Tuic,
    Vless,
    Vmess,
    WireGuard,
}

impl Protocol {
    /// Every protocol, in tag order.
    pub const ALL: [Protocol; 8] = [
        Protocol::Hysteria2,
        Protocol::ShadowSocks,
        Protocol::ShadowSocksR,
        Protocol::Trojan,
        Protocol::Tuic,
        Protocol::Vless,
        Protocol::Vmess,
        Protocol::WireGuard,
    ];

    /// Display tag, also the artifact file stem.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Hysteria2 => "Hysteria2",
            Self::ShadowSocks => "ShadowSocks",
            Self::ShadowSocksR => "ShadowSocksR",
            Self::Trojan => "Trojan",
            Self::Tuic => "Tuic",
            Self::Vless => "Vless",
            Self::Vmess => "Vmess",
            Self::WireGuard => "WireGuard",
        }
    }

    /// Scheme written in canonical forms.
    pub fn canonical_scheme(&self) -> &'static str {
        match self {
            Self::Hysteria2 => "hysteria2",
            Self::ShadowSocks => "ss",
            Self::ShadowSocksR => "ssr",
            Self::Trojan => "trojan",
            Self::Tuic => "tuic",
            Self::Vless => "vless",
            Self::Vmess => "vmess",
            Self::WireGuard => "wireguard",
        }
    }

    /// Resolve a URI scheme (case-insensitive, aliases included).
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme.to_ascii_lowercase().as_str() {
            "hysteria2" | "hy2" => Some(Self::Hysteria2),
            "ss" => Some(Self::ShadowSocks),
            "ssr" => Some(Self::ShadowSocksR),
            "trojan" => Some(Self::Trojan),
            "tuic" => Some(Self::Tuic),
            "vless" => Some(Self::Vless),
            "vmess" => Some(Self::Vmess),
            "wireguard" | "wg" => Some(Self::WireGuard),
            _ => None,
        }
    }

    /// Artifact file name (`<Tag>.txt`).
    pub fn file_name(&self) -> String {
        format!("{}.txt", self.tag())
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

// ---------------------------------------------------------------------------
// Entry / Rejection
// ---------------------------------------------------------------------------

/// A validated, canonicalized configuration record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub protocol: Protocol,
    /// Normalized string form; equality of this field defines duplicates.
    pub canonical: String,
    /// Source the entry was first seen in.
    pub source_id: String,
    /// Decoded human-readable name (URI fragment or vmess `ps`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remark: Option<String>,
}

/// Why a candidate string was not accepted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("unknown protocol prefix")]
    UnknownPrefix,
    #[error("malformed {field}: {detail}")]
    MalformedField { field: &'static str, detail: String },
    #[error("truncated entry")]
    Truncated,
}

impl Rejection {
    pub fn malformed(field: &'static str, detail: impl Into<String>) -> Self {
        Self::MalformedField {
            field,
            detail: detail.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// RunResult
// ---------------------------------------------------------------------------

/// Unique entries per protocol, in bucket order.
pub type Buckets = BTreeMap<Protocol, Vec<Entry>>;

/// Entries per configured tag name.
pub type TagBuckets = BTreeMap<String, Vec<Entry>>;

/// What happened to one source during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SourceStatus {
    Ok,
    FetchFailed { reason: String },
    ParseFailed { reason: String },
}

/// Per-source tally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceReport {
    pub source_id: String,
    pub status: SourceStatus,
    pub attempts: u32,
    pub candidates: usize,
    pub accepted: usize,
    pub rejected: usize,
}

impl SourceReport {
    pub fn succeeded(&self) -> bool {
        self.status == SourceStatus::Ok
    }
}

/// Aggregated counters for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub sources_total: usize,
    pub sources_succeeded: usize,
    pub sources_failed: usize,
    pub candidates: usize,
    pub rejected_unknown_prefix: usize,
    pub rejected_malformed: usize,
    pub rejected_truncated: usize,
    pub duplicates: usize,
    pub total_unique: usize,
}

impl RunStats {
    pub fn rejected(&self) -> usize {
        self.rejected_unknown_prefix + self.rejected_malformed + self.rejected_truncated
    }

    /// Count one rejection under its reason.
    pub fn record_rejection(&mut self, rejection: &Rejection) {
        match rejection {
            Rejection::UnknownPrefix => self.rejected_unknown_prefix += 1,
            Rejection::MalformedField { .. } => self.rejected_malformed += 1,
            Rejection::Truncated => self.rejected_truncated += 1,
        }
    }
}

/// Outcome of writing one artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ArtifactStatus {
    /// New content swapped in.
    Written,
    /// Existing file already held identical bytes.
    Unchanged,
    /// Bucket empty; prior file left untouched.
    Preserved,
    /// Bucket empty; file replaced with empty content.
    Emptied,
    Failed { cause: String },
}

/// Per-artifact write report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactReport {
    /// Path relative to the output directory.
    pub file: String,
    pub entries: usize,
    pub status: ArtifactStatus,
}

/// Complete output of one pipeline execution.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub buckets: Buckets,
    pub tags: TagBuckets,
    pub sources: Vec<SourceReport>,
    pub stats: RunStats,
    /// Filled in by the writer; empty until artifacts are persisted.
    pub artifacts: Vec<ArtifactReport>,
}

impl RunResult {
    /// Entry count for one protocol (zero when absent).
    pub fn count(&self, protocol: Protocol) -> usize {
        self.buckets.get(&protocol).map_or(0, Vec::len)
    }

    pub fn failed_sources(&self) -> impl Iterator<Item = &SourceReport> {
        self.sources.iter().filter(|s| !s.succeeded())
    }

    pub fn failed_artifacts(&self) -> impl Iterator<Item = &ArtifactReport> {
        self.artifacts
            .iter()
            .filter(|a| matches!(a.status, ArtifactStatus::Failed { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_order_matches_tag_order() {
        let mut tags: Vec<&str> = Protocol::ALL.iter().map(Protocol::tag).collect();
        let declared = tags.clone();
        tags.sort_unstable();
        assert_eq!(tags, declared);
    }

    #[test]
    fn scheme_aliases_resolve() {
        assert_eq!(Protocol::from_scheme("HY2"), Some(Protocol::Hysteria2));
        assert_eq!(Protocol::from_scheme("wg"), Some(Protocol::WireGuard));
        assert_eq!(Protocol::from_scheme("ssr"), Some(Protocol::ShadowSocksR));
        assert_eq!(Protocol::from_scheme("http"), None);
    }

    #[test]
    fn source_deserializes_with_default_format() {
        let src: Source = toml::from_str(
            r#"
id = "mirror"
location = "https://example.com/sub"
"#,
        )
        .expect("parse source");
        assert_eq!(src.format, SourceFormat::Auto);
        assert_eq!(src.location.host_str(), Some("example.com"));
    }

    #[test]
    fn rejection_counters() {
        let mut stats = RunStats::default();
        stats.record_rejection(&Rejection::UnknownPrefix);
        stats.record_rejection(&Rejection::Truncated);
        stats.record_rejection(&Rejection::malformed("port", "not a number"));
        assert_eq!(stats.rejected(), 3);
        assert_eq!(stats.rejected_malformed, 1);
    }

    #[test]
    fn fetch_outcome_reasons() {
        assert_eq!(FetchOutcome::Timeout.failure_reason().as_deref(), Some("timeout"));
        assert_eq!(
            FetchOutcome::Status { code: 503 }.failure_reason().as_deref(),
            Some("HTTP 503")
        );
        assert!(FetchOutcome::Success { body: String::new() }.is_success());
    }
}
