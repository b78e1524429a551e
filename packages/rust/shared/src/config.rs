//! Application configuration for subharvest.
//!
//! The config file is `subharvest.toml`, looked up in the working directory and
//! then under `~/.subharvest/`. CLI flags override config file values, which
//! override defaults.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::FixedOffset;
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{HarvestError, Result};
use crate::types::{Source, SourceFormat};

/// Default configuration file name.
pub const CONFIG_FILE_NAME: &str = "subharvest.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".subharvest";

/// Tag names become file names, so keep them to a safe alphabet.
static TAG_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9 _-]+$").expect("tag name regex"));

// ---------------------------------------------------------------------------
// Config structs (matching subharvest.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Optional URL list file (one URL per line, optional format after it).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources_file: Option<PathBuf>,

    /// Fetch behaviour.
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Output locations and write policy.
    #[serde(default)]
    pub output: OutputConfig,

    /// Inline source registry.
    #[serde(default)]
    pub sources: Vec<Source>,

    /// Tag name → remark keywords.
    #[serde(default)]
    pub tags: BTreeMap<String, Vec<String>>,
}

/// `[fetch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Maximum concurrent source fetches.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial backoff in ms; doubled on each retry.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    /// Bodies larger than this are treated as failures.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

fn default_concurrency() -> usize {
    10
}
fn default_timeout_secs() -> u64 {
    15
}
fn default_max_retries() -> u32 {
    2
}
fn default_backoff_ms() -> u64 {
    500
}
fn default_max_body_bytes() -> u64 {
    10 * 1024 * 1024
}

/// What to do with a protocol artifact when its bucket is empty this run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmptyBucketPolicy {
    /// Leave the previous run's file untouched.
    #[default]
    Preserve,
    /// Replace the previous file with an empty one.
    Truncate,
}

/// Line order inside each artifact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryOrdering {
    /// Order entries were first seen in (registry order, then payload order).
    #[default]
    FirstSeen,
    /// Lexicographic by canonical form.
    Sorted,
}

/// `[output]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory holding one `<Protocol>.txt` per protocol.
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,

    /// Markdown summary document.
    #[serde(default = "default_summary_path")]
    pub summary_path: PathBuf,

    #[serde(default)]
    pub empty_bucket: EmptyBucketPolicy,

    #[serde(default)]
    pub ordering: EntryOrdering,

    /// Offset the summary timestamp is rendered in, e.g. `+03:30`.
    #[serde(default = "default_utc_offset")]
    pub utc_offset: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            summary_path: default_summary_path(),
            empty_bucket: EmptyBucketPolicy::default(),
            ordering: EntryOrdering::default(),
            utc_offset: default_utc_offset(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output_configs")
}
fn default_summary_path() -> PathBuf {
    PathBuf::from("SUMMARY.md")
}
fn default_utc_offset() -> String {
    "+00:00".into()
}

impl AppConfig {
    /// A starter config with one example source, written by `config init`.
    pub fn example() -> Self {
        let location = Url::parse("https://example.com/subscription").expect("static URL");
        Self {
            sources: vec![Source {
                id: "example".into(),
                location,
                format: SourceFormat::Auto,
            }],
            ..Self::default()
        }
    }

    /// Check every field that can be checked without touching the filesystem.
    pub fn validate(&self) -> Result<()> {
        if self.fetch.concurrency == 0 {
            return Err(HarvestError::config("fetch.concurrency must be at least 1"));
        }
        if self.fetch.timeout_secs == 0 {
            return Err(HarvestError::config("fetch.timeout_secs must be at least 1"));
        }
        parse_utc_offset(&self.output.utc_offset)?;

        for (name, keywords) in &self.tags {
            if !TAG_NAME_RE.is_match(name) {
                return Err(HarvestError::config(format!(
                    "invalid tag name '{name}': use letters, digits, space, '_' or '-'"
                )));
            }
            if keywords.iter().all(|k| k.trim().is_empty()) {
                return Err(HarvestError::config(format!(
                    "tag '{name}' has no keywords"
                )));
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Loaded config (config + where it came from)
// ---------------------------------------------------------------------------

/// A parsed config together with the directory relative paths resolve against.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: AppConfig,
    /// Directory containing the config file.
    pub base_dir: PathBuf,
    /// Path of the file that was loaded.
    pub path: PathBuf,
}

impl LoadedConfig {
    /// Wrap an in-memory config (used by tests and embedders).
    pub fn in_memory(config: AppConfig, base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        Self {
            path: base_dir.join(CONFIG_FILE_NAME),
            config,
            base_dir,
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Resolved output directory.
    pub fn output_dir(&self) -> PathBuf {
        self.resolve(&self.config.output.dir)
    }

    /// Resolved summary document path.
    pub fn summary_path(&self) -> PathBuf {
        self.resolve(&self.config.output.summary_path)
    }

    /// Summary timestamp offset (validated at load time).
    pub fn utc_offset(&self) -> Result<FixedOffset> {
        parse_utc_offset(&self.config.output.utc_offset)
    }

    /// Build the full source registry: inline sources, then the URL list file.
    ///
    /// An empty registry or a duplicate id is a config error.
    pub fn sources(&self) -> Result<Vec<Source>> {
        let mut sources = self.config.sources.clone();

        if let Some(file) = &self.config.sources_file {
            let path = self.resolve(file);
            let content =
                std::fs::read_to_string(&path).map_err(|e| HarvestError::io(&path, e))?;
            sources.extend(parse_sources_list(&content)?);
        }

        if sources.is_empty() {
            return Err(HarvestError::config("no sources configured"));
        }

        let mut seen = HashSet::new();
        for source in &sources {
            if source.id.trim().is_empty() {
                return Err(HarvestError::config(format!(
                    "source at {} has an empty id",
                    source.location
                )));
            }
            if !seen.insert(source.id.as_str()) {
                return Err(HarvestError::config(format!(
                    "duplicate source id '{}'",
                    source.id
                )));
            }
            match source.location.scheme() {
                "http" | "https" | "file" => {}
                other => {
                    return Err(HarvestError::config(format!(
                        "source '{}' uses unsupported scheme '{other}'",
                        source.id
                    )));
                }
            }
        }

        Ok(sources)
    }
}

/// Parse a URL list: one `<url> [format]` per line, `#` comments allowed.
///
/// Ids are derived as `<host>#<line>` so they stay stable while the file does.
fn parse_sources_list(content: &str) -> Result<Vec<Source>> {
    let mut sources = Vec::new();

    for (idx, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut parts = line.split_whitespace();
        let raw_url = parts.next().unwrap_or_default();
        let location = Url::parse(raw_url).map_err(|e| {
            HarvestError::config(format!("sources file line {}: invalid URL: {e}", idx + 1))
        })?;
        let format = match parts.next() {
            Some(f) => f.parse::<SourceFormat>().map_err(|e| {
                HarvestError::config(format!("sources file line {}: {e}", idx + 1))
            })?,
            None => SourceFormat::Auto,
        };

        let host = location.host_str().unwrap_or("local").to_string();
        sources.push(Source {
            id: format!("{host}#{}", idx + 1),
            location,
            format,
        });
    }

    Ok(sources)
}

/// Parse `+HH:MM`, `-HHMM`, `Z` or `UTC` into a fixed offset.
pub fn parse_utc_offset(s: &str) -> Result<FixedOffset> {
    static OFFSET_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^([+-])(\d{2}):?(\d{2})$").expect("offset regex")
    });

    let trimmed = s.trim();
    let invalid = || HarvestError::config(format!("invalid utc_offset '{s}': expected +HH:MM"));

    let seconds = if trimmed.eq_ignore_ascii_case("utc") || trimmed.eq_ignore_ascii_case("z") {
        0
    } else {
        let caps = OFFSET_RE.captures(trimmed).ok_or_else(invalid)?;
        let hours: i32 = caps[2].parse().map_err(|_| invalid())?;
        let minutes: i32 = caps[3].parse().map_err(|_| invalid())?;
        if minutes >= 60 {
            return Err(invalid());
        }
        let magnitude = hours * 3600 + minutes * 60;
        if &caps[1] == "-" { -magnitude } else { magnitude }
    };

    FixedOffset::east_opt(seconds).ok_or_else(invalid)
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.subharvest/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| HarvestError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the per-user config file (`~/.subharvest/subharvest.toml`).
pub fn home_config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the config: an explicit path, else `./subharvest.toml`, else the
/// per-user file.
pub fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig> {
    if let Some(path) = explicit {
        return load_config_from(path);
    }

    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return load_config_from(&local);
    }

    let home = home_config_path()?;
    if home.exists() {
        return load_config_from(&home);
    }

    Err(HarvestError::config(format!(
        "no {CONFIG_FILE_NAME} found in the working directory or {}",
        home.display()
    )))
}

/// Load and validate the config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<LoadedConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| HarvestError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        HarvestError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    config.validate()?;

    let base_dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    tracing::debug!(path = %path.display(), sources = config.sources.len(), "config loaded");

    Ok(LoadedConfig {
        config,
        base_dir,
        path: path.to_path_buf(),
    })
}

/// Write a starter config file. Refuses to overwrite unless `force` is set.
pub fn init_config(path: &Path, force: bool) -> Result<PathBuf> {
    if path.exists() && !force {
        return Err(HarvestError::config(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )));
    }

    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| HarvestError::io(dir, e))?;
    }

    let content = toml::to_string_pretty(&AppConfig::example())
        .map_err(|e| HarvestError::config(e.to_string()))?;
    std::fs::write(path, content).map_err(|e| HarvestError::io(path, e))?;
    tracing::info!(path = %path.display(), "created starter config file");

    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(label: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("sh-{label}-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    #[test]
    fn default_config_serializes() {
        let toml_str = toml::to_string_pretty(&AppConfig::example()).expect("serialize");
        assert!(toml_str.contains("output_configs"));
        assert!(toml_str.contains("concurrency"));
    }

    #[test]
    fn config_roundtrip() {
        let toml_str = toml::to_string_pretty(&AppConfig::example()).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.fetch.max_retries, 2);
        assert_eq!(parsed.output.empty_bucket, EmptyBucketPolicy::Preserve);
        assert_eq!(parsed.sources.len(), 1);
    }

    #[test]
    fn config_with_sources_and_tags() {
        let toml_str = r#"
[output]
dir = "out"
empty_bucket = "truncate"
ordering = "sorted"
utc_offset = "+03:30"

[[sources]]
id = "a"
location = "https://a.example/sub"
format = "base64"

[[sources]]
id = "b"
location = "https://b.example/list.txt"
format = "plain"

[tags]
Germany = ["germany", "🇩🇪"]
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        config.validate().expect("valid");
        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.sources[0].format, SourceFormat::Base64);
        assert_eq!(config.output.ordering, EntryOrdering::Sorted);
        assert_eq!(config.output.empty_bucket, EmptyBucketPolicy::Truncate);
        assert_eq!(config.tags["Germany"].len(), 2);
    }

    #[test]
    fn empty_registry_is_config_error() {
        let loaded = LoadedConfig::in_memory(AppConfig::default(), ".");
        let err = loaded.sources().unwrap_err();
        assert!(err.to_string().contains("no sources configured"));
    }

    #[test]
    fn duplicate_source_ids_rejected() {
        let mut config = AppConfig::example();
        config.sources.push(config.sources[0].clone());
        let loaded = LoadedConfig::in_memory(config, ".");
        assert!(loaded.sources().unwrap_err().to_string().contains("duplicate"));
    }

    #[test]
    fn sources_file_is_merged_and_relative_to_config() {
        let dir = temp_dir("srcfile");
        std::fs::write(
            dir.join("urls.txt"),
            "# mirrors\nhttps://one.example/sub\n\nhttps://two.example/page html\n",
        )
        .expect("write urls");

        let config = AppConfig {
            sources_file: Some(PathBuf::from("urls.txt")),
            ..AppConfig::default()
        };
        let loaded = LoadedConfig::in_memory(config, &dir);
        let sources = loaded.sources().expect("sources");

        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].id, "one.example#2");
        assert_eq!(sources[0].format, SourceFormat::Auto);
        assert_eq!(sources[1].format, SourceFormat::Html);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn invalid_values_rejected() {
        let mut config = AppConfig::example();
        config.output.utc_offset = "tehran".into();
        assert!(config.validate().is_err());

        let mut config = AppConfig::example();
        config.tags.insert("../escape".into(), vec!["x".into()]);
        assert!(config.validate().is_err());

        let mut config = AppConfig::example();
        config.fetch.concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_timeout_rejected() {
        let mut config = AppConfig::example();
        config.fetch.timeout_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, HarvestError::Config { .. }));
        assert!(err.to_string().contains("timeout_secs"));
    }

    #[test]
    fn utc_offset_parsing() {
        assert_eq!(parse_utc_offset("+03:30").unwrap().local_minus_utc(), 12_600);
        assert_eq!(parse_utc_offset("-0500").unwrap().local_minus_utc(), -18_000);
        assert_eq!(parse_utc_offset("UTC").unwrap().local_minus_utc(), 0);
        assert!(parse_utc_offset("+03:75").is_err());
    }

    #[test]
    fn init_refuses_to_overwrite() {
        let dir = temp_dir("init");
        let path = dir.join(CONFIG_FILE_NAME);
        init_config(&path, false).expect("first init");
        assert!(init_config(&path, false).is_err());
        init_config(&path, true).expect("forced init");

        let loaded = load_config_from(&path).expect("load written config");
        assert_eq!(loaded.base_dir, dir);
        assert_eq!(loaded.output_dir(), dir.join("output_configs"));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
