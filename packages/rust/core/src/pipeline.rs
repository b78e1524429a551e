//! End-to-end harvest run: sources → fetch → parse → validate → dedup →
//! classify → tag → write artifacts, manifest and summary.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{FixedOffset, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use subharvest_artifacts::{
    MANIFEST_FILE, SummaryOptions, WriteOptions, build_manifest, plan_artifacts, render_summary,
    write_all, write_atomic,
};
use subharvest_fetcher::Fetcher;
use subharvest_shared::{
    ArtifactReport, ArtifactStatus, EmptyBucketPolicy, EntryOrdering, FetchConfig, FetchOutcome,
    HarvestError, LoadedConfig, RawPayload, Result, RunId, RunResult, RunStats, Source,
    SourceReport, SourceStatus,
};

use crate::classify::classify;
use crate::dedup::Deduplicator;
use crate::tagging::TagMatcher;

/// Configuration for one pipeline run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub fetch: FetchConfig,
    /// Directory protocol and tag artifacts are written to.
    pub output_dir: PathBuf,
    /// Summary document location.
    pub summary_path: PathBuf,
    pub empty_bucket: EmptyBucketPolicy,
    pub ordering: EntryOrdering,
    /// Offset the summary timestamp is rendered in.
    pub utc_offset: FixedOffset,
    /// Tag name → remark keywords.
    pub tags: BTreeMap<String, Vec<String>>,
}

impl RunConfig {
    /// Resolve paths and offset from a loaded configuration file.
    pub fn from_loaded(loaded: &LoadedConfig) -> Result<Self> {
        Ok(Self {
            fetch: loaded.config.fetch.clone(),
            output_dir: loaded.output_dir(),
            summary_path: loaded.summary_path(),
            empty_bucket: loaded.config.output.empty_bucket,
            ordering: loaded.config.output.ordering,
            utc_offset: loaded.utc_offset()?,
            tags: loaded.config.tags.clone(),
        })
    }
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called as each source fetch finishes (completion order).
    fn source_fetched(&self, source_id: &str, ok: bool, current: usize, total: usize);
    /// Called when the pipeline completes.
    fn done(&self, result: &RunResult);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn source_fetched(&self, _source_id: &str, _ok: bool, _current: usize, _total: usize) {}
    fn done(&self, _result: &RunResult) {}
}

/// Run the full harvest pipeline.
///
/// 1. Fetch every source concurrently (cancellable)
/// 2. Decode payloads and validate candidates, counting rejections
/// 3. Deduplicate across sources in registry order
/// 4. Classify into buckets and build the tag view
/// 5. Write artifacts and the manifest
/// 6. Render and write the summary
///
/// Per-source and per-entry problems are recorded in the returned
/// [`RunResult`]. Errors are returned only when there are no sources, every
/// source failed, nothing could be written, or the run was cancelled before
/// any artifact was touched.
#[instrument(skip_all, fields(sources = sources.len(), output = %config.output_dir.display()))]
pub async fn run(
    config: &RunConfig,
    sources: &[Source],
    progress: &dyn ProgressReporter,
    cancel: &CancellationToken,
) -> Result<RunResult> {
    let start = Instant::now();
    let run_id = RunId::new();
    let started_at = Utc::now();

    if sources.is_empty() {
        return Err(HarvestError::config("no sources configured"));
    }

    info!(%run_id, sources = sources.len(), "starting harvest run");

    // --- Phase 1: Fetch ---
    progress.phase("Fetching sources");
    let fetcher = Fetcher::new(&config.fetch)?;
    let total = sources.len();

    let payloads = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            warn!("run cancelled during fetch, nothing written");
            return Err(HarvestError::Cancelled);
        }
        payloads = fetcher.fetch_all(sources, |payload, current| {
            progress.source_fetched(&payload.source_id, payload.outcome.is_success(), current, total);
        }) => payloads,
    };

    // --- Phase 2: Parse & validate ---
    progress.phase("Validating entries");
    let mut stats = RunStats {
        sources_total: total,
        ..RunStats::default()
    };
    let mut dedup = Deduplicator::new();
    let reports: Vec<SourceReport> = payloads
        .iter()
        .map(|payload| process_payload(payload, &mut stats, &mut dedup))
        .collect();

    stats.sources_succeeded = reports.iter().filter(|r| r.succeeded()).count();
    stats.sources_failed = total - stats.sources_succeeded;
    stats.duplicates = dedup.duplicates();

    if stats.sources_succeeded == 0 {
        warn!(attempted = total, "every source failed, leaving prior output untouched");
        return Err(HarvestError::AllSourcesFailed { attempted: total });
    }

    // --- Phase 3: Classify & tag ---
    progress.phase("Classifying");
    let buckets = classify(dedup.into_entries(), config.ordering);
    stats.total_unique = buckets.values().map(Vec::len).sum();

    let matcher = TagMatcher::new(&config.tags);
    let tags = matcher.apply(&buckets);

    let mut result = RunResult {
        run_id,
        started_at,
        finished_at: started_at,
        buckets,
        tags,
        sources: reports,
        stats,
        artifacts: Vec::new(),
    };

    if cancel.is_cancelled() {
        warn!("run cancelled before writing, nothing written");
        return Err(HarvestError::Cancelled);
    }

    // --- Phase 4: Write artifacts ---
    progress.phase("Writing artifacts");
    let write_opts = WriteOptions {
        output_dir: config.output_dir.clone(),
        empty_bucket: config.empty_bucket,
    };
    let plans = plan_artifacts(&result, &matcher.tag_names());
    result.artifacts = write_all(&plans, &write_opts)?;

    if let Err(e) = write_manifest(&config.output_dir, &result.artifacts) {
        warn!(error = %e, "manifest write failed");
        result.artifacts.push(failed_report(MANIFEST_FILE, &e));
    }

    // --- Phase 5: Summary ---
    progress.phase("Writing summary");
    result.finished_at = Utc::now();
    let summary_opts = SummaryOptions {
        utc_offset: config.utc_offset,
        link_prefix: link_prefix(&config.summary_path, &config.output_dir),
    };
    let summary = render_summary(&result, &summary_opts);
    if let Err(e) = write_atomic(&config.summary_path, &summary) {
        warn!(path = %config.summary_path.display(), error = %e, "summary write failed");
        result
            .artifacts
            .push(failed_report(&config.summary_path.display().to_string(), &e));
    }

    progress.done(&result);

    info!(
        run_id = %result.run_id,
        unique = result.stats.total_unique,
        succeeded = result.stats.sources_succeeded,
        failed = result.stats.sources_failed,
        rejected = result.stats.rejected(),
        duplicates = result.stats.duplicates,
        write_failures = result.failed_artifacts().count(),
        elapsed_ms = start.elapsed().as_millis(),
        "harvest run complete"
    );

    Ok(result)
}

/// Decode and validate one payload, feeding accepted entries to `dedup`.
fn process_payload(
    payload: &RawPayload,
    stats: &mut RunStats,
    dedup: &mut Deduplicator,
) -> SourceReport {
    let mut report = SourceReport {
        source_id: payload.source_id.clone(),
        status: SourceStatus::Ok,
        attempts: payload.attempts,
        candidates: 0,
        accepted: 0,
        rejected: 0,
    };

    let body = match &payload.outcome {
        FetchOutcome::Success { body } => body,
        failed => {
            report.status = SourceStatus::FetchFailed {
                reason: failed.failure_reason().unwrap_or_default(),
            };
            return report;
        }
    };

    let decoded = match subharvest_parser::decode(payload.format, body) {
        Ok(decoded) => decoded,
        Err(e) => {
            warn!(source_id = %payload.source_id, error = %e, "payload could not be decoded");
            report.status = SourceStatus::ParseFailed {
                reason: e.to_string(),
            };
            return report;
        }
    };

    for candidate in decoded.candidates() {
        report.candidates += 1;
        match subharvest_validator::validate_entry(candidate, &payload.source_id) {
            Ok(entry) => {
                report.accepted += 1;
                dedup.push(entry);
            }
            Err(rejection) => {
                report.rejected += 1;
                stats.record_rejection(&rejection);
                debug!(source_id = %payload.source_id, %rejection, "candidate rejected");
            }
        }
    }
    stats.candidates += report.candidates;

    debug!(
        source_id = %payload.source_id,
        format = %decoded.resolved,
        candidates = report.candidates,
        accepted = report.accepted,
        rejected = report.rejected,
        "source processed"
    );

    report
}

fn write_manifest(output_dir: &Path, artifacts: &[ArtifactReport]) -> Result<()> {
    let manifest = build_manifest(output_dir, artifacts)?;
    write_atomic(&output_dir.join(MANIFEST_FILE), &manifest.to_json()?)?;
    Ok(())
}

fn failed_report(file: &str, error: &HarvestError) -> ArtifactReport {
    ArtifactReport {
        file: file.to_string(),
        entries: 0,
        status: ArtifactStatus::Failed {
            cause: error.to_string(),
        },
    }
}

/// Path of the output directory relative to the summary's directory, for links.
fn link_prefix(summary_path: &Path, output_dir: &Path) -> String {
    let base = summary_path.parent().unwrap_or(Path::new(""));
    match output_dir.strip_prefix(base) {
        Ok(relative) => relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"),
        Err(_) => output_dir.display().to_string(),
    }
}
