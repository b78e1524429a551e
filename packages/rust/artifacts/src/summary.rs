//! Markdown run summary.

use std::fmt::Write;

use chrono::{FixedOffset, Offset, Utc};

use subharvest_shared::{ArtifactStatus, Protocol, RunResult, SourceStatus};

/// Rendering options for [`render_summary`].
#[derive(Debug, Clone)]
pub struct SummaryOptions {
    /// Offset the run timestamp is shown in.
    pub utc_offset: FixedOffset,
    /// Prefix joined to artifact file names for links, relative to the
    /// summary's own location (e.g. `output_configs`). Empty for none.
    pub link_prefix: String,
}

impl Default for SummaryOptions {
    fn default() -> Self {
        Self {
            utc_offset: Utc.fix(),
            link_prefix: String::new(),
        }
    }
}

/// Render the summary document. Pure: same result and options, same text.
pub fn render_summary(result: &RunResult, opts: &SummaryOptions) -> String {
    let mut md = String::new();
    let stats = &result.stats;
    let timestamp = result
        .finished_at
        .with_timezone(&opts.utc_offset)
        .format("%Y-%m-%d %H:%M:%S %:z");

    // Writing to a String cannot fail.
    let _ = writeln!(md, "# Subscription Harvest Summary\n");
    let _ = writeln!(md, "Last run: **{timestamp}** (run `{}`)\n", result.run_id);

    let _ = writeln!(md, "## Metrics\n");
    let _ = writeln!(md, "| Metric | Value |");
    let _ = writeln!(md, "|---|---:|");
    let rows: [(&str, String); 8] = [
        ("Total unique entries", stats.total_unique.to_string()),
        (
            "Sources succeeded",
            format!("{} / {}", stats.sources_succeeded, stats.sources_total),
        ),
        ("Sources failed", stats.sources_failed.to_string()),
        ("Candidates seen", stats.candidates.to_string()),
        ("Rejected: unknown prefix", stats.rejected_unknown_prefix.to_string()),
        ("Rejected: malformed", stats.rejected_malformed.to_string()),
        ("Rejected: truncated", stats.rejected_truncated.to_string()),
        ("Duplicates collapsed", stats.duplicates.to_string()),
    ];
    for (metric, value) in rows {
        let _ = writeln!(md, "| {metric} | {value} |");
    }

    let _ = writeln!(md, "\n## Protocols\n");
    let _ = writeln!(md, "| Protocol | Entries | File |");
    let _ = writeln!(md, "|---|---:|---|");
    for protocol in Protocol::ALL {
        let file = protocol.file_name();
        let _ = writeln!(
            md,
            "| {} | {} | [{file}]({}) |",
            protocol.tag(),
            entry_count(result, &file, result.count(protocol)),
            link(&opts.link_prefix, &file)
        );
    }

    if !result.tags.is_empty() {
        let _ = writeln!(md, "\n## Tags\n");
        let _ = writeln!(md, "| Tag | Entries | File |");
        let _ = writeln!(md, "|---|---:|---|");
        for (tag, entries) in &result.tags {
            let file = format!("tags/{tag}.txt");
            let _ = writeln!(
                md,
                "| {} | {} | [{file}]({}) |",
                escape_cell(tag),
                entry_count(result, &file, entries.len()),
                link(&opts.link_prefix, &file)
            );
        }
    }

    let failed: Vec<_> = result.failed_sources().collect();
    if !failed.is_empty() {
        let _ = writeln!(md, "\n## Source Failures\n");
        let _ = writeln!(md, "| Source | Stage | Reason | Attempts |");
        let _ = writeln!(md, "|---|---|---|---:|");
        for report in failed {
            let (stage, reason) = match &report.status {
                SourceStatus::FetchFailed { reason } => ("fetch", reason.as_str()),
                SourceStatus::ParseFailed { reason } => ("parse", reason.as_str()),
                SourceStatus::Ok => continue,
            };
            let _ = writeln!(
                md,
                "| {} | {stage} | {} | {} |",
                escape_cell(&report.source_id),
                escape_cell(reason),
                report.attempts
            );
        }
    }

    let write_failures: Vec<_> = result.failed_artifacts().collect();
    if !write_failures.is_empty() {
        let _ = writeln!(md, "\n## Write Failures\n");
        let _ = writeln!(md, "| File | Cause |");
        let _ = writeln!(md, "|---|---|");
        for artifact in write_failures {
            if let ArtifactStatus::Failed { cause } = &artifact.status {
                let _ = writeln!(md, "| {} | {} |", artifact.file, escape_cell(cause));
            }
        }
    }

    md
}

/// Count cell for an artifact row. A preserved file still holds the
/// previous run's entries, so a bare zero next to its link would mislead.
fn entry_count(result: &RunResult, file: &str, count: usize) -> String {
    let preserved = result
        .artifacts
        .iter()
        .any(|a| a.file == file && a.status == ArtifactStatus::Preserved);
    if preserved {
        format!("{count} (preserved)")
    } else {
        count.to_string()
    }
}

/// Link target with each path segment percent-encoded.
fn link(prefix: &str, file: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    let target = if prefix.is_empty() {
        file.to_string()
    } else {
        format!("{prefix}/{file}")
    };
    target
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}
