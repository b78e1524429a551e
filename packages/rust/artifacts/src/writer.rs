//! Artifact writer.
//!
//! Every artifact is staged as `.<name>.tmp` beside its target and then
//! renamed over it, so readers only ever see the old file or the complete new
//! one. All files are staged before any rename happens, which keeps the window
//! where a run is half-applied as short as a handful of renames.

use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, warn};

use subharvest_shared::{
    ArtifactReport, ArtifactStatus, EmptyBucketPolicy, Entry, HarvestError, Protocol, Result,
    RunResult,
};

/// Subdirectory of the output directory holding tag artifacts.
pub const TAGS_DIR: &str = "tags";

/// Where and how to write.
#[derive(Debug, Clone)]
pub struct WriteOptions {
    pub output_dir: PathBuf,
    pub empty_bucket: EmptyBucketPolicy,
}

/// One artifact the run wants on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPlan {
    /// Path relative to the output directory.
    pub file: String,
    /// File content; empty when the bucket is empty.
    pub content: String,
    pub entries: usize,
}

/// Serialize entries one canonical form per line, each newline-terminated.
pub fn render_entries(entries: &[Entry]) -> String {
    let mut out = String::with_capacity(entries.iter().map(|e| e.canonical.len() + 1).sum());
    for entry in entries {
        out.push_str(&entry.canonical);
        out.push('\n');
    }
    out
}

/// Plan one artifact per known protocol, then one per configured tag.
///
/// Protocols without a bucket still get a plan (with no entries) so the empty
/// bucket policy applies to them too.
pub fn plan_artifacts(result: &RunResult, tag_names: &[String]) -> Vec<ArtifactPlan> {
    let mut plans = Vec::with_capacity(Protocol::ALL.len() + tag_names.len());

    for protocol in Protocol::ALL {
        let entries = result.buckets.get(&protocol).map(Vec::as_slice).unwrap_or_default();
        plans.push(ArtifactPlan {
            file: protocol.file_name(),
            content: render_entries(entries),
            entries: entries.len(),
        });
    }

    for tag in tag_names {
        let entries = result.tags.get(tag).map(Vec::as_slice).unwrap_or_default();
        plans.push(ArtifactPlan {
            file: format!("{TAGS_DIR}/{tag}.txt"),
            content: render_entries(entries),
            entries: entries.len(),
        });
    }

    plans
}

/// Write every planned artifact. Per-artifact failures are reported, not raised.
///
/// Returns `Err` only when the output directory cannot be created or when
/// every artifact that needed writing failed.
#[instrument(skip_all, fields(dir = %opts.output_dir.display(), artifacts = plans.len()))]
pub fn write_all(plans: &[ArtifactPlan], opts: &WriteOptions) -> Result<Vec<ArtifactReport>> {
    for dir in [opts.output_dir.clone(), opts.output_dir.join(TAGS_DIR)] {
        std::fs::create_dir_all(&dir).map_err(|e| HarvestError::io(&dir, e))?;
    }

    // Pass 1: decide and stage.
    let mut staged: Vec<(usize, PathBuf, PathBuf)> = Vec::new();
    let mut reports: Vec<ArtifactReport> = Vec::with_capacity(plans.len());

    for (idx, plan) in plans.iter().enumerate() {
        let target = opts.output_dir.join(&plan.file);
        let status = if plan.entries == 0 && opts.empty_bucket == EmptyBucketPolicy::Preserve {
            Some(ArtifactStatus::Preserved)
        } else if existing_matches(&target, &plan.content) {
            Some(ArtifactStatus::Unchanged)
        } else {
            match stage(&target, &plan.content) {
                Ok(temp) => {
                    staged.push((idx, temp, target));
                    None
                }
                Err(e) => Some(ArtifactStatus::Failed {
                    cause: e.to_string(),
                }),
            }
        };

        reports.push(ArtifactReport {
            file: plan.file.clone(),
            entries: plan.entries,
            // Staged artifacts are resolved in pass 2.
            status: status.unwrap_or(ArtifactStatus::Written),
        });
    }

    // Pass 2: swap.
    for (idx, temp, target) in staged {
        if let Err(e) = std::fs::rename(&temp, &target) {
            warn!(file = %target.display(), error = %e, "artifact swap failed");
            let _ = std::fs::remove_file(&temp);
            reports[idx].status = ArtifactStatus::Failed {
                cause: HarvestError::io(&target, e).to_string(),
            };
            continue;
        }
        if plans[idx].entries == 0 {
            reports[idx].status = ArtifactStatus::Emptied;
        }
        debug!(file = %target.display(), entries = plans[idx].entries, "artifact swapped in");
    }

    let attempted = reports
        .iter()
        .filter(|r| r.status != ArtifactStatus::Preserved)
        .count();
    let failed = reports
        .iter()
        .filter(|r| matches!(r.status, ArtifactStatus::Failed { .. }))
        .count();

    if attempted > 0 && failed == attempted {
        return Err(HarvestError::Write(format!(
            "all {attempted} artifacts failed to write in {}",
            opts.output_dir.display()
        )));
    }

    info!(attempted, failed, "artifacts written");
    Ok(reports)
}

/// Write-then-swap a single file. Returns `false` if the target already held
/// exactly `content` and was left untouched.
pub fn write_atomic(target: &Path, content: &str) -> Result<bool> {
    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| HarvestError::io(parent, e))?;
    }
    if existing_matches(target, content) {
        return Ok(false);
    }

    let temp = stage(target, content)?;
    std::fs::rename(&temp, target).map_err(|e| {
        let _ = std::fs::remove_file(&temp);
        HarvestError::io(target, e)
    })?;
    Ok(true)
}

/// Write `content` to the temp path for `target`.
fn stage(target: &Path, content: &str) -> Result<PathBuf> {
    let temp = temp_path(target);
    std::fs::write(&temp, content).map_err(|e| HarvestError::io(&temp, e))?;
    Ok(temp)
}

fn temp_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{name}.tmp"))
}

fn existing_matches(target: &Path, content: &str) -> bool {
    std::fs::read(target).is_ok_and(|existing| existing == content.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use subharvest_shared::{Buckets, RunId, RunStats, TagBuckets};

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("sh-writer-{}", uuid::Uuid::now_v7()))
    }

    fn entry(protocol: Protocol, canonical: &str) -> Entry {
        Entry {
            protocol,
            canonical: canonical.into(),
            source_id: "s".into(),
            remark: None,
        }
    }

    fn result_with(buckets: Buckets, tags: TagBuckets) -> RunResult {
        RunResult {
            run_id: RunId::new(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            buckets,
            tags,
            sources: vec![],
            stats: RunStats::default(),
            artifacts: vec![],
        }
    }

    fn opts(dir: &Path, policy: EmptyBucketPolicy) -> WriteOptions {
        WriteOptions {
            output_dir: dir.to_path_buf(),
            empty_bucket: policy,
        }
    }

    fn status_of<'a>(reports: &'a [ArtifactReport], file: &str) -> &'a ArtifactStatus {
        &reports.iter().find(|r| r.file == file).expect("report").status
    }

    #[test]
    fn renders_one_entry_per_line() {
        let text = render_entries(&[
            entry(Protocol::Vless, "vless://a@h:1"),
            entry(Protocol::Vless, "vless://b@h:2"),
        ]);
        assert_eq!(text, "vless://a@h:1\nvless://b@h:2\n");
        assert_eq!(render_entries(&[]), "");
    }

    #[test]
    fn plans_cover_every_protocol_and_tag() {
        let mut buckets = Buckets::new();
        buckets.insert(Protocol::Trojan, vec![entry(Protocol::Trojan, "trojan://p@h:1")]);
        let mut tags = TagBuckets::new();
        tags.insert("Germany".into(), vec![entry(Protocol::Trojan, "trojan://p@h:1")]);

        let plans = plan_artifacts(&result_with(buckets, tags), &["Germany".into()]);
        assert_eq!(plans.len(), Protocol::ALL.len() + 1);
        let trojan = plans.iter().find(|p| p.file == "Trojan.txt").unwrap();
        assert_eq!(trojan.entries, 1);
        assert_eq!(plans.last().unwrap().file, "tags/Germany.txt");
    }

    #[test]
    fn writes_then_reports_unchanged() {
        let dir = temp_dir();
        let plans = vec![ArtifactPlan {
            file: "Vless.txt".into(),
            content: "vless://a@h:1\n".into(),
            entries: 1,
        }];

        let first = write_all(&plans, &opts(&dir, EmptyBucketPolicy::Preserve)).unwrap();
        assert_eq!(first[0].status, ArtifactStatus::Written);
        assert_eq!(
            std::fs::read_to_string(dir.join("Vless.txt")).unwrap(),
            "vless://a@h:1\n"
        );

        let second = write_all(&plans, &opts(&dir, EmptyBucketPolicy::Preserve)).unwrap();
        assert_eq!(second[0].status, ArtifactStatus::Unchanged);
        assert!(!dir.join(".Vless.txt.tmp").exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn empty_bucket_policies() {
        let dir = temp_dir();
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("Tuic.txt"), "tuic://old@h:1\n").unwrap();
        std::fs::write(dir.join("Vmess.txt"), "vmess://old\n").unwrap();

        let keep = vec![
            ArtifactPlan {
                file: "Tuic.txt".into(),
                content: String::new(),
                entries: 0,
            },
            ArtifactPlan {
                file: "Vless.txt".into(),
                content: "vless://a@h:1\n".into(),
                entries: 1,
            },
        ];
        let reports = write_all(&keep, &opts(&dir, EmptyBucketPolicy::Preserve)).unwrap();
        assert_eq!(status_of(&reports, "Tuic.txt"), &ArtifactStatus::Preserved);
        assert_eq!(
            std::fs::read_to_string(dir.join("Tuic.txt")).unwrap(),
            "tuic://old@h:1\n"
        );

        let wipe = vec![ArtifactPlan {
            file: "Vmess.txt".into(),
            content: String::new(),
            entries: 0,
        }];
        let reports = write_all(&wipe, &opts(&dir, EmptyBucketPolicy::Truncate)).unwrap();
        assert_eq!(status_of(&reports, "Vmess.txt"), &ArtifactStatus::Emptied);
        assert_eq!(std::fs::read_to_string(dir.join("Vmess.txt")).unwrap(), "");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn failing_artifact_does_not_block_others() {
        let dir = temp_dir();
        std::fs::create_dir_all(dir.join("Trojan.txt")).unwrap();

        let plans = vec![
            ArtifactPlan {
                file: "Trojan.txt".into(),
                content: "trojan://p@h:1\n".into(),
                entries: 1,
            },
            ArtifactPlan {
                file: "Vless.txt".into(),
                content: "vless://a@h:1\n".into(),
                entries: 1,
            },
        ];
        let reports = write_all(&plans, &opts(&dir, EmptyBucketPolicy::Preserve)).unwrap();
        assert!(matches!(
            status_of(&reports, "Trojan.txt"),
            ArtifactStatus::Failed { .. }
        ));
        assert_eq!(status_of(&reports, "Vless.txt"), &ArtifactStatus::Written);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn all_failures_are_fatal() {
        let dir = temp_dir();
        std::fs::create_dir_all(dir.join("Trojan.txt")).unwrap();

        let plans = vec![ArtifactPlan {
            file: "Trojan.txt".into(),
            content: "trojan://p@h:1\n".into(),
            entries: 1,
        }];
        let err = write_all(&plans, &opts(&dir, EmptyBucketPolicy::Preserve)).unwrap_err();
        assert!(matches!(err, HarvestError::Write(_)));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn write_atomic_skips_identical_content() {
        let dir = temp_dir();
        let target = dir.join("SUMMARY.md");
        assert!(write_atomic(&target, "# hi\n").unwrap());
        assert!(!write_atomic(&target, "# hi\n").unwrap());
        assert!(write_atomic(&target, "# changed\n").unwrap());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
