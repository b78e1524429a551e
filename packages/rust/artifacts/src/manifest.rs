//! `manifest.json`: a timestamp-free description of the output directory.
//!
//! Identical runs produce byte-identical manifests, so a publish step can
//! detect "nothing changed" by comparing one file.

use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use subharvest_shared::{ArtifactReport, ArtifactStatus, HarvestError, Protocol, Result};

use crate::writer::TAGS_DIR;

pub const MANIFEST_FILE: &str = "manifest.json";

/// Bumped when the manifest layout changes.
const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    /// SHA-256 over every protocol artifact, in tag order.
    pub content_digest: String,
    pub artifacts: Vec<ManifestArtifact>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestArtifact {
    pub file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Protocol>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Lines in the file as it is on disk.
    pub entries: usize,
    /// Absent when the file does not exist.
    pub sha256: Option<String>,
    pub status: ManifestStatus,
}

/// Disk state of an artifact, coarser than [`ArtifactStatus`]:
/// "written" and "unchanged" both mean the file holds this run's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestStatus {
    Current,
    Preserved,
    Failed,
}

impl From<&ArtifactStatus> for ManifestStatus {
    fn from(status: &ArtifactStatus) -> Self {
        match status {
            ArtifactStatus::Written | ArtifactStatus::Unchanged | ArtifactStatus::Emptied => {
                Self::Current
            }
            ArtifactStatus::Preserved => Self::Preserved,
            ArtifactStatus::Failed { .. } => Self::Failed,
        }
    }
}

impl Manifest {
    pub fn to_json(&self) -> Result<String> {
        let mut json = serde_json::to_string_pretty(self)
            .map_err(|e| HarvestError::Write(format!("manifest serialization: {e}")))?;
        json.push('\n');
        Ok(json)
    }
}

/// Build the manifest from what is actually on disk after the writer ran.
pub fn build_manifest(output_dir: &Path, reports: &[ArtifactReport]) -> Result<Manifest> {
    let mut artifacts = Vec::with_capacity(reports.len());
    let mut digest = Sha256::new();

    for report in reports {
        let path = output_dir.join(&report.file);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(HarvestError::io(&path, e)),
        };

        let (protocol, tag) = classify_file(&report.file);
        let sha256 = bytes.as_deref().map(sha256_hex);

        if protocol.is_some() {
            digest.update(report.file.as_bytes());
            digest.update(b"\0");
            digest.update(sha256.as_deref().unwrap_or("-").as_bytes());
            digest.update(b"\n");
        }

        artifacts.push(ManifestArtifact {
            file: report.file.clone(),
            protocol,
            tag,
            entries: bytes.as_deref().map_or(0, count_lines),
            sha256,
            status: ManifestStatus::from(&report.status),
        });
    }

    Ok(Manifest {
        version: MANIFEST_VERSION,
        content_digest: format!("{:x}", digest.finalize()),
        artifacts,
    })
}

fn classify_file(file: &str) -> (Option<Protocol>, Option<String>) {
    if let Some(tag) = file
        .strip_prefix(TAGS_DIR)
        .and_then(|rest| rest.strip_prefix('/'))
        .and_then(|rest| rest.strip_suffix(".txt"))
    {
        return (None, Some(tag.to_string()));
    }
    let protocol = Protocol::ALL.into_iter().find(|p| p.file_name() == file);
    (protocol, None)
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn count_lines(bytes: &[u8]) -> usize {
    bytes.split(|b| *b == b'\n').filter(|line| !line.is_empty()).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("sh-manifest-{}", uuid::Uuid::now_v7()))
    }

    fn report(file: &str, status: ArtifactStatus) -> ArtifactReport {
        ArtifactReport {
            file: file.into(),
            entries: 0,
            status,
        }
    }

    #[test]
    fn describes_disk_state() {
        let dir = temp_dir();
        std::fs::create_dir_all(dir.join(TAGS_DIR)).unwrap();
        std::fs::write(dir.join("Vless.txt"), "vless://a@h:1\nvless://b@h:2\n").unwrap();
        std::fs::write(dir.join("tags/Germany.txt"), "vless://a@h:1\n").unwrap();

        let reports = vec![
            report("Vless.txt", ArtifactStatus::Written),
            report("Vmess.txt", ArtifactStatus::Preserved),
            report("tags/Germany.txt", ArtifactStatus::Unchanged),
        ];
        let manifest = build_manifest(&dir, &reports).unwrap();

        let vless = &manifest.artifacts[0];
        assert_eq!(vless.protocol, Some(Protocol::Vless));
        assert_eq!(vless.entries, 2);
        assert_eq!(vless.status, ManifestStatus::Current);
        assert_eq!(vless.sha256.as_ref().map(String::len), Some(64));

        assert_eq!(manifest.artifacts[1].sha256, None);
        assert_eq!(manifest.artifacts[1].status, ManifestStatus::Preserved);

        assert_eq!(manifest.artifacts[2].tag.as_deref(), Some("Germany"));
        assert_eq!(manifest.artifacts[2].protocol, None);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn written_and_unchanged_serialize_identically() {
        let dir = temp_dir();
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("Trojan.txt"), "trojan://p@h:443\n").unwrap();

        let first = build_manifest(&dir, &[report("Trojan.txt", ArtifactStatus::Written)])
            .unwrap()
            .to_json()
            .unwrap();
        let second = build_manifest(&dir, &[report("Trojan.txt", ArtifactStatus::Unchanged)])
            .unwrap()
            .to_json()
            .unwrap();
        assert_eq!(first, second);

        std::fs::write(dir.join("Trojan.txt"), "trojan://q@h:443\n").unwrap();
        let third = build_manifest(&dir, &[report("Trojan.txt", ArtifactStatus::Written)]).unwrap();
        let first: Manifest = serde_json::from_str(&first).unwrap();
        assert_ne!(first.content_digest, third.content_digest);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn tag_files_do_not_affect_content_digest() {
        let dir = temp_dir();
        std::fs::create_dir_all(dir.join(TAGS_DIR)).unwrap();
        std::fs::write(dir.join("Tuic.txt"), "tuic://u@h:1\n").unwrap();

        let base = build_manifest(&dir, &[report("Tuic.txt", ArtifactStatus::Written)]).unwrap();
        std::fs::write(dir.join("tags/Fast.txt"), "tuic://u@h:1\n").unwrap();
        let with_tag = build_manifest(
            &dir,
            &[
                report("Tuic.txt", ArtifactStatus::Written),
                report("tags/Fast.txt", ArtifactStatus::Written),
            ],
        )
        .unwrap();
        assert_eq!(base.content_digest, with_tag.content_digest);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
