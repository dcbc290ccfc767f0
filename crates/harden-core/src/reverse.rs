//! Reversal of a run from its manifest

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::manifest::{BackupRecord, RollbackManifest, resolve_artifact};
use crate::mechanism::{MechanismSet, SurfaceId};
use crate::{Error, Result};

/// What happened to one surface during reversal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SurfaceReversal {
    Restored { artifact: PathBuf },
    Failed { error: String },
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReversalEntry {
    pub surface: SurfaceId,
    #[serde(flatten)]
    pub status: SurfaceReversal,
}

/// Result of reversing one manifest
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReversalReport {
    pub run_id: String,
    pub entries: Vec<ReversalEntry>,
}

impl ReversalReport {
    pub fn restored(&self) -> usize {
        self.count(|s| matches!(s, SurfaceReversal::Restored { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, SurfaceReversal::Failed { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, SurfaceReversal::Skipped { .. }))
    }

    /// True when no surface failed to restore.
    pub fn is_clean(&self) -> bool {
        self.failed() == 0
    }

    fn count(&self, pred: impl Fn(&SurfaceReversal) -> bool) -> usize {
        self.entries.iter().filter(|e| pred(&e.status)).count()
    }
}

impl fmt::Display for ReversalReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} restored, {} failed, {} skipped",
            self.restored(),
            self.failed(),
            self.skipped()
        )
    }
}

/// Restores surfaces from a manifest's artifacts, newest first
pub struct Reverser<'a> {
    adapters: &'a mut MechanismSet,
}

impl<'a> Reverser<'a> {
    pub fn new(adapters: &'a mut MechanismSet) -> Self {
        Self { adapters }
    }

    /// Reverse every record of `manifest`, loaded from `manifest_path`.
    ///
    /// Failures stay with their surface; the walk always completes.
    pub fn reverse(&mut self, manifest: &RollbackManifest, manifest_path: &Path) -> ReversalReport {
        let mut report = ReversalReport {
            run_id: manifest.run_id.clone(),
            entries: Vec::with_capacity(manifest.records().len()),
        };

        for record in manifest.records().iter().rev() {
            let status = self.reverse_one(record, manifest_path);
            match &status {
                SurfaceReversal::Restored { artifact } => {
                    info!(surface = %record.surface, artifact = %artifact.display(), "Surface restored")
                }
                SurfaceReversal::Failed { error } => {
                    error!(surface = %record.surface, %error, "Surface restore failed")
                }
                SurfaceReversal::Skipped { reason } => {
                    warn!(surface = %record.surface, %reason, "Surface skipped")
                }
            }
            report.entries.push(ReversalEntry {
                surface: record.surface.clone(),
                status,
            });
        }

        info!(run_id = %report.run_id, summary = %report, "Reversal finished");
        report
    }

    fn reverse_one(&mut self, record: &BackupRecord, manifest_path: &Path) -> SurfaceReversal {
        if record.absent {
            return SurfaceReversal::Skipped {
                reason: "surface did not exist before the run".to_string(),
            };
        }
        if !record.success {
            return SurfaceReversal::Skipped {
                reason: format!(
                    "backup failed: {}",
                    record.error.as_deref().unwrap_or("unknown error")
                ),
            };
        }
        let Some(artifact) = &record.artifact else {
            return SurfaceReversal::Skipped {
                reason: "no artifact recorded".to_string(),
            };
        };

        let artifact = resolve_artifact(manifest_path, artifact);
        let restored = check_artifact(&artifact, record.checksum.as_deref()).and_then(|()| {
            self.adapters
                .get_mut(record.mechanism())
                .restore_surface(&record.surface, &artifact)
        });

        match restored {
            Ok(()) => SurfaceReversal::Restored { artifact },
            Err(e) => SurfaceReversal::Failed {
                error: e.to_string(),
            },
        }
    }
}

/// Artifact must exist and, when a checksum was recorded, still match it.
fn check_artifact(artifact: &Path, checksum: Option<&str>) -> Result<()> {
    if !artifact.exists() {
        return Err(Error::ManifestCorrupt {
            message: format!("artifact {} is missing", artifact.display()),
        });
    }
    if let Some(expected) = checksum {
        let actual = harden_fs::compute_file_checksum(artifact).map_err(|e| Error::ManifestCorrupt {
            message: format!("artifact {} is unreadable: {}", artifact.display(), e),
        })?;
        if actual != expected {
            return Err(Error::ManifestCorrupt {
                message: format!(
                    "artifact {} checksum mismatch (expected {}, found {})",
                    artifact.display(),
                    expected,
                    actual
                ),
            });
        }
    }
    Ok(())
}

/// Load the manifest at `path` and reverse it.
pub fn reverse_manifest(path: &Path, adapters: &mut MechanismSet) -> Result<ReversalReport> {
    let manifest = RollbackManifest::load(path)?;
    Ok(Reverser::new(adapters).reverse(&manifest, path))
}
