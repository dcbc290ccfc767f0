//! Surface backup implementation

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

use crate::manifest::{BackupRecord, MANIFEST_FILE, RollbackManifest};
use crate::mechanism::{MechanismSet, SurfaceId};
use crate::model::ChangeSet;
use crate::{Error, Result};

/// Result of backing up a run's surfaces
#[derive(Debug, Clone)]
pub struct BackupSummary {
    /// One record per attempted surface, in backup order
    pub records: Vec<BackupRecord>,
    /// Whether every surface was either captured or absent
    pub all_backed_up: bool,
}

impl BackupSummary {
    pub fn failed(&self) -> usize {
        self.records.iter().filter(|r| !r.success).count()
    }
}

/// Deduplicated surfaces touched by a change set, in first-use order.
///
/// Both the primary and the secondary mechanism of each change count. A
/// locator no adapter can place is left out here; the write fails later and
/// is reported against its change.
pub fn plan_surfaces(changes: &ChangeSet, adapters: &MechanismSet) -> Vec<SurfaceId> {
    let mut seen = HashSet::new();
    let mut surfaces = Vec::new();

    for change in changes.iter() {
        for mechanism in change.mechanisms() {
            match adapters.get(mechanism).surface_for(&change.locator) {
                Ok(surface) => {
                    if seen.insert(surface.clone()) {
                        surfaces.push(surface);
                    }
                }
                Err(e) => warn!(
                    change = %change.id,
                    %mechanism,
                    error = %e,
                    "No backup surface for locator"
                ),
            }
        }
    }
    surfaces
}

/// File-name safe form of a surface scope.
pub fn sanitize(scope: &str) -> String {
    let cleaned: String = scope
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let collapsed = cleaned
        .split('_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_");
    if collapsed.is_empty() {
        "surface".to_string()
    } else {
        collapsed
    }
}

/// Artifact file stem for the `index`-th surface (1-based).
pub fn artifact_stem(index: usize, surface: &SurfaceId) -> String {
    format!(
        "{:02}-{}-{}",
        index,
        surface.mechanism,
        sanitize(&surface.scope)
    )
}

/// Exports surfaces and keeps the run's manifest current
pub struct BackupManager {
    run_dir: PathBuf,
    manifest_path: PathBuf,
    manifest: RollbackManifest,
}

impl BackupManager {
    /// Create the run directory and an empty manifest inside it.
    ///
    /// The manifest is persisted immediately, so even a run that fails on its
    /// first surface leaves a readable manifest behind.
    pub fn new(backup_location: &Path, run_id: &str) -> Result<Self> {
        let base = std::path::absolute(backup_location)?;
        let run_dir = base.join(run_id);
        fs::create_dir_all(&run_dir).map_err(|e| harden_fs::Error::io(&run_dir, e))?;

        let manager = Self {
            manifest_path: run_dir.join(MANIFEST_FILE),
            run_dir,
            manifest: RollbackManifest::new(run_id),
        };
        manager.manifest.save(&manager.manifest_path)?;
        Ok(manager)
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    pub fn manifest(&self) -> &RollbackManifest {
        &self.manifest
    }

    /// Export every surface, recording each outcome.
    ///
    /// A failing surface never stops the others. Only a manifest that cannot
    /// be persisted is an error.
    pub fn backup_all(
        &mut self,
        surfaces: &[SurfaceId],
        adapters: &MechanismSet,
    ) -> Result<BackupSummary> {
        let mut records = Vec::with_capacity(surfaces.len());

        for (index, surface) in surfaces.iter().enumerate() {
            let record = self.backup_one(index + 1, surface, adapters);
            self.manifest.push(record);
            self.manifest.save(&self.manifest_path)?;

            if let Some(stored) = self.manifest.records().last() {
                records.push(stored.clone());
            }
        }

        let all_backed_up = records.iter().all(|r| r.success);
        Ok(BackupSummary {
            records,
            all_backed_up,
        })
    }

    fn backup_one(&self, index: usize, surface: &SurfaceId, adapters: &MechanismSet) -> BackupRecord {
        let stem = artifact_stem(index, surface);
        let adapter = adapters.get(surface.mechanism);

        match adapter.export_surface(surface, &self.run_dir, &stem) {
            Ok(artifact) => match harden_fs::compute_file_checksum(&artifact) {
                Ok(checksum) => {
                    info!(
                        %surface,
                        artifact = %artifact.display(),
                        "Surface backed up"
                    );
                    BackupRecord::captured(surface.clone(), artifact, Some(checksum))
                }
                Err(e) => {
                    error!(%surface, error = %e, "Backup artifact unreadable");
                    BackupRecord::failed(surface.clone(), format!("artifact unreadable: {}", e))
                }
            },
            Err(Error::SurfaceMissing { .. }) => {
                info!(%surface, "Surface does not exist yet; nothing to back up");
                BackupRecord::absent(surface.clone())
            }
            Err(e) => {
                error!(%surface, error = %e, "Surface backup failed");
                BackupRecord::failed(surface.clone(), e.to_string())
            }
        }
    }
}
