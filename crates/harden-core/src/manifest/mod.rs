//! Rollback manifest
//!
//! The manifest is the durable recovery artifact of a run: one
//! [`BackupRecord`] per backed-up surface, in backup order, plus the host it
//! was taken on. It is rewritten atomically after every record, so a run that
//! dies half-way still leaves a manifest describing every artifact written so
//! far.
//!
//! Older manifests (schema 1) stored a per-mechanism map of artifact paths;
//! they are migrated on load, see [`legacy`].

mod legacy;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::mechanism::SurfaceId;
use crate::model::Mechanism;
use crate::{Error, Result};

/// Schema version written by this build
pub const MANIFEST_VERSION: u32 = 2;

/// File name of the manifest inside a run directory
pub const MANIFEST_FILE: &str = "manifest.json";

/// Host the manifest was produced on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    pub hostname: String,
    pub os_family: String,
    pub user: String,
}

impl HostInfo {
    /// Describe the current host from the environment.
    pub fn current() -> Self {
        let hostname = std::env::var("COMPUTERNAME")
            .or_else(|_| std::env::var("HOSTNAME"))
            .ok()
            .or_else(|| {
                std::fs::read_to_string("/etc/hostname")
                    .ok()
                    .map(|h| h.trim().to_string())
            })
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "unknown".to_string());
        let user = std::env::var("USERNAME")
            .or_else(|_| std::env::var("USER"))
            .unwrap_or_else(|_| "unknown".to_string());

        Self {
            hostname,
            os_family: std::env::consts::OS.to_string(),
            user,
        }
    }
}

/// Outcome of backing up one surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecord {
    pub surface: SurfaceId,
    /// Artifact actually written; `None` when nothing was exported
    pub artifact: Option<PathBuf>,
    /// `sha256:<hex>` of the artifact at backup time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    pub success: bool,
    /// The surface did not exist before the run, so there was nothing to save
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub absent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl BackupRecord {
    /// A successfully exported surface.
    pub fn captured(surface: SurfaceId, artifact: PathBuf, checksum: Option<String>) -> Self {
        Self {
            surface,
            artifact: Some(artifact),
            checksum,
            success: true,
            absent: false,
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// A surface that did not exist yet.
    pub fn absent(surface: SurfaceId) -> Self {
        Self {
            surface,
            artifact: None,
            checksum: None,
            success: true,
            absent: true,
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// A surface whose export failed.
    pub fn failed(surface: SurfaceId, error: impl Into<String>) -> Self {
        Self {
            surface,
            artifact: None,
            checksum: None,
            success: false,
            absent: false,
            error: Some(error.into()),
            timestamp: Utc::now(),
        }
    }

    pub fn mechanism(&self) -> Mechanism {
        self.surface.mechanism
    }
}

/// Versioned list of backup records for one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackManifest {
    version: u32,
    pub run_id: String,
    pub created: DateTime<Utc>,
    pub host: HostInfo,
    records: Vec<BackupRecord>,
}

impl RollbackManifest {
    /// Empty manifest for a run on the current host.
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            version: MANIFEST_VERSION,
            run_id: run_id.into(),
            created: Utc::now(),
            host: HostInfo::current(),
            records: Vec::new(),
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn records(&self) -> &[BackupRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of surfaces whose backup failed.
    pub fn failed_count(&self) -> usize {
        self.records.iter().filter(|r| !r.success).count()
    }

    /// Append a record.
    ///
    /// An artifact that does not exist is never recorded: the record is
    /// downgraded to a failure instead, so every artifact named by a persisted
    /// manifest existed when it was written.
    pub fn push(&mut self, mut record: BackupRecord) {
        if let Some(artifact) = &record.artifact
            && !artifact.exists()
        {
            warn!(
                surface = %record.surface,
                artifact = %artifact.display(),
                "Backup artifact missing; recording surface as failed"
            );
            record.error = Some(format!("artifact {} was not written", artifact.display()));
            record.artifact = None;
            record.checksum = None;
            record.success = false;
        }
        self.records.push(record);
    }

    /// Load a manifest, migrating older schemas.
    pub fn load(path: &Path) -> Result<Self> {
        let content = harden_fs::read_locked(path)?;
        Self::parse(&content, path)
    }

    /// Parse manifest JSON; `origin` anchors relative legacy artifact paths.
    pub fn parse(content: &str, origin: &Path) -> Result<Self> {
        let value: Value = serde_json::from_str(content).map_err(|e| Error::ManifestCorrupt {
            message: format!("{}: {}", origin.display(), e),
        })?;

        let version = match value.get("version") {
            None => 1,
            Some(v) => v
                .as_u64()
                .or_else(|| v.as_str().and_then(|s| s.split('.').next()?.parse().ok()))
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| Error::ManifestCorrupt {
                    message: format!("{}: unreadable version {}", origin.display(), v),
                })?,
        };

        match version {
            1 => legacy::migrate(&value, origin),
            MANIFEST_VERSION => {
                serde_json::from_value(value).map_err(|e| Error::ManifestCorrupt {
                    message: format!("{}: {}", origin.display(), e),
                })
            }
            found => Err(Error::ManifestVersion {
                found,
                supported: MANIFEST_VERSION,
            }),
        }
    }

    /// Persist atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        harden_fs::write_text(path, &content)?;
        Ok(())
    }
}

/// Resolve a record's artifact against the manifest location.
///
/// Current manifests store absolute paths; migrated ones may be relative to
/// the directory holding the manifest.
pub fn resolve_artifact(manifest_path: &Path, artifact: &Path) -> PathBuf {
    if artifact.is_absolute() {
        return artifact.to_path_buf();
    }
    manifest_path
        .parent()
        .map(|dir| dir.join(artifact))
        .unwrap_or_else(|| artifact.to_path_buf())
}
