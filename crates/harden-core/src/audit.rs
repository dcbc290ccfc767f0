//! Run audit stream
//!
//! Every orchestrator event is appended as one JSON line to the run's
//! `audit.jsonl` and mirrored to `tracing`. The audit file is best-effort:
//! a failed append is logged and the run carries on.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::Result;

/// File name of the audit stream inside a run directory
pub const AUDIT_FILE: &str = "audit.jsonl";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditLevel {
    Info,
    Warning,
    Error,
    Success,
}

impl fmt::Display for AuditLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Success => "SUCCESS",
        })
    }
}

/// One line of the audit stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub run_id: String,
    pub level: AuditLevel,
    /// Orchestrator state the event was raised in
    pub phase: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_id: Option<String>,
}

/// Append-only audit stream of one run
#[derive(Debug)]
pub struct AuditLog {
    run_id: String,
    path: PathBuf,
    file: File,
}

impl AuditLog {
    /// Open (or create) the audit file for appending.
    pub fn open(path: &Path, run_id: impl Into<String>) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| harden_fs::Error::io(path, e))?;
        Ok(Self {
            run_id: run_id.into(),
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&mut self, level: AuditLevel, phase: impl fmt::Display, message: impl Into<String>) {
        self.emit(level, phase.to_string(), message.into(), None);
    }

    pub fn record_change(
        &mut self,
        level: AuditLevel,
        phase: impl fmt::Display,
        change_id: &str,
        message: impl Into<String>,
    ) {
        self.emit(level, phase.to_string(), message.into(), Some(change_id.to_string()));
    }

    fn emit(&mut self, level: AuditLevel, phase: String, message: String, change_id: Option<String>) {
        let change = change_id.as_deref().unwrap_or("");
        match level {
            AuditLevel::Info => info!(run_id = %self.run_id, %phase, change, "{}", message),
            AuditLevel::Success => {
                info!(run_id = %self.run_id, %phase, change, outcome = "success", "{}", message)
            }
            AuditLevel::Warning => warn!(run_id = %self.run_id, %phase, change, "{}", message),
            AuditLevel::Error => error!(run_id = %self.run_id, %phase, change, "{}", message),
        }

        let event = AuditEvent {
            timestamp: Utc::now(),
            run_id: self.run_id.clone(),
            level,
            phase,
            message,
            change_id,
        };
        let written = serde_json::to_string(&event)
            .map_err(std::io::Error::from)
            .and_then(|line| writeln!(self.file, "{}", line));
        if let Err(e) = written {
            warn!(error = %e, "Failed to append audit event");
        }
    }
}

/// Read back an audit stream.
pub fn read_events(path: &Path) -> Result<Vec<AuditEvent>> {
    let content = harden_fs::read_text(path)?;
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str::<AuditEvent>(line).map_err(crate::Error::from))
        .collect()
}
