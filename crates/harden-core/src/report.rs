//! Per-change results and the run report

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::mechanism::WriteOutcome;
use crate::model::{Mechanism, PolicyChange};

/// Outcome of the apply phase for one change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOutcome {
    Applied,
    Failed,
    Skipped,
}

/// Outcome of the verify phase for one change
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyOutcome {
    #[default]
    NotRun,
    Pass,
    Fail,
}

impl fmt::Display for ApplyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Applied => "applied",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        })
    }
}

impl fmt::Display for VerifyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotRun => "not_run",
            Self::Pass => "pass",
            Self::Fail => "fail",
        })
    }
}

/// What happened to one change during a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeResult {
    pub policy_change_id: String,
    pub display_name: String,
    pub mechanism: Mechanism,
    /// Mechanism that actually took the write
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_via: Option<Mechanism>,
    pub apply_outcome: ApplyOutcome,
    pub verify_outcome: VerifyOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write: Option<WriteOutcome>,
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<DateTime<Utc>>,
    pub requires_reboot: bool,
    /// Informational messages, e.g. an unavailable secondary mechanism
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl ChangeResult {
    /// A result with nothing decided yet.
    pub fn pending(change: &PolicyChange) -> Self {
        Self {
            policy_change_id: change.id.clone(),
            display_name: change.display_name.clone(),
            mechanism: change.mechanism,
            applied_via: None,
            apply_outcome: ApplyOutcome::Skipped,
            verify_outcome: VerifyOutcome::NotRun,
            write: None,
            detail: String::new(),
            expected: Some(change.expected_value.to_string()),
            actual: None,
            applied_at: None,
            requires_reboot: change.requires_reboot,
            notes: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn is_applied(&self) -> bool {
        self.apply_outcome == ApplyOutcome::Applied
    }
}

/// States of the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Init,
    Backup,
    Apply,
    Verify,
    Summarize,
    Reboot,
    Done,
    Aborted,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Aborted)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::Backup => "backup",
            Self::Apply => "apply",
            Self::Verify => "verify",
            Self::Summarize => "summarize",
            Self::Reboot => "reboot",
            Self::Done => "done",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Aggregate counters of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub applied: usize,
    pub failed: usize,
    pub skipped: usize,
    pub warnings: usize,
    pub verified_pass: usize,
    pub verified_fail: usize,
}

/// Structured result of a run, the orchestrator's sole output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_set: Option<String>,
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
    pub dry_run: bool,
    pub counts: RunCounts,
    pub reboot_required: bool,
    pub results: Vec<ChangeResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub procedure: Option<PathBuf>,
    pub warnings: Vec<String>,
    pub state: RunState,
}

impl RunReport {
    /// Process exit status: 0 when nothing failed, 1 otherwise.
    pub fn exit_status(&self) -> i32 {
        if self.counts.failed == 0 { 0 } else { 1 }
    }

    pub fn result(&self, change_id: &str) -> Option<&ChangeResult> {
        self.results.iter().find(|r| r.policy_change_id == change_id)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Persist as JSON atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        harden_fs::write_text(path, &self.to_json()?)?;
        Ok(())
    }
}
