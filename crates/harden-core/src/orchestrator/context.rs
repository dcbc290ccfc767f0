//! Mutable state carried through one run

use chrono::{DateTime, Utc};

use crate::backup::BackupSummary;
use crate::report::{ApplyOutcome, ChangeResult, RunCounts, VerifyOutcome};

/// Everything a run accumulates between states
#[derive(Debug, Clone)]
pub struct RunContext {
    pub started: DateTime<Utc>,
    pub backup: Option<BackupSummary>,
    /// One per change, in input order, once Apply has run
    pub results: Vec<ChangeResult>,
    /// Run-level warnings; per-change warnings stay on their result
    pub warnings: Vec<String>,
    pub reboot_required: bool,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            started: Utc::now(),
            backup: None,
            results: Vec::new(),
            warnings: Vec::new(),
            reboot_required: false,
        }
    }

    /// Run-level warnings followed by every change's warnings.
    pub fn all_warnings(&self) -> Vec<String> {
        self.warnings
            .iter()
            .chain(self.results.iter().flat_map(|r| r.warnings.iter()))
            .cloned()
            .collect()
    }

    pub fn counts(&self) -> RunCounts {
        let mut counts = RunCounts {
            warnings: self.all_warnings().len(),
            ..RunCounts::default()
        };
        for result in &self.results {
            match result.apply_outcome {
                ApplyOutcome::Applied => counts.applied += 1,
                ApplyOutcome::Failed => counts.failed += 1,
                ApplyOutcome::Skipped => counts.skipped += 1,
            }
            match result.verify_outcome {
                VerifyOutcome::Pass => counts.verified_pass += 1,
                VerifyOutcome::Fail => counts.verified_fail += 1,
                VerifyOutcome::NotRun => {}
            }
        }
        counts
    }

    /// OR of `requires_reboot` over applied changes.
    pub fn any_applied_requires_reboot(&self) -> bool {
        self.results
            .iter()
            .any(|r| r.is_applied() && r.requires_reboot)
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}
