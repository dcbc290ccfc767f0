//! Orchestrator implementation

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::context::RunContext;
use crate::apply::Applier;
use crate::audit::{AUDIT_FILE, AuditLevel, AuditLog};
use crate::backup::{BackupManager, plan_surfaces};
use crate::config::{ExecutionMode, RunOptions};
use crate::mechanism::{MechanismSet, Procedure};
use crate::model::ChangeSet;
use crate::reboot::{RebootHandler, SystemReboot};
use crate::report::{ApplyOutcome, RunReport, RunState, VerifyOutcome};
use crate::verify::Verifier;
use crate::{Error, Result};

/// File name of the run report inside a run directory
pub const REPORT_FILE: &str = "report.json";

/// File name of the rendered procedure in render mode
pub const PROCEDURE_FILE: &str = "procedure.ps1";

/// Generate a sortable, unique run id.
pub fn new_run_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", Utc::now().format("%Y%m%dT%H%M%SZ"), &suffix[..8])
}

/// Drives one run through its states
///
/// `Init → Backup → Apply → Verify → Summarize → [Reboot] → Done`, with
/// `Aborted` reachable from `Backup` only when backups are incomplete and
/// `abort_on_backup_failure` is set. Each [`step`](Self::step) performs the
/// work of the current state and moves to the next.
pub struct Orchestrator {
    run_id: String,
    changes: ChangeSet,
    options: RunOptions,
    adapters: MechanismSet,
    procedure: Option<Rc<RefCell<Procedure>>>,
    reboot: Box<dyn RebootHandler>,
    run_dir: PathBuf,
    backup: Option<BackupManager>,
    audit: AuditLog,
    state: RunState,
    ctx: RunContext,
    abort: Option<Error>,
}

impl Orchestrator {
    /// Prepare a run: create the run directory and open its audit stream.
    ///
    /// Adapters follow `options.mode`: live adapters over the configured
    /// stores, or render adapters writing into a procedure script.
    pub fn new(changes: ChangeSet, options: RunOptions) -> Result<Self> {
        let run_id = new_run_id();
        let run_dir = std::path::absolute(&options.backup_location)?.join(&run_id);

        let (adapters, procedure) = match options.mode {
            ExecutionMode::Live => (MechanismSet::from_stores(&options.stores), None),
            ExecutionMode::Render => {
                let procedure = Procedure::shared(run_dir.join("host-backup"));
                (MechanismSet::render(Rc::clone(&procedure)), Some(procedure))
            }
        };

        Self::with_parts(run_id, run_dir, changes, options, adapters, procedure)
    }

    /// Prepare a run over explicit adapters.
    pub fn with_adapters(changes: ChangeSet, options: RunOptions, adapters: MechanismSet) -> Result<Self> {
        let run_id = new_run_id();
        let run_dir = std::path::absolute(&options.backup_location)?.join(&run_id);
        Self::with_parts(run_id, run_dir, changes, options, adapters, None)
    }

    fn with_parts(
        run_id: String,
        run_dir: PathBuf,
        changes: ChangeSet,
        options: RunOptions,
        adapters: MechanismSet,
        procedure: Option<Rc<RefCell<Procedure>>>,
    ) -> Result<Self> {
        fs::create_dir_all(&run_dir).map_err(|e| harden_fs::Error::io(&run_dir, e))?;
        let audit = AuditLog::open(&run_dir.join(AUDIT_FILE), &run_id)?;
        debug!(run_id = %run_id, audit = %audit.path().display(), "Audit stream opened");

        Ok(Self {
            run_id,
            changes,
            options,
            adapters,
            procedure,
            reboot: Box::new(SystemReboot::default()),
            run_dir,
            backup: None,
            audit,
            state: RunState::Init,
            ctx: RunContext::new(),
            abort: None,
        })
    }

    /// Replace the handler asked to restart the host.
    pub fn with_reboot_handler(mut self, handler: Box<dyn RebootHandler>) -> Self {
        self.reboot = handler;
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// Adapters of this run, for reads or writes between steps.
    pub fn adapters_mut(&mut self) -> &mut MechanismSet {
        &mut self.adapters
    }

    /// Perform the current state's work and advance.
    ///
    /// Stepping a terminal state is a no-op.
    pub fn step(&mut self) -> Result<RunState> {
        let next = match self.state {
            RunState::Init => self.init(),
            RunState::Backup => self.run_backup()?,
            RunState::Apply => self.run_apply(),
            RunState::Verify => self.run_verify(),
            RunState::Summarize => self.summarize(),
            RunState::Reboot => self.run_reboot(),
            RunState::Done | RunState::Aborted => return Ok(self.state),
        };
        debug!(from = %self.state, to = %next, "State transition");
        self.state = next;
        Ok(next)
    }

    /// Step until a terminal state and build the report.
    ///
    /// The report is written to the run directory either way; an aborted run
    /// returns [`Error::BackupAborted`].
    pub fn run(mut self) -> Result<RunReport> {
        while !self.state.is_terminal() {
            self.step()?;
        }
        let report = self.finish()?;
        match self.abort.take() {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }

    fn init(&mut self) -> RunState {
        info!(
            run_id = %self.run_id,
            changes = self.changes.len(),
            dry_run = self.options.dry_run,
            mode = %self.options.mode,
            "Starting run"
        );
        let message = format!(
            "run started: {} change(s), mode {}, dry-run {}",
            self.changes.len(),
            self.options.mode,
            self.options.dry_run
        );
        self.audit.record(AuditLevel::Info, RunState::Init, message);
        RunState::Backup
    }

    fn run_backup(&mut self) -> Result<RunState> {
        if !self.options.create_backup || self.options.dry_run {
            self.audit
                .record(AuditLevel::Info, RunState::Backup, "backup skipped by options");
            return Ok(RunState::Apply);
        }
        if self.options.mode == ExecutionMode::Render {
            self.audit.record(
                AuditLevel::Info,
                RunState::Backup,
                "backup rendered into the procedure",
            );
            return Ok(RunState::Apply);
        }

        let surfaces = plan_surfaces(&self.changes, &self.adapters);
        let base = self.run_dir.parent().unwrap_or(&self.run_dir).to_path_buf();
        let mut manager = BackupManager::new(&base, &self.run_id)?;
        let summary = manager.backup_all(&surfaces, &self.adapters)?;

        for record in &summary.records {
            let (level, message) = match (&record.artifact, record.success) {
                (Some(artifact), true) => (
                    AuditLevel::Success,
                    format!("backed up {} to {}", record.surface, artifact.display()),
                ),
                (None, true) => (
                    AuditLevel::Info,
                    format!("{} does not exist yet; nothing to back up", record.surface),
                ),
                (_, false) => (
                    AuditLevel::Error,
                    format!(
                        "backup of {} failed: {}",
                        record.surface,
                        record.error.as_deref().unwrap_or("unknown error")
                    ),
                ),
            };
            self.audit.record(level, RunState::Backup, message);
        }

        let failed = summary.failed();
        let manifest = manager.manifest_path().to_path_buf();
        self.ctx.backup = Some(summary);
        self.backup = Some(manager);

        if failed == 0 {
            return Ok(RunState::Apply);
        }

        if self.options.abort_on_backup_failure {
            error!(failed, manifest = %manifest.display(), "Aborting run: backups incomplete");
            self.audit.record(
                AuditLevel::Error,
                RunState::Backup,
                format!("run aborted: {} surface backup(s) failed", failed),
            );
            self.abort = Some(Error::BackupAborted { failed, manifest });
            return Ok(RunState::Aborted);
        }

        error!(failed, "Backups incomplete; continuing");
        self.ctx.warnings.push(format!(
            "{} surface backup(s) failed; affected surfaces cannot be rolled back",
            failed
        ));
        Ok(RunState::Apply)
    }

    fn run_apply(&mut self) -> RunState {
        let mut applier = Applier::new(&mut self.adapters, self.options.dry_run);
        let results: Vec<_> = self.changes.iter().map(|change| applier.apply(change)).collect();

        for result in &results {
            let level = match result.apply_outcome {
                ApplyOutcome::Applied => AuditLevel::Success,
                ApplyOutcome::Failed => AuditLevel::Error,
                ApplyOutcome::Skipped => AuditLevel::Info,
            };
            self.audit.record_change(
                level,
                RunState::Apply,
                &result.policy_change_id,
                format!("{}: {}", result.apply_outcome, result.detail),
            );
            for warning in &result.warnings {
                self.audit
                    .record_change(AuditLevel::Warning, RunState::Apply, &result.policy_change_id, warning);
            }
        }

        self.ctx.results = results;
        RunState::Verify
    }

    fn run_verify(&mut self) -> RunState {
        if self.options.skip_verification
            || self.options.dry_run
            || self.options.mode == ExecutionMode::Render
        {
            self.audit
                .record(AuditLevel::Info, RunState::Verify, "verification skipped");
            return RunState::Summarize;
        }

        let verifier = Verifier::new(&self.adapters);
        for (change, result) in self.changes.iter().zip(self.ctx.results.iter_mut()) {
            if !result.is_applied() {
                continue;
            }
            verifier.verify_into(change, result);

            let (level, message) = match result.verify_outcome {
                VerifyOutcome::Pass => (AuditLevel::Success, "verified".to_string()),
                _ => (
                    AuditLevel::Warning,
                    format!(
                        "verification failed: expected {}, actual {}",
                        result.expected.as_deref().unwrap_or("?"),
                        result.actual.as_deref().unwrap_or("<absent>")
                    ),
                ),
            };
            self.audit
                .record_change(level, RunState::Verify, &result.policy_change_id, message);
        }
        RunState::Summarize
    }

    fn summarize(&mut self) -> RunState {
        self.ctx.reboot_required = self.ctx.any_applied_requires_reboot();
        let counts = self.ctx.counts();

        info!(
            applied = counts.applied,
            failed = counts.failed,
            skipped = counts.skipped,
            verified_pass = counts.verified_pass,
            verified_fail = counts.verified_fail,
            reboot_required = self.ctx.reboot_required,
            "Run summary"
        );
        let level = if counts.failed > 0 {
            AuditLevel::Error
        } else {
            AuditLevel::Success
        };
        self.audit.record(
            level,
            RunState::Summarize,
            format!(
                "{} applied, {} failed, {} skipped, {} verified, {} verification failure(s)",
                counts.applied, counts.failed, counts.skipped, counts.verified_pass, counts.verified_fail
            ),
        );

        if self.ctx.reboot_required || self.options.force_reboot {
            RunState::Reboot
        } else {
            RunState::Done
        }
    }

    fn run_reboot(&mut self) -> RunState {
        let live = !self.options.dry_run && self.options.mode == ExecutionMode::Live;

        if self.options.force_reboot && live {
            let reason = format!("harden run {}", self.run_id);
            match self.reboot.reboot(&reason) {
                Ok(()) => self
                    .audit
                    .record(AuditLevel::Info, RunState::Reboot, "host restart requested"),
                Err(e) => {
                    error!(error = %e, "Restart request failed");
                    self.ctx.warnings.push(format!("restart request failed: {}", e));
                    self.audit.record(
                        AuditLevel::Error,
                        RunState::Reboot,
                        format!("restart request failed: {}", e),
                    );
                }
            }
        } else if self.ctx.reboot_required {
            warn!("reboot pending");
            self.ctx
                .warnings
                .push("reboot pending: restart the host to complete the run".to_string());
            self.audit
                .record(AuditLevel::Warning, RunState::Reboot, "reboot pending");
        }
        RunState::Done
    }

    fn finish(&mut self) -> Result<RunReport> {
        let procedure = match &self.procedure {
            Some(procedure) => {
                let path = self.run_dir.join(PROCEDURE_FILE);
                procedure.borrow().save(&path)?;
                info!(path = %path.display(), "Procedure rendered");
                Some(path)
            }
            None => None,
        };

        let report = RunReport {
            run_id: self.run_id.clone(),
            change_set: self.changes.name.clone(),
            started: self.ctx.started,
            finished: Utc::now(),
            dry_run: self.options.dry_run,
            counts: self.ctx.counts(),
            reboot_required: self.ctx.reboot_required,
            results: self.ctx.results.clone(),
            manifest: self.backup.as_ref().map(|b| b.manifest_path().to_path_buf()),
            procedure,
            warnings: self.ctx.all_warnings(),
            state: self.state,
        };
        report.save(&self.run_dir.join(REPORT_FILE))?;

        self.audit.record(
            AuditLevel::Info,
            self.state,
            format!("run finished with exit status {}", report.exit_status()),
        );
        Ok(report)
    }
}
