//! Configuration change orchestration for security baselines
//!
//! This crate takes an ordered [`ChangeSet`] and drives it through
//! backup → apply → verify against three host configuration surfaces, with a
//! durable [`RollbackManifest`] to reverse the run afterwards:
//!
//! - **Key-value**: registry keys and values
//! - **Security template**: the local security-policy database
//! - **Group policy**: computer and user administrative templates
//!
//! # Architecture
//!
//! ```text
//!                  harden-cli
//!                      |
//!                 orchestrator --- audit, report
//!                /     |     \
//!           backup   apply   verify        reverse
//!                \     |     /               |
//!                  mechanism ----------------+
//!                      |
//!                    store  (file-backed or native tools)
//!                      |
//!                  harden-fs
//! ```
//!
//! # Example
//!
//! ```ignore
//! use harden_core::{ChangeSet, Orchestrator, RunOptions};
//!
//! let changes = ChangeSet::load("baseline.json".as_ref())?;
//! let report = Orchestrator::new(changes, RunOptions::default())?.run()?;
//! std::process::exit(report.exit_status());
//! ```

pub mod apply;
pub mod audit;
pub mod backup;
pub mod config;
pub mod error;
pub mod locator;
pub mod manifest;
pub mod mechanism;
pub mod model;
pub mod orchestrator;
pub mod reboot;
pub mod render;
pub mod report;
pub mod reverse;
pub mod store;
pub mod verify;

pub use apply::Applier;
pub use audit::{AuditEvent, AuditLevel, AuditLog};
pub use backup::{BackupManager, BackupSummary};
pub use config::{ExecutionMode, RunOptions, StoreOptions};
pub use error::{Error, Result};
pub use locator::{KeyPath, Locator};
pub use manifest::{BackupRecord, RollbackManifest};
pub use mechanism::{MechanismAdapter, MechanismSet, SurfaceId, WriteOutcome};
pub use model::{ChangeSet, Mechanism, PolicyChange, PolicyValue, RiskLevel, ValueType};
pub use orchestrator::{Orchestrator, RunContext};
pub use reboot::{RebootHandler, RecordingReboot, SystemReboot};
pub use render::reversal_script;
pub use report::{ApplyOutcome, ChangeResult, RunCounts, RunReport, RunState, VerifyOutcome};
pub use reverse::{ReversalReport, Reverser, reverse_manifest};
pub use verify::{Verifier, verify_all};
