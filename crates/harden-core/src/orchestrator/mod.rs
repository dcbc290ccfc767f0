//! Run orchestration
//!
//! The [`Orchestrator`] owns one run end to end:
//! - **Backup**: export every touched surface and persist the manifest
//! - **Apply**: write each change through its mechanism(s)
//! - **Verify**: read applied changes back
//! - **Summarize / Reboot**: aggregate the [`crate::report::RunReport`] and
//!   handle pending restarts

mod context;
mod engine;

pub use context::RunContext;
pub use engine::{Orchestrator, PROCEDURE_FILE, REPORT_FILE, new_run_id};
