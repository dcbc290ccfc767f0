//! Pre-mutation surface backups
//!
//! Every surface a change set touches is exported once, before the first
//! write, into `<backup_location>/<run_id>/`. Artifacts are named
//! `{index:02}-{mechanism}-{scope}.{ext}` so a directory listing shows the
//! backup order, and each outcome is appended to the run's
//! [`RollbackManifest`](crate::manifest::RollbackManifest) as it happens.

mod surface_backup;

pub use surface_backup::{BackupManager, BackupSummary, artifact_stem, plan_surfaces, sanitize};
