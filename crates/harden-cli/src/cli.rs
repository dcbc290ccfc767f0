//! CLI argument parsing using clap derive

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use harden_core::ExecutionMode;

/// Baseline hardener - apply, verify and roll back security baselines
#[derive(Parser, Debug)]
#[command(name = "harden")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging (overrides RUST_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file (default: ./harden.toml, then the user config dir)
    #[arg(long, global = true, env = "HARDEN_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Back up, apply and verify a change set
    ///
    /// Examples:
    ///   harden apply baseline.json
    ///   harden apply baseline.json --dry-run
    ///   harden apply baseline.json --mode render --render-to apply.ps1
    Apply(ApplyArgs),

    /// Check a change set against the host without writing anything
    Verify {
        /// Change set (JSON or TOML)
        changes: PathBuf,

        /// Output results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Restore every surface recorded in a rollback manifest
    Rollback {
        /// Path to manifest.json
        manifest: PathBuf,

        /// Output the reversal report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Emit a standalone PowerShell procedure that reverses a run
    RenderRollback {
        /// Path to manifest.json
        manifest: PathBuf,

        /// Write the procedure to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Inspect rollback manifests
    Manifest {
        #[command(subcommand)]
        action: ManifestAction,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ManifestAction {
    /// Print a manifest, migrated to the current schema
    Show {
        /// Path to manifest.json
        manifest: PathBuf,
    },
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct ApplyArgs {
    /// Change set (JSON or TOML)
    pub changes: PathBuf,

    /// Log intended changes without mutating anything
    #[arg(long)]
    pub dry_run: bool,

    /// Skip the pre-apply backup
    #[arg(long)]
    pub no_backup: bool,

    /// Directory receiving one sub-directory per run
    #[arg(long)]
    pub backup_location: Option<PathBuf>,

    /// Stop before any write when a surface backup failed
    #[arg(long)]
    pub abort_on_backup_failure: bool,

    /// Skip the verification pass
    #[arg(long)]
    pub skip_verification: bool,

    /// Restart the host at the end of the run
    #[arg(long)]
    pub force_reboot: bool,

    /// Mutate the host (live) or render a procedure (render)
    #[arg(long)]
    pub mode: Option<ExecutionMode>,

    /// Copy the rendered procedure here (implies --mode render)
    #[arg(long)]
    pub render_to: Option<PathBuf>,

    /// Print the run report as JSON
    #[arg(long)]
    pub json: bool,

    /// Also write the run report to this file
    #[arg(long)]
    pub report: Option<PathBuf>,
}
