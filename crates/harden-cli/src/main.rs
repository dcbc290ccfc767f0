//! Baseline hardener CLI
//!
//! Exit status is 0 when every change applied (or, for `verify` and
//! `rollback`, every check passed) and 1 otherwise.

mod cli;
mod commands;
mod error;

use clap::Parser;
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands, ManifestAction};
use error::Result;
use harden_core::RunOptions;

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{}: {}", "error".red().bold(), e);
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let options = RunOptions::discover(cli.config.as_deref())?;
    tracing::debug!(?options, "Resolved run options");

    match cli.command {
        Commands::Apply(args) => commands::run_apply(options, &args),
        Commands::Verify { changes, json } => commands::run_verify(&options, &changes, json),
        Commands::Rollback { manifest, json } => commands::run_rollback(&options, &manifest, json),
        Commands::RenderRollback { manifest, output } => {
            commands::run_render_rollback(&manifest, output.as_deref())
        }
        Commands::Manifest {
            action: ManifestAction::Show { manifest },
        } => commands::run_manifest_show(&manifest),
    }
}

/// Logs go to stderr so `--json` output on stdout stays parseable.
fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose)
        .init();
}
