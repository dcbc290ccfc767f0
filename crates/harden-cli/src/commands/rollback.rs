//! Rollback, render-rollback and manifest commands

use std::path::Path;

use colored::Colorize;
use harden_core::reverse::SurfaceReversal;
use harden_core::{ExecutionMode, MechanismSet, RollbackManifest, RunOptions, reversal_script, reverse_manifest};

use crate::error::{CliError, Result};

/// Restore every surface of a manifest on this host.
pub fn run_rollback(options: &RunOptions, manifest: &Path, json: bool) -> Result<i32> {
    if options.mode == ExecutionMode::Render {
        return Err(CliError::user(
            "rollback needs live host access; use render-rollback for a procedure",
        ));
    }

    let mut adapters = MechanismSet::from_stores(&options.stores);
    let report = reverse_manifest(manifest, &mut adapters)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "{} Rolling back run {}",
            "=>".blue().bold(),
            report.run_id.cyan()
        );
        for entry in &report.entries {
            match &entry.status {
                SurfaceReversal::Restored { artifact } => println!(
                    "   {} {} from {}",
                    "RESTORED".green().bold(),
                    entry.surface,
                    artifact.display().to_string().dimmed()
                ),
                SurfaceReversal::Failed { error } => {
                    println!("   {} {}: {}", "FAILED".red().bold(), entry.surface, error)
                }
                SurfaceReversal::Skipped { reason } => println!(
                    "   {} {}: {}",
                    "SKIPPED".yellow().bold(),
                    entry.surface,
                    reason.dimmed()
                ),
            }
        }
        println!();
        println!("{} {}", "Summary:".bold(), report);
    }

    Ok(if report.is_clean() { 0 } else { 1 })
}

/// Print or write a PowerShell reversal procedure.
pub fn run_render_rollback(manifest: &Path, output: Option<&Path>) -> Result<i32> {
    let loaded = RollbackManifest::load(manifest)?;
    let script = reversal_script(&loaded, manifest);

    match output {
        Some(path) => {
            std::fs::write(path, &script)?;
            println!(
                "{} Reversal procedure written to {}",
                "OK".green().bold(),
                path.display().to_string().cyan()
            );
        }
        None => print!("{}", script),
    }
    Ok(0)
}

/// Print a manifest in the current schema.
pub fn run_manifest_show(manifest: &Path) -> Result<i32> {
    let loaded = RollbackManifest::load(manifest)?;
    println!("{}", serde_json::to_string_pretty(&loaded)?);
    Ok(0)
}
