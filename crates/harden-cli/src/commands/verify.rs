//! The verify command

use std::path::Path;

use colored::Colorize;
use harden_core::{ChangeSet, ExecutionMode, MechanismSet, RunOptions, VerifyOutcome, verify_all};

use crate::error::{CliError, Result};

/// Read every change back without backing up or writing.
pub fn run_verify(options: &RunOptions, changes: &Path, json: bool) -> Result<i32> {
    if options.mode == ExecutionMode::Render {
        return Err(CliError::user(
            "verify needs live host access; set mode = \"live\"",
        ));
    }
    let set = ChangeSet::load(changes)?;
    let adapters = MechanismSet::from_stores(&options.stores);
    let results = verify_all(set.iter(), &adapters);
    let failed = results
        .iter()
        .filter(|r| r.verify_outcome != VerifyOutcome::Pass)
        .count();

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        for result in &results {
            let tag = match result.verify_outcome {
                VerifyOutcome::Pass => "PASS".green().bold(),
                _ => "FAIL".red().bold(),
            };
            println!("   {} {} {}", tag, result.policy_change_id.cyan(), result.detail.dimmed());
        }
        println!();
        println!(
            "{} {} passed, {} failed",
            "Summary:".bold(),
            results.len() - failed,
            failed
        );
    }

    Ok(if failed == 0 { 0 } else { 1 })
}
