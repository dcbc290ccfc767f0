//! The apply command

use std::fs;

use colored::Colorize;
use harden_core::{
    ApplyOutcome, ChangeSet, ExecutionMode, Orchestrator, RunOptions, RunReport, VerifyOutcome,
};

use crate::cli::ApplyArgs;
use crate::error::{CliError, Result};

/// Command-line flags take precedence over the configuration file.
pub fn merge_flags(options: &mut RunOptions, args: &ApplyArgs) {
    options.dry_run |= args.dry_run;
    options.create_backup &= !args.no_backup;
    options.abort_on_backup_failure |= args.abort_on_backup_failure;
    options.skip_verification |= args.skip_verification;
    options.force_reboot |= args.force_reboot;
    if let Some(location) = &args.backup_location {
        options.backup_location = location.clone();
    }
    if let Some(mode) = args.mode {
        options.mode = mode;
    }
    if args.render_to.is_some() {
        options.mode = ExecutionMode::Render;
    }
}

pub fn run_apply(mut options: RunOptions, args: &ApplyArgs) -> Result<i32> {
    merge_flags(&mut options, args);
    let changes = ChangeSet::load(&args.changes)?;

    if !args.json {
        println!(
            "{} Applying {} change(s) from {}{}",
            "=>".blue().bold(),
            changes.len(),
            args.changes.display().to_string().cyan(),
            if options.dry_run { " (dry-run)".yellow().to_string() } else { String::new() }
        );
    }

    let report = Orchestrator::new(changes, options)?.run()?;

    if let Some(path) = &args.report {
        report.save(path)?;
    }
    if let Some(target) = &args.render_to {
        let procedure = report
            .procedure
            .as_ref()
            .ok_or_else(|| CliError::user("run produced no procedure"))?;
        fs::copy(procedure, target)?;
    }

    if args.json {
        println!("{}", report.to_json()?);
    } else {
        print_report(&report);
        if let Some(target) = &args.render_to {
            println!("Procedure written to {}", target.display().to_string().cyan());
        }
    }
    Ok(report.exit_status())
}

fn print_report(report: &RunReport) {
    println!();
    for result in &report.results {
        let tag = match result.apply_outcome {
            ApplyOutcome::Applied => "APPLIED".green().bold(),
            ApplyOutcome::Failed => "FAILED".red().bold(),
            ApplyOutcome::Skipped => "SKIPPED".yellow().bold(),
        };
        let verify = match result.verify_outcome {
            VerifyOutcome::Pass => " verified".green().to_string(),
            VerifyOutcome::Fail => format!(
                " verify failed (expected {}, actual {})",
                result.expected.as_deref().unwrap_or("?"),
                result.actual.as_deref().unwrap_or("<absent>")
            )
            .red()
            .to_string(),
            VerifyOutcome::NotRun => String::new(),
        };
        println!(
            "   {:<8} {} {}{}",
            tag,
            result.policy_change_id.cyan(),
            result.detail.dimmed(),
            verify
        );
        for note in &result.notes {
            println!("            {} {}", "-".dimmed(), note.dimmed());
        }
    }

    let counts = &report.counts;
    println!();
    println!(
        "{} {} applied, {} failed, {} skipped; {} verified, {} verification failure(s)",
        "Summary:".bold(),
        counts.applied,
        counts.failed,
        counts.skipped,
        counts.verified_pass,
        counts.verified_fail
    );
    for warning in &report.warnings {
        println!("   {} {}", "!".yellow(), warning);
    }
    if let Some(manifest) = &report.manifest {
        println!("Rollback manifest: {}", manifest.display().to_string().cyan());
    }
    if let Some(procedure) = &report.procedure {
        println!("Procedure: {}", procedure.display().to_string().cyan());
    }
    if report.reboot_required {
        println!("{} A restart is required to complete this run.", "REBOOT".yellow().bold());
    }
}
