//! End-to-end runs of the orchestrator against file-backed stores

use harden_core::manifest::MANIFEST_FILE;
use harden_core::orchestrator::REPORT_FILE;
use harden_core::{
    ApplyOutcome, Error, ExecutionMode, Locator, Mechanism, Orchestrator, PolicyValue,
    RecordingReboot, RollbackManifest, RunReport, RunState, VerifyOutcome, WriteOutcome,
};
use harden_test_utils::{TestHost, changes};
use pretty_assertions::assert_eq;

const KEY_A: &str = "HKLM\\Software\\Contoso\\A";
const KEY_B: &str = "HKLM\\Software\\Contoso\\B";
const UNLOADED: &str = "HKCC\\System\\Contoso";

fn run(host: &TestHost, set: harden_core::ChangeSet) -> RunReport {
    Orchestrator::new(set, host.options()).unwrap().run().unwrap()
}

#[test]
fn mixed_outcome_isolates_the_failing_change() {
    let host = TestHost::new();
    host.seed_dword(KEY_A, "Level", 0);
    host.seed_dword(KEY_B, "Level", 0);

    let report = run(
        &host,
        changes::change_set(vec![
            changes::dword("a", KEY_A, "Level", 1),
            changes::dword("broken", UNLOADED, "Level", 1),
            changes::dword("b", KEY_B, "Level", 2),
        ]),
    );

    assert_eq!(report.counts.applied, 2);
    assert_eq!(report.counts.failed, 1);
    assert_eq!(report.exit_status(), 1);
    assert_eq!(report.state, RunState::Done);
    assert_eq!(report.result("broken").unwrap().apply_outcome, ApplyOutcome::Failed);
    assert_eq!(host.read_registry(KEY_B, "Level"), Some(PolicyValue::Integer(2)));

    let manifest = RollbackManifest::load(report.manifest.as_ref().unwrap()).unwrap();
    let captured: Vec<_> = manifest
        .records()
        .iter()
        .filter(|r| r.success && r.artifact.as_ref().is_some_and(|a| a.exists()))
        .collect();
    assert_eq!(captured.len(), 2);
    assert_eq!(manifest.failed_count(), 1);
}

#[test]
fn external_change_between_apply_and_verify_fails_verification() {
    let host = TestHost::new();
    let mut orchestrator = Orchestrator::new(
        changes::change_set(vec![changes::dword("a", KEY_A, "Level", 1)]),
        host.options(),
    )
    .unwrap();

    while orchestrator.state() != RunState::Verify {
        orchestrator.step().unwrap();
    }
    assert_eq!(orchestrator.context().counts().applied, 1);
    orchestrator
        .adapters_mut()
        .get_mut(Mechanism::KeyValue)
        .write(
            &Locator::registry(KEY_A, "Level").unwrap(),
            &PolicyValue::Integer(7),
            false,
        )
        .unwrap();

    let report = orchestrator.run().unwrap();
    let result = report.result("a").unwrap();

    assert_eq!(result.apply_outcome, ApplyOutcome::Applied);
    assert_eq!(result.verify_outcome, VerifyOutcome::Fail);
    assert_eq!(result.expected.as_deref(), Some("1"));
    assert_eq!(result.actual.as_deref(), Some("7"));
    assert_eq!(report.counts.verified_fail, 1);
    assert_eq!(report.exit_status(), 0);
}

#[test]
fn second_run_never_creates() {
    let host = TestHost::new();

    let first = run(&host, changes::baseline());
    assert_eq!(first.counts.applied, 3);
    assert_eq!(first.counts.verified_pass, 3);

    let second = run(&host, changes::baseline());
    assert_eq!(second.counts.applied, 3);
    for result in &second.results {
        assert_ne!(result.write, Some(WriteOutcome::Created), "{}", result.policy_change_id);
        assert_eq!(result.verify_outcome, VerifyOutcome::Pass);
    }
}

#[test]
fn every_backup_precedes_the_first_write() {
    let host = TestHost::new();
    host.seed_dword(KEY_A, "Level", 0);

    let report = run(&host, changes::baseline());
    let manifest = RollbackManifest::load(report.manifest.as_ref().unwrap()).unwrap();
    let first_write = report
        .results
        .iter()
        .filter_map(|r| r.applied_at)
        .min()
        .unwrap();

    assert!(!manifest.is_empty());
    for record in manifest.records() {
        assert!(record.timestamp <= first_write, "{} backed up late", record.surface);
    }
}

#[test]
fn reboot_follows_applied_changes_only() {
    let host = TestHost::new();

    let failed_only = run(
        &host,
        changes::change_set(vec![
            changes::dword("a", KEY_A, "Level", 1),
            changes::dword("broken", UNLOADED, "Level", 1).with_reboot(true),
        ]),
    );
    assert!(!failed_only.reboot_required);

    let pending = run(
        &host,
        changes::change_set(vec![changes::dword("a", KEY_A, "Level", 2).with_reboot(true)]),
    );
    assert!(pending.reboot_required);
    assert!(pending.warnings.iter().any(|w| w.contains("reboot pending")));
}

#[test]
fn force_reboot_asks_the_handler() {
    let host = TestHost::new();
    let handler = RecordingReboot::new();
    let mut options = host.options();
    options.force_reboot = true;

    let report = Orchestrator::new(
        changes::change_set(vec![changes::dword("a", KEY_A, "Level", 1).with_reboot(true)]),
        options,
    )
    .unwrap()
    .with_reboot_handler(Box::new(handler.clone()))
    .run()
    .unwrap();

    assert!(report.reboot_required);
    assert_eq!(handler.requests(), 1);
}

#[test]
fn incomplete_backup_aborts_before_any_write() {
    let host = TestHost::new();
    host.seed_dword(KEY_A, "Level", 0);
    let mut options = host.options();
    options.abort_on_backup_failure = true;

    let err = Orchestrator::new(
        changes::change_set(vec![
            changes::dword("a", KEY_A, "Level", 1),
            changes::dword("broken", UNLOADED, "Level", 1),
        ]),
        options,
    )
    .unwrap()
    .run()
    .unwrap_err();

    match err {
        Error::BackupAborted { failed, manifest } => {
            assert_eq!(failed, 1);
            assert!(manifest.ends_with(MANIFEST_FILE));
        }
        other => panic!("expected BackupAborted, got {other:?}"),
    }
    assert_eq!(host.read_registry(KEY_A, "Level"), Some(PolicyValue::Integer(0)));

    let report: RunReport = serde_json::from_str(
        &std::fs::read_to_string(host.only_run_dir().join(REPORT_FILE)).unwrap(),
    )
    .unwrap();
    assert_eq!(report.state, RunState::Aborted);
    assert!(report.results.is_empty());
}

#[test]
fn dry_run_mutates_nothing() {
    let host = TestHost::new();
    host.seed_dword(KEY_A, "Level", 0);
    let mut options = host.options();
    options.dry_run = true;

    let report = Orchestrator::new(changes::baseline(), options).unwrap().run().unwrap();

    assert_eq!(report.counts.skipped, 3);
    assert_eq!(report.counts.verified_pass + report.counts.verified_fail, 0);
    assert!(report.manifest.is_none());
    assert!(
        report
            .results
            .iter()
            .all(|r| r.detail.starts_with("[dry-run] would set"))
    );
    assert_eq!(host.read_registry(KEY_A, "Level"), Some(PolicyValue::Integer(0)));
    assert_eq!(report.exit_status(), 0);
}

#[test]
fn render_mode_writes_a_procedure_instead_of_mutating() {
    let host = TestHost::new();
    let mut options = host.options();
    options.mode = ExecutionMode::Render;

    let report = Orchestrator::new(changes::baseline(), options).unwrap().run().unwrap();

    let script = std::fs::read_to_string(report.procedure.as_ref().unwrap()).unwrap();
    assert!(script.contains("RequireSecuritySignature"));
    assert!(script.contains("MinimumPasswordLength"));
    assert!(script.contains("LGPO.exe"));
    assert_eq!(
        host.read(
            Mechanism::KeyValue,
            &Locator::registry(
                "HKLM\\System\\CurrentControlSet\\Services\\LanmanWorkstation\\Parameters",
                "RequireSecuritySignature"
            )
            .unwrap()
        ),
        None
    );
}

#[test]
fn audit_stream_and_report_land_in_the_run_directory() {
    let host = TestHost::new();
    let report = run(&host, changes::baseline());

    let run_dir = host.only_run_dir();
    assert!(run_dir.ends_with(&report.run_id));
    assert!(run_dir.join(REPORT_FILE).exists());

    let events = harden_core::audit::read_events(&run_dir.join(harden_core::audit::AUDIT_FILE)).unwrap();
    assert!(events.iter().any(|e| e.level == harden_core::AuditLevel::Success
        && e.change_id.as_deref() == Some("min-password-length")));
    assert!(events.iter().all(|e| e.run_id == report.run_id));
}
