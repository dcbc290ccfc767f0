//! Operator scenarios that span backup, secondary mechanisms and reporting

use harden_core::audit::{AUDIT_FILE, read_events};
use harden_core::orchestrator::REPORT_FILE;
use harden_core::reverse::SurfaceReversal;
use harden_core::{
    ApplyOutcome, AuditLevel, Mechanism, Orchestrator, PolicyValue, RollbackManifest, RunReport,
    VerifyOutcome, reverse_manifest,
};
use harden_test_utils::{TestHost, changes};
use pretty_assertions::assert_eq;

const USERS_KEY: &str = "HKU\\.DEFAULT\\Software\\Contoso";

#[test]
fn secondary_mechanism_carries_a_change_its_primary_cannot() {
    let host = TestHost::new();
    host.seed_dword(USERS_KEY, "Level", 0);
    let change = changes::registry(
        "users-level",
        Mechanism::GroupPolicy,
        USERS_KEY,
        "Level",
        PolicyValue::Integer(1),
    )
    .with_secondary(Mechanism::KeyValue);

    let report = Orchestrator::new(changes::change_set(vec![change]), host.options())
        .unwrap()
        .run()
        .unwrap();
    let result = report.result("users-level").unwrap();

    assert_eq!(result.apply_outcome, ApplyOutcome::Applied);
    assert_eq!(result.applied_via, Some(Mechanism::KeyValue));
    assert_eq!(result.verify_outcome, VerifyOutcome::Pass);
    assert!(report.warnings.iter().any(|w| w.contains("applied via key_value")));
    assert_eq!(report.exit_status(), 0);

    // Group policy has no scope for HKU, so only the key-value surface is captured
    let manifest = RollbackManifest::load(report.manifest.as_ref().unwrap()).unwrap();
    assert_eq!(manifest.records().len(), 1);
    assert_eq!(manifest.records()[0].mechanism(), Mechanism::KeyValue);

    let reversal = reverse_manifest(report.manifest.as_ref().unwrap(), &mut host.adapters()).unwrap();
    assert!(matches!(
        reversal.entries[0].status,
        SurfaceReversal::Restored { .. }
    ));
    assert_eq!(host.read_registry(USERS_KEY, "Level"), Some(PolicyValue::Integer(0)));
}

#[test]
fn saved_report_matches_the_returned_one() {
    let host = TestHost::new();
    let report = Orchestrator::new(changes::baseline(), host.options())
        .unwrap()
        .run()
        .unwrap();

    let saved: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(host.only_run_dir().join(REPORT_FILE)).unwrap(),
    )
    .unwrap();
    let reloaded: RunReport = serde_json::from_value(saved.clone()).unwrap();

    assert_eq!(saved, serde_json::to_value(&report).unwrap());
    assert_eq!(reloaded.counts, report.counts);
}

#[test]
fn dry_run_still_leaves_an_audit_trail() {
    let host = TestHost::new();
    let mut options = host.options();
    options.dry_run = true;

    let report = Orchestrator::new(changes::baseline(), options).unwrap().run().unwrap();

    let run_dir = host.only_run_dir();
    let events = read_events(&run_dir.join(AUDIT_FILE)).unwrap();
    assert!(!events.is_empty());
    assert!(events.iter().all(|e| e.run_id == report.run_id));
    assert!(!events.iter().any(|e| e.level == AuditLevel::Error));
    assert!(report.manifest.is_none());
    assert!(!host.state_dir().join("registry.json").exists());
}
