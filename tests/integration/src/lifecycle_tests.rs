//! Full backup, apply, verify and rollback cycles across the workspace crates

use harden_core::model::values_match;
use harden_core::reverse::SurfaceReversal;
use harden_core::{
    Locator, Mechanism, MechanismSet, Orchestrator, PolicyValue, RunOptions, RunReport,
    VerifyOutcome, reverse_manifest, verify_all,
};
use harden_test_utils::{TestHost, changes};
use pretty_assertions::assert_eq;

const SMB_KEY: &str = "HKLM\\System\\CurrentControlSet\\Services\\LanmanWorkstation\\Parameters";
const AUTORUN_KEY: &str = "HKLM\\Software\\Policies\\Microsoft\\Windows\\Explorer";

fn password_length() -> Locator {
    Locator::template("System Access", "MinimumPasswordLength")
}

fn autorun() -> Locator {
    Locator::registry(AUTORUN_KEY, "NoAutoplayfornonVolume").unwrap()
}

fn assert_template_length(host: &TestHost, expected: i64) {
    let actual = host.read(Mechanism::SecurityTemplate, &password_length()).unwrap();
    assert!(values_match(&PolicyValue::Integer(expected), &actual), "{actual}");
}

fn seed_pre_run_state(host: &TestHost) {
    host.seed_dword(SMB_KEY, "RequireSecuritySignature", 0);
    host.seed(Mechanism::SecurityTemplate, &password_length(), PolicyValue::Integer(8));
    host.seed(Mechanism::GroupPolicy, &autorun(), PolicyValue::Integer(0));
}

fn run(host: &TestHost, options: RunOptions, set: harden_core::ChangeSet) -> RunReport {
    Orchestrator::new(set, options).unwrap().run().unwrap()
}

#[test]
fn apply_then_rollback_returns_every_surface() {
    let host = TestHost::new();
    seed_pre_run_state(&host);

    let report = run(&host, host.options(), changes::baseline());
    assert_eq!(report.counts.applied, 3);
    assert_eq!(report.counts.verified_pass, 3);
    assert_template_length(&host, 14);

    let mut adapters = host.adapters();
    let reversal = reverse_manifest(report.manifest.as_ref().unwrap(), &mut adapters).unwrap();
    assert!(reversal.is_clean(), "{reversal}");
    assert_eq!(reversal.restored(), 3);

    assert_eq!(
        host.read_registry(SMB_KEY, "RequireSecuritySignature"),
        Some(PolicyValue::Integer(0))
    );
    assert_template_length(&host, 8);
    assert_eq!(host.read(Mechanism::GroupPolicy, &autorun()), Some(PolicyValue::Integer(0)));

    let recheck = verify_all(changes::baseline().iter(), &host.adapters());
    assert!(recheck.iter().all(|r| r.verify_outcome == VerifyOutcome::Fail));
}

#[test]
fn successive_runs_unwind_in_reverse_order() {
    let host = TestHost::new();
    let key = "HKLM\\Software\\Contoso\\Chain";
    host.seed_dword(key, "Level", 0);

    let first = run(
        &host,
        host.options(),
        changes::change_set(vec![changes::dword("level", key, "Level", 1)]),
    );
    let second = run(
        &host,
        host.options(),
        changes::change_set(vec![changes::dword("level", key, "Level", 2)]),
    );
    assert_ne!(first.run_id, second.run_id);

    let mut adapters: MechanismSet = host.adapters();
    reverse_manifest(second.manifest.as_ref().unwrap(), &mut adapters).unwrap();
    assert_eq!(host.read_registry(key, "Level"), Some(PolicyValue::Integer(1)));

    reverse_manifest(first.manifest.as_ref().unwrap(), &mut adapters).unwrap();
    assert_eq!(host.read_registry(key, "Level"), Some(PolicyValue::Integer(0)));
}

#[test]
fn tampered_artifact_is_refused() {
    let host = TestHost::new();
    host.seed_dword(SMB_KEY, "RequireSecuritySignature", 0);
    let report = run(
        &host,
        host.options(),
        changes::change_set(vec![changes::dword(
            "smb-signing",
            SMB_KEY,
            "RequireSecuritySignature",
            1,
        )]),
    );

    let manifest_path = report.manifest.clone().unwrap();
    let manifest = harden_core::RollbackManifest::load(&manifest_path).unwrap();
    let artifact = manifest.records()[0].artifact.clone().unwrap();
    harden_fs::write_text(&artifact, "{}").unwrap();

    let reversal = reverse_manifest(&manifest_path, &mut host.adapters()).unwrap();

    assert_eq!(reversal.failed(), 1);
    match &reversal.entries[0].status {
        SurfaceReversal::Failed { error } => assert!(error.contains("checksum mismatch"), "{error}"),
        other => panic!("expected a failed reversal, got {other:?}"),
    }
    assert_eq!(
        host.read_registry(SMB_KEY, "RequireSecuritySignature"),
        Some(PolicyValue::Integer(1))
    );
}

#[test]
fn configuration_file_drives_a_run() {
    let host = TestHost::new();
    let config = host.write_config("skip_verification = true");

    let options = RunOptions::discover(Some(&config)).unwrap();
    assert!(options.skip_verification);
    assert_eq!(options.backup_location, host.backup_dir());

    let report = run(&host, options, changes::baseline());

    assert_eq!(report.counts.applied, 3);
    assert!(
        report
            .results
            .iter()
            .all(|r| r.verify_outcome == VerifyOutcome::NotRun)
    );
    assert!(host.only_run_dir().starts_with(host.backup_dir()));
}
