//! Manifest round trips: apply a baseline, then reverse it

use std::fs;

use harden_core::manifest::MANIFEST_VERSION;
use harden_core::model::values_match;
use harden_core::reverse::SurfaceReversal;
use harden_core::{
    Locator, Mechanism, Orchestrator, PolicyValue, RollbackManifest, reversal_script,
    reverse_manifest,
};
use harden_test_utils::{TestHost, changes};
use pretty_assertions::assert_eq;

const SMB_KEY: &str = "HKLM\\System\\CurrentControlSet\\Services\\LanmanWorkstation\\Parameters";
const AUTORUN_KEY: &str = "HKLM\\Software\\Policies\\Microsoft\\Windows\\Explorer";

fn seed_pre_run_state(host: &TestHost) {
    host.seed_dword(SMB_KEY, "RequireSecuritySignature", 0);
    host.seed(
        Mechanism::SecurityTemplate,
        &Locator::template("System Access", "MinimumPasswordLength"),
        PolicyValue::Integer(8),
    );
    host.seed(
        Mechanism::GroupPolicy,
        &Locator::registry(AUTORUN_KEY, "NoAutoplayfornonVolume").unwrap(),
        PolicyValue::Integer(0),
    );
}

#[test]
fn reversal_restores_pre_run_values() {
    let host = TestHost::new();
    seed_pre_run_state(&host);

    let report = Orchestrator::new(changes::baseline(), host.options())
        .unwrap()
        .run()
        .unwrap();
    assert_eq!(report.counts.applied, 3);
    assert_eq!(
        host.read_registry(SMB_KEY, "RequireSecuritySignature"),
        Some(PolicyValue::Integer(1))
    );

    let manifest_path = report.manifest.unwrap();
    let reversal = reverse_manifest(&manifest_path, &mut host.adapters()).unwrap();

    assert!(reversal.is_clean(), "{reversal:?}");
    assert_eq!(reversal.restored(), 3);
    assert_eq!(
        host.read_registry(SMB_KEY, "RequireSecuritySignature"),
        Some(PolicyValue::Integer(0))
    );
    let password = host
        .read(
            Mechanism::SecurityTemplate,
            &Locator::template("System Access", "MinimumPasswordLength"),
        )
        .unwrap();
    assert!(values_match(&PolicyValue::Integer(8), &password), "{password}");
    assert_eq!(
        host.read(
            Mechanism::GroupPolicy,
            &Locator::registry(AUTORUN_KEY, "NoAutoplayfornonVolume").unwrap()
        ),
        Some(PolicyValue::Integer(0))
    );
}

#[test]
fn reversal_removes_template_settings_the_run_added() {
    let host = TestHost::new();
    let history = Locator::template("System Access", "PasswordHistorySize");
    host.seed(
        Mechanism::SecurityTemplate,
        &Locator::template("System Access", "MinimumPasswordLength"),
        PolicyValue::Integer(8),
    );

    let report = Orchestrator::new(
        changes::change_set(vec![changes::template(
            "password-history",
            "System Access",
            "PasswordHistorySize",
            24,
        )]),
        host.options(),
    )
    .unwrap()
    .run()
    .unwrap();
    assert_eq!(report.counts.applied, 1);

    let reversal = reverse_manifest(report.manifest.as_ref().unwrap(), &mut host.adapters()).unwrap();

    assert_eq!(reversal.restored(), 1);
    assert_eq!(host.read(Mechanism::SecurityTemplate, &history), None);
    let length = host
        .read(
            Mechanism::SecurityTemplate,
            &Locator::template("System Access", "MinimumPasswordLength"),
        )
        .unwrap();
    assert!(values_match(&PolicyValue::Integer(8), &length), "{length}");
}

#[test]
fn surfaces_created_by_the_run_are_skipped_on_reversal() {
    let host = TestHost::new();

    let report = Orchestrator::new(
        changes::change_set(vec![changes::dword("new", "HKLM\\Software\\Fresh", "Level", 1)]),
        host.options(),
    )
    .unwrap()
    .run()
    .unwrap();

    let reversal = reverse_manifest(report.manifest.as_ref().unwrap(), &mut host.adapters()).unwrap();

    assert_eq!(reversal.skipped(), 1);
    assert!(matches!(reversal.entries[0].status, SurfaceReversal::Skipped { .. }));
    assert_eq!(
        host.read_registry("HKLM\\Software\\Fresh", "Level"),
        Some(PolicyValue::Integer(1))
    );
}

#[test]
fn rendered_reversal_covers_every_captured_surface() {
    let host = TestHost::new();
    seed_pre_run_state(&host);
    let report = Orchestrator::new(changes::baseline(), host.options())
        .unwrap()
        .run()
        .unwrap();
    let manifest_path = report.manifest.unwrap();
    let manifest = RollbackManifest::load(&manifest_path).unwrap();

    let script = reversal_script(&manifest, &manifest_path);

    assert_eq!(script.matches("} catch {").count(), 3);
    assert_eq!(script.matches("Get-FileHash").count(), 3);
    assert!(script.contains("LGPO.exe /t"));
}

#[test]
fn schema_one_manifest_is_migrated_and_reversible() {
    let host = TestHost::new();
    let backup_dir = host.root().join("legacy");
    fs::create_dir_all(&backup_dir).unwrap();

    // Take a schema 2 backup, then describe the same artifacts the old way
    host.seed_dword("HKLM\\Software\\Legacy", "Level", 4);
    let report = Orchestrator::new(
        changes::change_set(vec![changes::dword("a", "HKLM\\Software\\Legacy", "Level", 9)]),
        host.options(),
    )
    .unwrap()
    .run()
    .unwrap();
    let current = RollbackManifest::load(report.manifest.as_ref().unwrap()).unwrap();
    let artifact = current.records()[0].artifact.clone().unwrap();
    let copied = backup_dir.join("reg_1.json");
    fs::copy(&artifact, &copied).unwrap();

    let legacy_path = backup_dir.join("manifest.json");
    fs::write(
        &legacy_path,
        r#"{
            "timestamp": "2024-03-01T10:00:00Z",
            "hostname": "WS-01",
            "backups": { "registry": "reg_1.json" }
        }"#,
    )
    .unwrap();

    let migrated = RollbackManifest::load(&legacy_path).unwrap();
    assert_eq!(migrated.version(), MANIFEST_VERSION);
    assert_eq!(migrated.host.hostname, "WS-01");
    assert_eq!(migrated.records().len(), 1);
    assert_eq!(migrated.records()[0].mechanism(), Mechanism::KeyValue);

    let reversal = reverse_manifest(&legacy_path, &mut host.adapters()).unwrap();
    assert!(reversal.is_clean(), "{reversal:?}");
    assert_eq!(
        host.read_registry("HKLM\\Software\\Legacy", "Level"),
        Some(PolicyValue::Integer(4))
    );
}
