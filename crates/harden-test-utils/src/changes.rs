//! Change fixtures.

use harden_core::{ChangeSet, Locator, Mechanism, PolicyChange, PolicyValue};

/// Key-value integer change.
pub fn dword(id: &str, key: &str, name: &str, value: i64) -> PolicyChange {
    registry(id, Mechanism::KeyValue, key, name, PolicyValue::Integer(value))
}

/// Key-value string change.
pub fn string(id: &str, key: &str, name: &str, value: &str) -> PolicyChange {
    registry(id, Mechanism::KeyValue, key, name, PolicyValue::String(value.to_string()))
}

/// Group-policy integer change.
pub fn policy(id: &str, key: &str, name: &str, value: i64) -> PolicyChange {
    registry(id, Mechanism::GroupPolicy, key, name, PolicyValue::Integer(value))
}

/// Security-template integer change.
pub fn template(id: &str, section: &str, key: &str, value: i64) -> PolicyChange {
    PolicyChange::new(
        id,
        Mechanism::SecurityTemplate,
        Locator::template(section, key),
        PolicyValue::Integer(value),
    )
}

/// Change against a registry-style locator.
///
/// Panics on an invalid key path, which is a broken fixture.
pub fn registry(id: &str, mechanism: Mechanism, key: &str, name: &str, value: PolicyValue) -> PolicyChange {
    let locator = Locator::registry(key, name)
        .unwrap_or_else(|e| panic!("fixture key path {key:?} is invalid: {e}"));
    PolicyChange::new(id, mechanism, locator, value)
}

/// Validated change set.
pub fn change_set(changes: Vec<PolicyChange>) -> ChangeSet {
    ChangeSet::new(changes).unwrap_or_else(|e| panic!("fixture change set is invalid: {e}"))
}

/// One change per mechanism, all expected to apply on a fresh [`crate::TestHost`].
pub fn baseline() -> ChangeSet {
    change_set(vec![
        dword(
            "smb-signing",
            "HKLM\\System\\CurrentControlSet\\Services\\LanmanWorkstation\\Parameters",
            "RequireSecuritySignature",
            1,
        ),
        template("min-password-length", "System Access", "MinimumPasswordLength", 14),
        policy(
            "no-autorun",
            "HKLM\\Software\\Policies\\Microsoft\\Windows\\Explorer",
            "NoAutoplayfornonVolume",
            1,
        ),
    ])
    .with_name("baseline")
}
