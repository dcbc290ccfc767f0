//! Post-apply verification
//!
//! A change is verified by reading it back through the mechanism that took
//! the write and comparing with the declared type's rules (see
//! [`values_match`]).

use tracing::{info, warn};

use crate::mechanism::MechanismSet;
use crate::model::{Mechanism, PolicyChange, PolicyValue, values_match};
use crate::report::{ChangeResult, VerifyOutcome};

/// Result of reading one change back
#[derive(Debug, Clone, PartialEq)]
pub struct Verification {
    pub outcome: VerifyOutcome,
    pub actual: Option<PolicyValue>,
    pub detail: String,
}

pub struct Verifier<'a> {
    adapters: &'a MechanismSet,
}

impl<'a> Verifier<'a> {
    pub fn new(adapters: &'a MechanismSet) -> Self {
        Self { adapters }
    }

    /// Read `change` back through `via` and compare.
    ///
    /// A read error counts as a failed verification.
    pub fn verify(&self, change: &PolicyChange, via: Mechanism) -> Verification {
        let expected = &change.expected_value;

        match self.adapters.get(via).read(&change.locator) {
            Ok(Some(actual)) if values_match(expected, &actual) => {
                info!(change = %change.id, %via, "Verification passed");
                Verification {
                    outcome: VerifyOutcome::Pass,
                    detail: format!("{} matches", actual),
                    actual: Some(actual),
                }
            }
            Ok(Some(actual)) => {
                warn!(
                    change = %change.id,
                    %via,
                    %expected,
                    %actual,
                    "Verification mismatch"
                );
                Verification {
                    outcome: VerifyOutcome::Fail,
                    detail: format!("expected {}, found {}", expected, actual),
                    actual: Some(actual),
                }
            }
            Ok(None) => {
                warn!(change = %change.id, %via, "Verification failed: value not present");
                Verification {
                    outcome: VerifyOutcome::Fail,
                    detail: format!("expected {}, value not present", expected),
                    actual: None,
                }
            }
            Err(e) => {
                warn!(change = %change.id, %via, error = %e, "Verification read failed");
                Verification {
                    outcome: VerifyOutcome::Fail,
                    detail: format!("read failed: {}", e),
                    actual: None,
                }
            }
        }
    }

    /// Record a verification on a change result.
    pub fn verify_into(&self, change: &PolicyChange, result: &mut ChangeResult) {
        let via = result.applied_via.unwrap_or(change.mechanism);
        let verification = self.verify(change, via);
        result.verify_outcome = verification.outcome;
        result.actual = verification.actual.map(|v| v.to_string());
        if verification.outcome == VerifyOutcome::Fail {
            result.warnings.push(format!("{}: {}", change.id, verification.detail));
        }
    }
}

/// Verification-only pass over a whole change set, without backup or writes.
///
/// Each change is read through its primary mechanism, then its secondary if
/// the primary does not pass.
pub fn verify_all<'c>(
    changes: impl IntoIterator<Item = &'c PolicyChange>,
    adapters: &MechanismSet,
) -> Vec<ChangeResult> {
    let verifier = Verifier::new(adapters);
    changes
        .into_iter()
        .map(|change| {
            let mut result = ChangeResult::pending(change);
            let mut last = None;
            for via in change.mechanisms() {
                let verification = verifier.verify(change, via);
                let passed = verification.outcome == VerifyOutcome::Pass;
                last = Some((via, verification));
                if passed {
                    break;
                }
            }
            if let Some((via, verification)) = last {
                result.applied_via = Some(via);
                result.verify_outcome = verification.outcome;
                result.actual = verification.actual.map(|v| v.to_string());
                result.detail = verification.detail;
            }
            result
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreOptions;
    use crate::locator::Locator;

    fn setup(dir: &tempfile::TempDir) -> MechanismSet {
        MechanismSet::from_stores(&StoreOptions::files_in(dir.path()))
    }

    #[test]
    fn pass_fail_and_absent() {
        let dir = tempfile::tempdir().unwrap();
        let mut set = setup(&dir);
        let locator = Locator::registry("HKLM\\Software\\Test", "Level").unwrap();
        set.get_mut(Mechanism::KeyValue)
            .write(&locator, &PolicyValue::Integer(2), false)
            .unwrap();

        let matching = PolicyChange::new("a", Mechanism::KeyValue, locator.clone(), PolicyValue::Integer(2));
        let mismatched = PolicyChange::new("b", Mechanism::KeyValue, locator, PolicyValue::Integer(3));
        let absent = PolicyChange::new(
            "c",
            Mechanism::KeyValue,
            Locator::registry("HKLM\\Software\\Test", "Missing").unwrap(),
            PolicyValue::Integer(1),
        );

        let verifier = Verifier::new(&set);
        assert_eq!(verifier.verify(&matching, Mechanism::KeyValue).outcome, VerifyOutcome::Pass);
        let fail = verifier.verify(&mismatched, Mechanism::KeyValue);
        assert_eq!(fail.outcome, VerifyOutcome::Fail);
        assert_eq!(fail.detail, "expected 3, found 2");
        assert_eq!(verifier.verify(&absent, Mechanism::KeyValue).outcome, VerifyOutcome::Fail);
    }

    #[test]
    fn read_errors_fail_verification() {
        let dir = tempfile::tempdir().unwrap();
        let set = setup(&dir);
        let change = PolicyChange::new(
            "a",
            Mechanism::KeyValue,
            Locator::registry("HKCC\\System\\Test", "V").unwrap(),
            PolicyValue::Integer(1),
        );

        let verification = Verifier::new(&set).verify(&change, Mechanism::KeyValue);

        assert_eq!(verification.outcome, VerifyOutcome::Fail);
        assert!(verification.detail.starts_with("read failed"));
    }

    #[test]
    fn security_template_text_verifies_as_integer() {
        let dir = tempfile::tempdir().unwrap();
        let mut set = setup(&dir);
        let locator = Locator::template("System Access", "MinimumPasswordLength");
        set.get_mut(Mechanism::SecurityTemplate)
            .write(&locator, &PolicyValue::Integer(14), false)
            .unwrap();
        let change = PolicyChange::new("len", Mechanism::SecurityTemplate, locator, PolicyValue::Integer(14));

        let results = verify_all([&change], &set);

        assert_eq!(results[0].verify_outcome, VerifyOutcome::Pass);
    }
}
