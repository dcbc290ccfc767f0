//! Applying changes through their mechanisms
//!
//! Each change is written through its primary mechanism and, when it declares
//! one, best-effort through its secondary. Failures stay with the change that
//! caused them; the applier itself never fails.

use chrono::Utc;
use tracing::{error, info, warn};

use crate::mechanism::{MechanismSet, WriteOutcome};
use crate::model::{Mechanism, PolicyChange};
use crate::report::{ApplyOutcome, ChangeResult};

pub struct Applier<'a> {
    adapters: &'a mut MechanismSet,
    dry_run: bool,
}

impl<'a> Applier<'a> {
    pub fn new(adapters: &'a mut MechanismSet, dry_run: bool) -> Self {
        Self { adapters, dry_run }
    }

    /// Apply one change and describe what happened.
    pub fn apply(&mut self, change: &PolicyChange) -> ChangeResult {
        let mut result = ChangeResult::pending(change);
        let primary = change.mechanism;

        let primary_write = self.adapters.get_mut(primary).write(
            &change.locator,
            &change.expected_value,
            self.dry_run,
        );

        match primary_write {
            Ok(outcome) => {
                self.record_write(&mut result, change, primary, outcome);

                if let Some(secondary) = change.secondary {
                    match self.adapters.get_mut(secondary).write(
                        &change.locator,
                        &change.expected_value,
                        self.dry_run,
                    ) {
                        Ok(outcome) => result
                            .notes
                            .push(format!("also written via {} ({})", secondary, outcome)),
                        Err(e) => {
                            info!(
                                change = %change.id,
                                %secondary,
                                error = %e,
                                "Secondary mechanism unavailable"
                            );
                            result
                                .notes
                                .push(format!("secondary mechanism {} unavailable: {}", secondary, e));
                        }
                    }
                }
            }
            Err(primary_err) => {
                let Some(secondary) = change.secondary else {
                    error!(change = %change.id, %primary, error = %primary_err, "Apply failed");
                    result.apply_outcome = ApplyOutcome::Failed;
                    result.detail = primary_err.to_string();
                    return result;
                };

                match self.adapters.get_mut(secondary).write(
                    &change.locator,
                    &change.expected_value,
                    self.dry_run,
                ) {
                    Ok(outcome) => {
                        let warning = format!(
                            "{}: primary mechanism {} failed ({}); applied via {}",
                            change.id, primary, primary_err, secondary
                        );
                        warn!(
                            change = %change.id,
                            %primary,
                            %secondary,
                            error = %primary_err,
                            "Applied via secondary mechanism"
                        );
                        result.warnings.push(warning);
                        self.record_write(&mut result, change, secondary, outcome);
                    }
                    Err(secondary_err) => {
                        error!(
                            change = %change.id,
                            %primary,
                            %secondary,
                            primary_error = %primary_err,
                            secondary_error = %secondary_err,
                            "Apply failed on every mechanism"
                        );
                        result.apply_outcome = ApplyOutcome::Failed;
                        result.detail = format!(
                            "{}: {}; {}: {}",
                            primary, primary_err, secondary, secondary_err
                        );
                    }
                }
            }
        }

        result
    }

    fn record_write(
        &self,
        result: &mut ChangeResult,
        change: &PolicyChange,
        via: Mechanism,
        outcome: WriteOutcome,
    ) {
        result.applied_via = Some(via);
        result.write = Some(outcome);

        if outcome == WriteOutcome::Planned {
            result.apply_outcome = ApplyOutcome::Skipped;
            let prefix = if self.dry_run { "[dry-run] would set" } else { "[render] set" };
            result.detail = format!(
                "{} {} = {} via {}",
                prefix, change.locator, change.expected_value, via
            );
            return;
        }

        result.apply_outcome = ApplyOutcome::Applied;
        result.applied_at = Some(Utc::now());
        result.detail = format!("{} via {}", outcome, via);
        info!(change = %change.id, %via, write = %outcome, "Change applied");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreOptions;
    use crate::locator::Locator;
    use crate::model::PolicyValue;

    fn adapters(dir: &tempfile::TempDir) -> MechanismSet {
        MechanismSet::from_stores(&StoreOptions::files_in(dir.path()))
    }

    fn change(key: &str, mechanism: Mechanism) -> PolicyChange {
        PolicyChange::new(
            "c1",
            mechanism,
            Locator::registry(key, "Value").unwrap(),
            PolicyValue::Integer(1),
        )
    }

    #[test]
    fn primary_success_applies() {
        let dir = tempfile::tempdir().unwrap();
        let mut set = adapters(&dir);
        let result = Applier::new(&mut set, false)
            .apply(&change("HKLM\\Software\\Test", Mechanism::KeyValue));

        assert_eq!(result.apply_outcome, ApplyOutcome::Applied);
        assert_eq!(result.write, Some(WriteOutcome::Created));
        assert_eq!(result.applied_via, Some(Mechanism::KeyValue));
        assert!(result.applied_at.is_some());
    }

    #[test]
    fn secondary_failure_is_only_a_note() {
        let dir = tempfile::tempdir().unwrap();
        let mut set = adapters(&dir);
        // HKU has no policy scope, so the group-policy secondary cannot take it
        let change = change("HKU\\.DEFAULT\\Software\\Test", Mechanism::KeyValue)
            .with_secondary(Mechanism::GroupPolicy);

        let result = Applier::new(&mut set, false).apply(&change);

        assert_eq!(result.apply_outcome, ApplyOutcome::Applied);
        assert!(result.warnings.is_empty());
        assert_eq!(result.notes.len(), 1);
        assert!(result.notes[0].contains("unavailable"));
    }

    #[test]
    fn primary_failure_falls_back_to_secondary_with_warning() {
        let dir = tempfile::tempdir().unwrap();
        let mut set = adapters(&dir);
        // Group policy cannot address HKU; the key-value secondary can
        let change = change("HKU\\.DEFAULT\\Software\\Test", Mechanism::GroupPolicy)
            .with_secondary(Mechanism::KeyValue);

        let result = Applier::new(&mut set, false).apply(&change);

        assert_eq!(result.apply_outcome, ApplyOutcome::Applied);
        assert_eq!(result.applied_via, Some(Mechanism::KeyValue));
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn dry_run_is_skipped_with_plan() {
        let dir = tempfile::tempdir().unwrap();
        let mut set = adapters(&dir);
        let result = Applier::new(&mut set, true)
            .apply(&change("HKLM\\Software\\Test", Mechanism::KeyValue));

        assert_eq!(result.apply_outcome, ApplyOutcome::Skipped);
        assert_eq!(result.write, Some(WriteOutcome::Planned));
        assert!(result.detail.starts_with("[dry-run] would set"));
    }

    #[test]
    fn unmounted_hive_fails_the_change() {
        let dir = tempfile::tempdir().unwrap();
        let mut set = adapters(&dir);
        let result = Applier::new(&mut set, false)
            .apply(&change("HKCC\\System\\Test", Mechanism::KeyValue));

        assert_eq!(result.apply_outcome, ApplyOutcome::Failed);
        assert!(result.detail.contains("not loaded"));
    }
}
