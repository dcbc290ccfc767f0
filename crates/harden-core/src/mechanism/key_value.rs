//! Key-value (registry) adapter

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::{MechanismAdapter, SurfaceId, WriteOutcome, registry_locator};
use crate::Result;
use crate::locator::{KeyPath, Locator};
use crate::model::{Mechanism, NativeValue, PolicyValue};
use crate::store::RegistryStore;

pub struct KeyValueAdapter {
    store: Box<dyn RegistryStore>,
}

impl KeyValueAdapter {
    pub fn new(store: Box<dyn RegistryStore>) -> Self {
        Self { store }
    }
}

/// Compare the stored value with the one about to be written.
///
/// Shared with the group-policy adapter, which stores the same native kinds.
pub(crate) fn plan_native_write(
    mechanism: Mechanism,
    target: &str,
    existing: Option<&NativeValue>,
    desired: &NativeValue,
) -> WriteOutcome {
    match existing {
        None => WriteOutcome::Created,
        Some(current) if current == desired => WriteOutcome::Unchanged,
        Some(current) => {
            if current.kind() != desired.kind() {
                warn!(
                    %mechanism,
                    locator = target,
                    existing = current.kind().reg_name(),
                    declared = desired.kind().reg_name(),
                    "Existing value has a different storage kind; rewriting with the declared type"
                );
            }
            WriteOutcome::Updated
        }
    }
}

impl MechanismAdapter for KeyValueAdapter {
    fn mechanism(&self) -> Mechanism {
        Mechanism::KeyValue
    }

    fn surface_for(&self, locator: &Locator) -> Result<SurfaceId> {
        let (path, _) = registry_locator(Mechanism::KeyValue, locator)?;
        Ok(SurfaceId::new(Mechanism::KeyValue, path.canonical()))
    }

    fn read(&self, locator: &Locator) -> Result<Option<PolicyValue>> {
        let (path, name) = registry_locator(Mechanism::KeyValue, locator)?;
        Ok(self
            .store
            .get_value(path, name)?
            .map(|value| value.to_policy_value()))
    }

    fn write(
        &mut self,
        locator: &Locator,
        value: &PolicyValue,
        dry_run: bool,
    ) -> Result<WriteOutcome> {
        let (path, name) = registry_locator(Mechanism::KeyValue, locator)?;
        let desired = NativeValue::encode(value);
        let existing = self.store.get_value(path, name)?;
        let target = locator.to_string();
        let outcome =
            plan_native_write(Mechanism::KeyValue, &target, existing.as_ref(), &desired);

        if dry_run {
            info!(
                locator = %target,
                kind = desired.kind().reg_name(),
                %value,
                planned = %outcome,
                "[dry-run] Would write value"
            );
            return Ok(WriteOutcome::Planned);
        }

        if outcome != WriteOutcome::Unchanged {
            self.store.set_value(path, name, &desired)?;
        }
        Ok(outcome)
    }

    fn export_surface(&self, surface: &SurfaceId, dest_dir: &Path, stem: &str) -> Result<PathBuf> {
        let key = KeyPath::parse(&surface.scope)?;
        let dest = dest_dir.join(format!("{}.{}", stem, self.store.artifact_extension()));
        self.store.export_key(&key, &dest)?;
        Ok(dest)
    }

    fn restore_surface(&mut self, surface: &SurfaceId, artifact: &Path) -> Result<()> {
        let key = KeyPath::parse(&surface.scope)?;
        self.store.import_key(&key, artifact)
    }
}
