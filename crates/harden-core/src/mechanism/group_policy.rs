//! Group-policy adapter
//!
//! Reads export the owning scope into a staging descriptor; writes stage a
//! one-record descriptor and import it.

use std::path::{Path, PathBuf};

use harden_fs::StagingFile;
use tracing::info;

use super::key_value::plan_native_write;
use super::{MechanismAdapter, SurfaceId, WriteOutcome, registry_locator};
use crate::locator::{KeyPath, Locator};
use crate::model::{Mechanism, NativeValue, PolicyValue};
use crate::store::{PolicyDocument, PolicyEntry, PolicyScope, PolicyStore};
use crate::{Error, Result};

pub struct GroupPolicyAdapter {
    store: Box<dyn PolicyStore>,
}

impl GroupPolicyAdapter {
    pub fn new(store: Box<dyn PolicyStore>) -> Self {
        Self { store }
    }

    fn scope_of(locator: &Locator, path: &KeyPath) -> Result<PolicyScope> {
        PolicyScope::from_key(path).ok_or_else(|| Error::LocatorMismatch {
            mechanism: Mechanism::GroupPolicy,
            locator: locator.to_string(),
        })
    }

    fn surface_scope(surface: &SurfaceId) -> Result<PolicyScope> {
        PolicyScope::from_tag(&surface.scope).ok_or_else(|| Error::ManifestCorrupt {
            message: format!("unknown group policy scope '{}'", surface.scope),
        })
    }

    fn current(&self, scope: PolicyScope, path: &KeyPath, name: &str) -> Result<Option<NativeValue>> {
        let staging = StagingFile::new("harden-lgpo-", ".txt")?;
        self.store.export(scope, staging.path())?;
        let document = PolicyDocument::load(staging.path())?;
        Ok(document.get(scope, &path.subkey(), name).cloned())
    }
}

impl MechanismAdapter for GroupPolicyAdapter {
    fn mechanism(&self) -> Mechanism {
        Mechanism::GroupPolicy
    }

    fn surface_for(&self, locator: &Locator) -> Result<SurfaceId> {
        let (path, _) = registry_locator(Mechanism::GroupPolicy, locator)?;
        let scope = Self::scope_of(locator, path)?;
        Ok(SurfaceId::new(Mechanism::GroupPolicy, scope.as_str()))
    }

    fn read(&self, locator: &Locator) -> Result<Option<PolicyValue>> {
        let (path, name) = registry_locator(Mechanism::GroupPolicy, locator)?;
        let scope = Self::scope_of(locator, path)?;
        Ok(self
            .current(scope, path, name)?
            .map(|value| value.to_policy_value()))
    }

    fn write(
        &mut self,
        locator: &Locator,
        value: &PolicyValue,
        dry_run: bool,
    ) -> Result<WriteOutcome> {
        let (path, name) = registry_locator(Mechanism::GroupPolicy, locator)?;
        let scope = Self::scope_of(locator, path)?;
        let desired = NativeValue::encode(value);
        let existing = self.current(scope, path, name)?;
        let target = locator.to_string();
        let outcome =
            plan_native_write(Mechanism::GroupPolicy, &target, existing.as_ref(), &desired);

        if dry_run {
            info!(
                locator = %target,
                %scope,
                %value,
                planned = %outcome,
                "[dry-run] Would import group policy record"
            );
            return Ok(WriteOutcome::Planned);
        }
        if outcome == WriteOutcome::Unchanged {
            return Ok(outcome);
        }

        let mut descriptor = PolicyDocument::new();
        descriptor.apply(PolicyEntry {
            scope,
            key: path.subkey(),
            name: name.to_string(),
            value: Some(desired),
        });
        let staging = StagingFile::new("harden-lgpo-", ".txt")?;
        descriptor.save(staging.path())?;
        self.store.import(staging.path())?;
        Ok(outcome)
    }

    fn export_surface(&self, surface: &SurfaceId, dest_dir: &Path, stem: &str) -> Result<PathBuf> {
        let scope = Self::surface_scope(surface)?;
        let dest = dest_dir.join(format!("{}.txt", stem));
        self.store.export(scope, &dest)?;
        Ok(dest)
    }

    fn restore_surface(&mut self, surface: &SurfaceId, artifact: &Path) -> Result<()> {
        let scope = Self::surface_scope(surface)?;
        self.store.restore(scope, artifact)
    }
}
