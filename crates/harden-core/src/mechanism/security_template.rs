//! Security template adapter
//!
//! Every access goes through a full export of the database into a staging
//! template. Writes edit that export and configure the database from it, so
//! the template handed to the engine always carries the complete policy.

use std::path::{Path, PathBuf};

use harden_fs::StagingFile;
use tracing::info;

use super::{MechanismAdapter, SurfaceId, WriteOutcome, template_locator};
use crate::locator::Locator;
use crate::model::{Mechanism, PolicyValue, values_match};
use crate::store::{SecurityDatabase, SecurityTemplate};
use crate::{Error, Result};

const DATABASE_SCOPE: &str = "database";

pub struct SecurityTemplateAdapter {
    database: Box<dyn SecurityDatabase>,
}

impl SecurityTemplateAdapter {
    pub fn new(database: Box<dyn SecurityDatabase>) -> Self {
        Self { database }
    }

    fn export_staged(&self) -> Result<(StagingFile, SecurityTemplate)> {
        let staging = StagingFile::new("harden-secpol-", ".inf")?;
        self.database.export(staging.path())?;
        let template = SecurityTemplate::load(staging.path())?;
        Ok((staging, template))
    }
}

/// Template text for a value; binary data has no template representation.
pub(crate) fn template_text(value: &PolicyValue) -> Result<String> {
    match value {
        PolicyValue::Integer(i) => Ok(i.to_string()),
        PolicyValue::String(s) | PolicyValue::ExpandableString(s) => Ok(s.clone()),
        PolicyValue::MultiString(items) => Ok(items.join(",")),
        PolicyValue::Binary(_) => Err(Error::UnsupportedValue {
            mechanism: Mechanism::SecurityTemplate,
            reason: "security templates cannot hold binary data".to_string(),
        }),
    }
}

impl MechanismAdapter for SecurityTemplateAdapter {
    fn mechanism(&self) -> Mechanism {
        Mechanism::SecurityTemplate
    }

    fn surface_for(&self, locator: &Locator) -> Result<SurfaceId> {
        template_locator(Mechanism::SecurityTemplate, locator)?;
        Ok(SurfaceId::new(Mechanism::SecurityTemplate, DATABASE_SCOPE))
    }

    fn read(&self, locator: &Locator) -> Result<Option<PolicyValue>> {
        let (section, key) = template_locator(Mechanism::SecurityTemplate, locator)?;
        let (_staging, template) = self.export_staged()?;
        Ok(template
            .get(section, key)
            .map(|raw| PolicyValue::String(raw.to_string())))
    }

    fn write(
        &mut self,
        locator: &Locator,
        value: &PolicyValue,
        dry_run: bool,
    ) -> Result<WriteOutcome> {
        let (section, key) = template_locator(Mechanism::SecurityTemplate, locator)?;
        let text = template_text(value)?;
        let (staging, mut template) = self.export_staged()?;

        let outcome = match template.get(section, key) {
            None => WriteOutcome::Created,
            Some(current) if values_match(value, &PolicyValue::String(current.to_string())) => {
                WriteOutcome::Unchanged
            }
            Some(_) => WriteOutcome::Updated,
        };

        if dry_run {
            info!(
                section,
                key,
                value = %text,
                planned = %outcome,
                "[dry-run] Would configure security template setting"
            );
            return Ok(WriteOutcome::Planned);
        }
        if outcome == WriteOutcome::Unchanged {
            return Ok(outcome);
        }

        template.set(section, key, &text);
        template.save(staging.path())?;
        self.database.configure(staging.path())?;
        Ok(outcome)
    }

    fn export_surface(&self, _surface: &SurfaceId, dest_dir: &Path, stem: &str) -> Result<PathBuf> {
        let dest = dest_dir.join(format!("{}.inf", stem));
        self.database.export(&dest)?;
        Ok(dest)
    }

    fn restore_surface(&mut self, _surface: &SurfaceId, artifact: &Path) -> Result<()> {
        self.database.restore(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InfDatabase;

    fn adapter(dir: &tempfile::TempDir) -> SecurityTemplateAdapter {
        let path = dir.path().join("secpol.inf");
        let mut seed = SecurityTemplate::new();
        seed.set("System Access", "MinimumPasswordLength", "0");
        seed.save(&path).unwrap();
        SecurityTemplateAdapter::new(Box::new(InfDatabase::new(path)))
    }

    fn length() -> Locator {
        Locator::template("System Access", "MinimumPasswordLength")
    }

    #[test]
    fn write_updates_and_reads_back_as_text() {
        let dir = tempfile::tempdir().unwrap();
        let mut adapter = adapter(&dir);

        let outcome = adapter.write(&length(), &PolicyValue::Integer(14), false).unwrap();

        assert_eq!(outcome, WriteOutcome::Updated);
        assert_eq!(
            adapter.read(&length()).unwrap(),
            Some(PolicyValue::String("14".into()))
        );
    }

    #[test]
    fn equal_text_is_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let mut adapter = adapter(&dir);
        adapter.write(&length(), &PolicyValue::Integer(14), false).unwrap();

        let outcome = adapter.write(&length(), &PolicyValue::Integer(14), false).unwrap();

        assert_eq!(outcome, WriteOutcome::Unchanged);
    }

    #[test]
    fn absent_setting_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let mut adapter = adapter(&dir);
        let locator = Locator::template("Privilege Rights", "SeDenyNetworkLogonRight");

        let outcome = adapter
            .write(
                &locator,
                &PolicyValue::MultiString(vec!["*S-1-5-32-546".into()]),
                false,
            )
            .unwrap();

        assert_eq!(outcome, WriteOutcome::Created);
    }

    #[test]
    fn binary_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut adapter = adapter(&dir);
        let err = adapter
            .write(&length(), &PolicyValue::Binary(vec![1]), false)
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedValue { .. }));
    }
}
