//! Security-policy database bindings

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::SecurityDatabase;
use super::inf::SecurityTemplate;
use super::tool::run_tool;
use crate::{Error, Result};

/// Areas exported and configured; both are pure policy, no file or service ACLs.
const AREAS: &[&str] = &["SECURITYPOLICY", "USER_RIGHTS"];

/// Database kept as a single template file
///
/// Configuring merges the template's settings into the file, which is how the
/// native engine treats a configure pass as well: settings absent from the
/// template are left alone. Restoring replaces the file with the snapshot.
#[derive(Debug, Clone)]
pub struct InfDatabase {
    path: PathBuf,
}

impl InfDatabase {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current database content; a database that was never written is empty.
    pub fn template(&self) -> Result<SecurityTemplate> {
        if self.path.exists() {
            SecurityTemplate::load(&self.path)
        } else {
            Ok(SecurityTemplate::new())
        }
    }
}

impl SecurityDatabase for InfDatabase {
    fn export(&self, dest: &Path) -> Result<()> {
        self.template()?.save(dest)
    }

    fn configure(&mut self, template: &Path) -> Result<()> {
        let overlay = SecurityTemplate::load(template)?;
        let mut current = self.template()?;
        current.merge(&overlay);
        current.save(&self.path)?;
        debug!(database = %self.path.display(), "Security database configured");
        Ok(())
    }

    fn restore(&mut self, template: &Path) -> Result<()> {
        let snapshot = SecurityTemplate::load(template)?;
        snapshot.save(&self.path)?;
        debug!(database = %self.path.display(), "Security database restored");
        Ok(())
    }
}

/// Native `secedit.exe` binding
#[derive(Debug, Clone)]
pub struct Secedit {
    program: String,
}

impl Default for Secedit {
    fn default() -> Self {
        Self {
            program: "secedit".to_string(),
        }
    }
}

impl Secedit {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecurityDatabase for Secedit {
    fn export(&self, dest: &Path) -> Result<()> {
        let mut args = vec![
            "/export".to_string(),
            "/cfg".to_string(),
            dest.display().to_string(),
            "/areas".to_string(),
        ];
        args.extend(AREAS.iter().map(|a| a.to_string()));
        args.push("/quiet".to_string());

        run_tool(&self.program, &args)?.into_success()?;
        if !dest.exists() {
            return Err(Error::ToolFailed {
                program: self.program.clone(),
                code: 0,
                stderr: format!("no template written to {}", dest.display()),
            });
        }
        Ok(())
    }

    fn configure(&mut self, template: &Path) -> Result<()> {
        // A scratch database keeps the configure pass from touching the
        // persistent one's stored template.
        let scratch = tempfile::tempdir()?;
        let db = scratch.path().join("harden.sdb");
        let log = scratch.path().join("configure.log");

        let mut args = vec![
            "/configure".to_string(),
            "/db".to_string(),
            db.display().to_string(),
            "/cfg".to_string(),
            template.display().to_string(),
            "/areas".to_string(),
        ];
        args.extend(AREAS.iter().map(|a| a.to_string()));
        args.extend([
            "/log".to_string(),
            log.display().to_string(),
            "/quiet".to_string(),
        ]);

        run_tool(&self.program, &args)?.into_success()?;
        info!(template = %template.display(), "secedit configure pass completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configure_merges_into_existing_database() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = InfDatabase::new(dir.path().join("secpol.inf"));
        let mut seed = SecurityTemplate::new();
        seed.set("System Access", "MinimumPasswordLength", "0");
        seed.set("System Access", "PasswordHistorySize", "5");
        seed.save(db.path()).unwrap();

        let mut overlay = SecurityTemplate::new();
        overlay.set("System Access", "MinimumPasswordLength", "14");
        let overlay_path = dir.path().join("overlay.inf");
        overlay.save(&overlay_path).unwrap();

        db.configure(&overlay_path).unwrap();

        let current = db.template().unwrap();
        assert_eq!(current.get("System Access", "MinimumPasswordLength"), Some("14"));
        assert_eq!(current.get("System Access", "PasswordHistorySize"), Some("5"));
    }

    #[test]
    fn restore_drops_settings_missing_from_the_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = InfDatabase::new(dir.path().join("secpol.inf"));
        let mut seed = SecurityTemplate::new();
        seed.set("System Access", "MinimumPasswordLength", "8");
        seed.save(db.path()).unwrap();
        let snapshot = dir.path().join("snapshot.inf");
        db.export(&snapshot).unwrap();

        let mut overlay = SecurityTemplate::new();
        overlay.set("System Access", "PasswordHistorySize", "24");
        let overlay_path = dir.path().join("overlay.inf");
        overlay.save(&overlay_path).unwrap();
        db.configure(&overlay_path).unwrap();

        db.restore(&snapshot).unwrap();

        let current = db.template().unwrap();
        assert_eq!(current.get("System Access", "MinimumPasswordLength"), Some("8"));
        assert_eq!(current.get("System Access", "PasswordHistorySize"), None);
    }

    #[test]
    fn export_of_fresh_database_is_a_valid_template() {
        let dir = tempfile::tempdir().unwrap();
        let db = InfDatabase::new(dir.path().join("never-written.inf"));
        let dest = dir.path().join("export.inf");

        db.export(&dest).unwrap();

        let exported = SecurityTemplate::load(&dest).unwrap();
        assert_eq!(exported.get("Unicode", "Unicode"), Some("yes"));
    }
}
