//! Render-only adapter
//!
//! Instead of mutating the host, every write appends the equivalent
//! PowerShell/native-tool commands to a shared [`Procedure`]. Before the first
//! write to a surface the procedure exports that surface, so the rendered
//! script keeps the backup-before-mutate order of a live run.

use std::cell::RefCell;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::debug;

use super::security_template::template_text;
use super::{MechanismAdapter, SurfaceId, WriteOutcome, registry_locator, template_locator};
use crate::backup::sanitize;
use crate::locator::Locator;
use crate::model::{Mechanism, NativeValue, PolicyValue};
use crate::render::ps_quote;
use crate::store::{PolicyDocument, PolicyEntry, PolicyScope, SecurityTemplate};
use crate::{Error, Result};

/// An ordered PowerShell procedure built up by [`RenderAdapter`]s
#[derive(Debug)]
pub struct Procedure {
    backup_dir: PathBuf,
    lines: Vec<String>,
    backed_up: HashSet<SurfaceId>,
    steps: usize,
}

impl Procedure {
    /// Empty procedure whose backup exports land in `backup_dir`.
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            lines: Vec::new(),
            backed_up: HashSet::new(),
            steps: 0,
        }
    }

    /// Shared handle for [`super::MechanismSet::render`].
    pub fn shared(backup_dir: impl Into<PathBuf>) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self::new(backup_dir)))
    }

    /// Number of writes rendered so far.
    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps == 0
    }

    /// The complete script.
    pub fn script(&self) -> String {
        let mut out = String::from(
            "#Requires -RunAsAdministrator\r\n# Baseline application procedure generated by harden\r\n$ErrorActionPreference = 'Stop'\r\n",
        );
        out.push_str(&format!(
            "New-Item -ItemType Directory -Force -Path {} | Out-Null\r\n",
            ps_quote(&self.backup_dir.display().to_string())
        ));
        for line in &self.lines {
            out.push_str(line);
            out.push_str("\r\n");
        }
        out
    }

    /// Write the script to disk.
    pub fn save(&self, path: &Path) -> Result<()> {
        harden_fs::write_text(path, &self.script())?;
        Ok(())
    }

    fn push(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    fn backup_once(&mut self, surface: &SurfaceId) {
        if !self.backed_up.insert(surface.clone()) {
            return;
        }
        let index = self.backed_up.len();
        let stem = format!("{:02}-{}", index, surface.mechanism);
        let artifact = |ext: &str| {
            ps_quote(
                &self
                    .backup_dir
                    .join(format!("{}-{}.{}", stem, sanitize(&surface.scope), ext))
                    .display()
                    .to_string(),
            )
        };

        let command = match surface.mechanism {
            Mechanism::KeyValue => {
                let native = surface.scope.replacen(":\\", "\\", 1);
                format!(
                    "if (Test-Path -Path {}) {{ reg.exe export {} {} /y | Out-Null }}",
                    ps_quote(&surface.scope),
                    ps_quote(&native),
                    artifact("reg")
                )
            }
            Mechanism::SecurityTemplate => format!(
                "secedit.exe /export /cfg {} /areas SECURITYPOLICY USER_RIGHTS /quiet",
                artifact("inf")
            ),
            Mechanism::GroupPolicy => {
                let (flag, pol) = match PolicyScope::from_tag(&surface.scope) {
                    Some(PolicyScope::User) => ("/u", "User"),
                    _ => ("/m", "Machine"),
                };
                format!(
                    "LGPO.exe /parse {} (Join-Path $env:SystemRoot 'System32\\GroupPolicy\\{}\\Registry.pol') | Out-File -Encoding ascii -FilePath {}",
                    flag,
                    pol,
                    artifact("txt")
                )
            }
        };
        self.push(format!("# Backup {}", surface));
        self.push(command);
    }
}

/// Adapter that records writes into a [`Procedure`]
pub struct RenderAdapter {
    mechanism: Mechanism,
    procedure: Rc<RefCell<Procedure>>,
}

impl RenderAdapter {
    pub fn new(mechanism: Mechanism, procedure: Rc<RefCell<Procedure>>) -> Self {
        Self {
            mechanism,
            procedure,
        }
    }

    fn render_only(&self, operation: &str) -> Error {
        Error::RenderOnly {
            operation: format!("{} {}", self.mechanism, operation),
        }
    }

    fn write_commands(&self, locator: &Locator, value: &PolicyValue, step: usize) -> Result<Vec<String>> {
        match self.mechanism {
            Mechanism::KeyValue => {
                let (path, name) = registry_locator(self.mechanism, locator)?;
                let native = NativeValue::encode(value);
                let canonical = ps_quote(&path.canonical());
                Ok(vec![
                    format!(
                        "if (-not (Test-Path -Path {0})) {{ New-Item -Path {0} -Force | Out-Null }}",
                        canonical
                    ),
                    format!(
                        "New-ItemProperty -Path {} -Name {} -PropertyType {} -Value {} -Force | Out-Null",
                        canonical,
                        ps_quote(name),
                        property_type(&native),
                        ps_value(&native)
                    ),
                ])
            }
            Mechanism::SecurityTemplate => {
                let (section, key) = template_locator(self.mechanism, locator)?;
                let mut template = SecurityTemplate::new();
                template.set(section, key, &template_text(value)?);
                let inf = format!("$inf{}", step);
                Ok(vec![
                    format!("{} = Join-Path $env:TEMP 'harden-{}.inf'", inf, step),
                    format!(
                        "@'\r\n{}'@ | Set-Content -Path {} -Encoding Unicode",
                        template.render(),
                        inf
                    ),
                    format!(
                        "secedit.exe /configure /db (Join-Path $env:TEMP 'harden-{}.sdb') /cfg {} /areas SECURITYPOLICY USER_RIGHTS /quiet",
                        step, inf
                    ),
                    format!("Remove-Item -Path {} -Force", inf),
                ])
            }
            Mechanism::GroupPolicy => {
                let (path, name) = registry_locator(self.mechanism, locator)?;
                let entry = PolicyEntry::for_key(path, name, Some(NativeValue::encode(value)))
                    .ok_or_else(|| Error::LocatorMismatch {
                        mechanism: self.mechanism,
                        locator: locator.to_string(),
                    })?;
                let mut descriptor = PolicyDocument::new();
                descriptor.apply(entry);
                let txt = format!("$lgpo{}", step);
                Ok(vec![
                    format!("{} = Join-Path $env:TEMP 'harden-{}.txt'", txt, step),
                    format!(
                        "@'\r\n{}'@ | Set-Content -Path {} -Encoding ascii",
                        descriptor.render(),
                        txt
                    ),
                    format!("LGPO.exe /t {}", txt),
                    format!("Remove-Item -Path {} -Force", txt),
                ])
            }
        }
    }
}

impl MechanismAdapter for RenderAdapter {
    fn mechanism(&self) -> Mechanism {
        self.mechanism
    }

    fn surface_for(&self, locator: &Locator) -> Result<SurfaceId> {
        match self.mechanism {
            Mechanism::KeyValue => {
                let (path, _) = registry_locator(self.mechanism, locator)?;
                Ok(SurfaceId::new(self.mechanism, path.canonical()))
            }
            Mechanism::SecurityTemplate => {
                template_locator(self.mechanism, locator)?;
                Ok(SurfaceId::new(self.mechanism, "database"))
            }
            Mechanism::GroupPolicy => {
                let (path, _) = registry_locator(self.mechanism, locator)?;
                let scope = PolicyScope::from_key(path).ok_or_else(|| Error::LocatorMismatch {
                    mechanism: self.mechanism,
                    locator: locator.to_string(),
                })?;
                Ok(SurfaceId::new(self.mechanism, scope.as_str()))
            }
        }
    }

    fn exists(&self, _locator: &Locator) -> Result<bool> {
        Err(self.render_only("exists"))
    }

    fn read(&self, _locator: &Locator) -> Result<Option<PolicyValue>> {
        Err(self.render_only("read"))
    }

    fn write(
        &mut self,
        locator: &Locator,
        value: &PolicyValue,
        _dry_run: bool,
    ) -> Result<WriteOutcome> {
        let surface = self.surface_for(locator)?;
        let step = self.procedure.borrow().steps + 1;
        let commands = self.write_commands(locator, value, step)?;

        let mut procedure = self.procedure.borrow_mut();
        procedure.backup_once(&surface);
        procedure.push(format!("# Step {}: set {} = {}", step, locator, value));
        for command in commands {
            procedure.push(command);
        }
        procedure.steps = step;
        debug!(%locator, step, "Rendered write");
        Ok(WriteOutcome::Planned)
    }

    fn export_surface(&self, _surface: &SurfaceId, _dest_dir: &Path, _stem: &str) -> Result<PathBuf> {
        Err(self.render_only("export"))
    }

    fn restore_surface(&mut self, _surface: &SurfaceId, _artifact: &Path) -> Result<()> {
        Err(self.render_only("restore"))
    }
}

fn property_type(value: &NativeValue) -> &'static str {
    match value {
        NativeValue::Dword(_) => "DWord",
        NativeValue::Qword(_) => "QWord",
        NativeValue::Sz(_) => "String",
        NativeValue::ExpandSz(_) => "ExpandString",
        NativeValue::MultiSz(_) => "MultiString",
        NativeValue::Binary(_) => "Binary",
    }
}

fn ps_value(value: &NativeValue) -> String {
    match value {
        NativeValue::Dword(d) => d.to_string(),
        NativeValue::Qword(q) => q.to_string(),
        NativeValue::Sz(s) | NativeValue::ExpandSz(s) => ps_quote(s),
        NativeValue::MultiSz(items) => format!(
            "@({})",
            items.iter().map(|i| ps_quote(i)).collect::<Vec<_>>().join(",")
        ),
        NativeValue::Binary(bytes) => format!(
            "([byte[]]({}))",
            bytes
                .iter()
                .map(|b| format!("0x{:02x}", b))
                .collect::<Vec<_>>()
                .join(",")
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mechanism::MechanismSet;

    #[test]
    fn writes_become_script_lines_with_one_backup_per_surface() {
        let procedure = Procedure::shared("C:\\harden-backups\\run");
        let mut set = MechanismSet::render(Rc::clone(&procedure));
        let first = Locator::registry("HKLM\\Software\\Policies\\Test", "A").unwrap();
        let second = Locator::registry("HKLM\\Software\\Policies\\Test", "B").unwrap();

        let a = set
            .get_mut(Mechanism::KeyValue)
            .write(&first, &PolicyValue::Integer(1), false)
            .unwrap();
        set.get_mut(Mechanism::KeyValue)
            .write(&second, &PolicyValue::String("it's".into()), false)
            .unwrap();

        assert_eq!(a, WriteOutcome::Planned);
        let script = procedure.borrow().script();
        assert_eq!(script.matches("reg.exe export").count(), 1);
        assert!(script.contains("-Name 'A' -PropertyType DWord -Value 1"));
        assert!(script.contains("-Value 'it''s'"));
        assert_eq!(procedure.borrow().steps(), 2);
    }

    #[test]
    fn security_template_write_renders_secedit_configure() {
        let procedure = Procedure::shared("C:\\backups");
        let mut adapter = RenderAdapter::new(Mechanism::SecurityTemplate, Rc::clone(&procedure));
        adapter
            .write(
                &Locator::template("System Access", "MinimumPasswordLength"),
                &PolicyValue::Integer(14),
                false,
            )
            .unwrap();

        let script = procedure.borrow().script();
        assert!(script.contains("secedit.exe /export"));
        assert!(script.contains("MinimumPasswordLength = 14"));
        assert!(script.contains("secedit.exe /configure"));
    }

    #[test]
    fn reads_are_refused() {
        let adapter = RenderAdapter::new(Mechanism::GroupPolicy, Procedure::shared("x"));
        let locator = Locator::registry("HKLM\\Software\\X", "V").unwrap();
        assert!(matches!(
            adapter.read(&locator).unwrap_err(),
            Error::RenderOnly { .. }
        ));
    }
}
