//! Group-policy store bindings and the LGPO text descriptor format
//!
//! A descriptor is a list of blank-line separated records:
//!
//! ```text
//! Computer
//! Software\Policies\Microsoft\Windows\WinRM\Service
//! AllowBasic
//! DWORD:0
//! ```
//!
//! The key is relative to the scope's hive (`HKLM` for `Computer`, `HKCU` for
//! `User`). `DELETE` as the action removes the value.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::PolicyStore;
use super::tool::run_tool;
use crate::locator::KeyPath;
use crate::model::{NativeValue, parse_hex_bytes, parse_integer, to_hex};
use crate::{Error, Result};

/// Scope of a policy store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyScope {
    Computer,
    User,
}

impl PolicyScope {
    /// Scope owning a registry-style key, if any.
    pub fn from_key(key: &KeyPath) -> Option<Self> {
        match key.authority() {
            "HKLM" => Some(Self::Computer),
            "HKCU" => Some(Self::User),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Computer => "computer",
            Self::User => "user",
        }
    }

    /// Hive the scope's keys live under.
    pub fn authority(&self) -> &'static str {
        match self {
            Self::Computer => "HKLM",
            Self::User => "HKCU",
        }
    }

    fn tag(&self) -> &'static str {
        match self {
            Self::Computer => "Computer",
            Self::User => "User",
        }
    }

    pub(crate) fn from_tag(tag: &str) -> Option<Self> {
        if tag.eq_ignore_ascii_case("computer") {
            Some(Self::Computer)
        } else if tag.eq_ignore_ascii_case("user") {
            Some(Self::User)
        } else {
            None
        }
    }
}

impl fmt::Display for PolicyScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One descriptor record; `value == None` deletes the value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyEntry {
    pub scope: PolicyScope,
    pub key: String,
    pub name: String,
    pub value: Option<NativeValue>,
}

impl PolicyEntry {
    /// Entry for a registry-style key; `None` when the hive has no policy scope.
    pub fn for_key(key: &KeyPath, name: &str, value: Option<NativeValue>) -> Option<Self> {
        Some(Self {
            scope: PolicyScope::from_key(key)?,
            key: key.subkey(),
            name: name.to_string(),
            value,
        })
    }

    fn matches(&self, scope: PolicyScope, key: &str, name: &str) -> bool {
        self.scope == scope && self.key.eq_ignore_ascii_case(key) && self.name.eq_ignore_ascii_case(name)
    }
}

/// Parsed LGPO text descriptor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyDocument {
    entries: Vec<PolicyEntry>,
}

impl PolicyDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse descriptor text. `origin` is only used in error messages.
    pub fn parse(text: &str, origin: &Path) -> Result<Self> {
        let mut entries = Vec::new();
        let mut record: Vec<&str> = Vec::with_capacity(4);

        let lines = text
            .lines()
            .map(|l| l.trim_end_matches('\r').trim_start_matches('\u{feff}'))
            .chain(std::iter::once(""));

        for line in lines {
            let trimmed = line.trim();
            if trimmed.starts_with(';') {
                continue;
            }
            if trimmed.is_empty() {
                if !record.is_empty() {
                    entries.push(parse_record(&record, origin)?);
                    record.clear();
                }
                continue;
            }
            record.push(line);
        }

        Ok(Self { entries })
    }

    /// Load a descriptor file; a missing file is an empty document.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = harden_fs::read_text(path)?;
        Self::parse(&content, path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        harden_fs::write_text(path, &self.render())?;
        Ok(())
    }

    pub fn entries(&self) -> &[PolicyEntry] {
        &self.entries
    }

    /// Stored value for a scope, key and value name.
    pub fn get(&self, scope: PolicyScope, key: &str, name: &str) -> Option<&NativeValue> {
        self.entries
            .iter()
            .find(|e| e.matches(scope, key, name))
            .and_then(|e| e.value.as_ref())
    }

    /// Whether any entry lives under `key` (or one of its subkeys) in `scope`.
    pub fn has_key(&self, scope: PolicyScope, key: &str) -> bool {
        let prefix = format!("{}\\", key.to_ascii_lowercase());
        self.entries.iter().any(|e| {
            let entry_key = e.key.to_ascii_lowercase();
            e.scope == scope && (entry_key == key.to_ascii_lowercase() || entry_key.starts_with(&prefix))
        })
    }

    /// Apply a record: set values are upserted, deletes remove the entry.
    pub fn apply(&mut self, entry: PolicyEntry) {
        let position = self
            .entries
            .iter()
            .position(|e| e.matches(entry.scope, &entry.key, &entry.name));
        match (position, entry.value.is_some()) {
            (Some(index), true) => self.entries[index] = entry,
            (Some(index), false) => {
                self.entries.remove(index);
            }
            (None, true) => self.entries.push(entry),
            (None, false) => {}
        }
    }

    /// Merge every record of `other` into this document.
    pub fn merge(&mut self, other: &PolicyDocument) {
        for entry in &other.entries {
            self.apply(entry.clone());
        }
    }

    /// Only the entries of one scope.
    pub fn scope(&self, scope: PolicyScope) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .filter(|e| e.scope == scope)
                .cloned()
                .collect(),
        }
    }

    /// Replace a scope's entries with those of `other` in the same scope.
    pub fn replace_scope(&mut self, scope: PolicyScope, other: &PolicyDocument) {
        self.entries.retain(|e| e.scope != scope);
        self.entries.extend(
            other
                .entries
                .iter()
                .filter(|e| e.scope == scope && e.value.is_some())
                .cloned(),
        );
    }

    /// Descriptor text.
    pub fn render(&self) -> String {
        let mut out = String::from("; Generated by harden\n\n");
        for entry in &self.entries {
            out.push_str(entry.scope.tag());
            out.push('\n');
            out.push_str(&entry.key);
            out.push('\n');
            out.push_str(&entry.name);
            out.push('\n');
            out.push_str(&render_action(entry.value.as_ref()));
            out.push_str("\n\n");
        }
        out
    }
}

fn parse_record(record: &[&str], origin: &Path) -> Result<PolicyEntry> {
    let invalid = |message: String| Error::parse("policy descriptor", origin, message);

    let [scope, key, name, action] = record else {
        return Err(invalid(format!(
            "record has {} lines, expected 4: {:?}",
            record.len(),
            record
        )));
    };
    let scope = PolicyScope::from_tag(scope.trim())
        .ok_or_else(|| invalid(format!("unknown scope '{}'", scope.trim())))?;

    Ok(PolicyEntry {
        scope,
        key: key.trim().trim_matches('\\').to_string(),
        name: name.trim().to_string(),
        value: parse_action(action.trim()).ok_or_else(|| invalid(format!("bad action '{}'", action)))?,
    })
}

/// `Some(None)` is a delete, `None` a malformed action.
fn parse_action(action: &str) -> Option<Option<NativeValue>> {
    if action.eq_ignore_ascii_case("DELETE") {
        return Some(None);
    }
    let (kind, data) = action.split_once(':')?;
    let value = match kind.to_ascii_uppercase().as_str() {
        "DWORD" => NativeValue::Dword(u32::try_from(parse_integer(data)?).ok()?),
        "QWORD" => NativeValue::Qword(parse_qword(data)?),
        "SZ" => NativeValue::Sz(data.to_string()),
        "EXSZ" => NativeValue::ExpandSz(data.to_string()),
        "MULTISZ" => NativeValue::MultiSz(split_multi(data)),
        "BINARY" => NativeValue::Binary(parse_hex_bytes(data)?),
        _ => return None,
    };
    Some(Some(value))
}

/// Qword data is unsigned, decimal or `0x` hex.
fn parse_qword(data: &str) -> Option<u64> {
    let data = data.trim();
    match data.strip_prefix("0x").or_else(|| data.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => data.parse::<u64>().ok(),
    }
}

fn render_action(value: Option<&NativeValue>) -> String {
    match value {
        None => "DELETE".to_string(),
        Some(NativeValue::Dword(d)) => format!("DWORD:{}", d),
        Some(NativeValue::Qword(q)) => format!("QWORD:{}", q),
        Some(NativeValue::Sz(s)) => format!("SZ:{}", s),
        Some(NativeValue::ExpandSz(s)) => format!("EXSZ:{}", s),
        Some(NativeValue::MultiSz(items)) => format!("MULTISZ:{}", items.join("\\0")),
        Some(NativeValue::Binary(bytes)) => format!("BINARY:{}", to_hex(bytes)),
    }
}

fn split_multi(data: &str) -> Vec<String> {
    if data.is_empty() {
        return Vec::new();
    }
    data.split("\\0").map(str::to_string).collect()
}

/// Policy store kept as a descriptor file holding both scopes
#[derive(Debug, Clone)]
pub struct TextPolicyStore {
    path: PathBuf,
}

impl TextPolicyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn document(&self) -> Result<PolicyDocument> {
        PolicyDocument::load(&self.path)
    }
}

impl PolicyStore for TextPolicyStore {
    fn export(&self, scope: PolicyScope, dest: &Path) -> Result<()> {
        self.document()?.scope(scope).save(dest)
    }

    fn import(&mut self, descriptor: &Path) -> Result<()> {
        let incoming = PolicyDocument::load(descriptor)?;
        let mut current = self.document()?;
        current.merge(&incoming);
        current.save(&self.path)?;
        debug!(store = %self.path.display(), records = incoming.entries.len(), "Policy descriptor imported");
        Ok(())
    }

    fn restore(&mut self, scope: PolicyScope, descriptor: &Path) -> Result<()> {
        let snapshot = PolicyDocument::load(descriptor)?;
        let mut current = self.document()?;
        current.replace_scope(scope, &snapshot);
        current.save(&self.path)
    }
}

/// Native `LGPO.exe` binding over the local `Registry.pol` files
#[derive(Debug, Clone)]
pub struct LgpoTool {
    program: String,
    machine_pol: PathBuf,
    user_pol: PathBuf,
}

impl Default for LgpoTool {
    fn default() -> Self {
        let root = PathBuf::from(r"C:\Windows\System32\GroupPolicy");
        Self {
            program: "LGPO.exe".to_string(),
            machine_pol: root.join("Machine").join("Registry.pol"),
            user_pol: root.join("User").join("Registry.pol"),
        }
    }
}

impl LgpoTool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific `LGPO.exe` instead of the one on `PATH`.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn pol_file(&self, scope: PolicyScope) -> &Path {
        match scope {
            PolicyScope::Computer => &self.machine_pol,
            PolicyScope::User => &self.user_pol,
        }
    }
}

impl PolicyStore for LgpoTool {
    fn export(&self, scope: PolicyScope, dest: &Path) -> Result<()> {
        let pol = self.pol_file(scope);
        if !pol.exists() {
            // No policy has ever been set in this scope.
            return PolicyDocument::new().save(dest);
        }
        let flag = match scope {
            PolicyScope::Computer => "/m",
            PolicyScope::User => "/u",
        };
        let output = run_tool(
            &self.program,
            ["/parse".to_string(), flag.to_string(), pol.display().to_string()],
        )?
        .into_success()?;

        // Validate before persisting so a garbled dump never becomes a backup.
        PolicyDocument::parse(&output.stdout, dest)?;
        harden_fs::write_text(dest, &output.stdout)?;
        Ok(())
    }

    fn import(&mut self, descriptor: &Path) -> Result<()> {
        run_tool(
            &self.program,
            ["/t".to_string(), descriptor.display().to_string()],
        )?
        .into_success()?;
        Ok(())
    }
}
