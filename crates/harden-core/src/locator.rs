//! Locator canonicalization
//!
//! Registry-style locators arrive in many spellings: `HKLM\Software\X`,
//! `HKLM:\Software\X`, `HKEY_LOCAL_MACHINE/Software//X`, or with a PowerShell
//! provider prefix. All of them resolve to one canonical [`KeyPath`] before any
//! adapter touches a surface, so two spellings of the same key can never be
//! treated as two surfaces.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

static KEY_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<authority>[A-Za-z0-9_]+):?(?:[\\/]+(?P<rest>.*))?$")
        .expect("key path pattern is valid")
});

/// Long hive spellings and the short authority they resolve to.
const AUTHORITY_ALIASES: &[(&str, &str)] = &[
    ("HKEY_LOCAL_MACHINE", "HKLM"),
    ("HKEY_CURRENT_USER", "HKCU"),
    ("HKEY_USERS", "HKU"),
    ("HKEY_CLASSES_ROOT", "HKCR"),
    ("HKEY_CURRENT_CONFIG", "HKCC"),
];

/// PowerShell provider qualifiers that may precede a registry path.
const PROVIDER_PREFIXES: &[&str] = &["microsoft.powershell.core\\registry::", "registry::"];

/// A canonical registry key path.
///
/// The authority is upper-cased and de-aliased; the subkey keeps the caller's
/// casing for display but equality and hashing ignore ASCII case, matching the
/// case-insensitive lookup of the underlying stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeyPath {
    authority: String,
    segments: Vec<String>,
}

impl KeyPath {
    /// Parse and canonicalize a key path.
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidLocator {
            raw: raw.to_string(),
            reason: reason.to_string(),
        };

        let mut trimmed = raw.trim();
        let lowered = trimmed.to_ascii_lowercase();
        for prefix in PROVIDER_PREFIXES {
            if lowered.starts_with(prefix) {
                trimmed = &trimmed[prefix.len()..];
                break;
            }
        }

        if trimmed.is_empty() {
            return Err(invalid("empty key path"));
        }

        let caps = KEY_PATH
            .captures(trimmed)
            .ok_or_else(|| invalid("authority must be an alphanumeric or underscore identifier"))?;

        let authority = canonical_authority(&caps["authority"]);
        let segments = caps
            .name("rest")
            .map(|rest| {
                rest.as_str()
                    .split(['\\', '/'])
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            authority,
            segments,
        })
    }

    /// Canonical authority, e.g. `HKLM`.
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Subkey below the authority, backslash separated, without leading separator.
    pub fn subkey(&self) -> String {
        self.segments.join("\\")
    }

    /// Whether this path names the authority root itself.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Canonical colon-qualified form, e.g. `HKLM:\Software\Policies`.
    pub fn canonical(&self) -> String {
        if self.segments.is_empty() {
            format!("{}:\\", self.authority)
        } else {
            format!("{}:\\{}", self.authority, self.subkey())
        }
    }

    /// Native tool form without the colon, e.g. `HKLM\Software\Policies`.
    pub fn native(&self) -> String {
        if self.segments.is_empty() {
            self.authority.clone()
        } else {
            format!("{}\\{}", self.authority, self.subkey())
        }
    }

    /// Case-folded identity used for lookups and deduplication.
    pub fn identity(&self) -> String {
        self.canonical().to_ascii_lowercase()
    }

    /// Whether `other` is this key or one of its descendants.
    pub fn contains(&self, other: &KeyPath) -> bool {
        self.authority == other.authority
            && self.segments.len() <= other.segments.len()
            && self
                .segments
                .iter()
                .zip(&other.segments)
                .all(|(a, b)| a.eq_ignore_ascii_case(b))
    }
}

fn canonical_authority(raw: &str) -> String {
    let upper = raw.to_ascii_uppercase();
    AUTHORITY_ALIASES
        .iter()
        .find(|(long, _)| *long == upper)
        .map(|(_, short)| (*short).to_string())
        .unwrap_or(upper)
}

impl PartialEq for KeyPath {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for KeyPath {}

impl Hash for KeyPath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl FromStr for KeyPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for KeyPath {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<KeyPath> for String {
    fn from(path: KeyPath) -> Self {
        path.canonical()
    }
}

/// Surface-specific address of a configuration item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Locator {
    /// A named value under a registry-style key (key-value and group-policy surfaces)
    Registry { path: KeyPath, name: String },
    /// A setting inside a security template section
    Template { section: String, key: String },
}

impl Locator {
    /// Build a registry locator from a raw key path.
    pub fn registry(path: &str, name: impl Into<String>) -> Result<Self> {
        Ok(Self::Registry {
            path: KeyPath::parse(path)?,
            name: name.into(),
        })
    }

    /// Build a security template locator.
    pub fn template(section: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Template {
            section: section.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registry { path, name } => write!(f, "{}\\{}", path, name),
            Self::Template { section, key } => write!(f, "[{}] {}", section, key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("HKLM\\Software\\Policies", "HKLM:\\Software\\Policies")]
    #[case("HKLM:\\Software\\Policies", "HKLM:\\Software\\Policies")]
    #[case("hklm:/Software//Policies/", "HKLM:\\Software\\Policies")]
    #[case("HKEY_LOCAL_MACHINE\\Software\\Policies", "HKLM:\\Software\\Policies")]
    #[case("Registry::HKEY_CURRENT_USER\\Console", "HKCU:\\Console")]
    #[case("Microsoft.PowerShell.Core\\Registry::HKU\\.DEFAULT", "HKU:\\.DEFAULT")]
    #[case("CUSTOM_AUTHORITY_42\\Sub\\Key", "CUSTOM_AUTHORITY_42:\\Sub\\Key")]
    #[case("HKLM", "HKLM:\\")]
    fn canonicalizes_spellings(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(KeyPath::parse(raw).unwrap().canonical(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case("HK-LM\\Software")]
    #[case("\\Software\\Policies")]
    fn rejects_malformed_paths(#[case] raw: &str) {
        assert!(KeyPath::parse(raw).is_err(), "{raw:?} should be rejected");
    }

    #[test]
    fn equality_ignores_case_and_spelling() {
        let a = KeyPath::parse("HKEY_LOCAL_MACHINE\\SOFTWARE\\Policies").unwrap();
        let b = KeyPath::parse("hklm:\\software\\policies").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn native_form_drops_colon() {
        let path = KeyPath::parse("HKLM:\\Software\\X").unwrap();
        assert_eq!(path.native(), "HKLM\\Software\\X");
    }

    #[test]
    fn contains_matches_descendants_only() {
        let parent = KeyPath::parse("HKLM\\Software").unwrap();
        let child = KeyPath::parse("HKLM\\SOFTWARE\\Policies").unwrap();
        let sibling = KeyPath::parse("HKLM\\System").unwrap();

        assert!(parent.contains(&child));
        assert!(parent.contains(&parent));
        assert!(!parent.contains(&sibling));
        assert!(!child.contains(&parent));
    }

    #[test]
    fn locator_deserializes_both_shapes() {
        let registry: Locator =
            serde_json::from_str(r#"{"path": "HKLM\\Software\\X", "name": "Enabled"}"#).unwrap();
        let template: Locator =
            serde_json::from_str(r#"{"section": "System Access", "key": "MinimumPasswordLength"}"#)
                .unwrap();

        assert!(matches!(registry, Locator::Registry { .. }));
        assert_eq!(
            template,
            Locator::template("System Access", "MinimumPasswordLength")
        );
    }

    #[test]
    fn key_path_serializes_canonically() {
        let path = KeyPath::parse("HKEY_CURRENT_USER/Console").unwrap();
        assert_eq!(serde_json::to_string(&path).unwrap(), r#""HKCU:\\Console""#);
    }
}
