//! Change set model
//!
//! A [`ChangeSet`] is the ordered list of [`PolicyChange`] assertions handed
//! over by upstream tooling. Changes are validated once, on construction or
//! load, and are never mutated by the orchestrator afterwards.

mod value;

pub use value::{
    NativeKind, NativeValue, PolicyValue, ValueType, canonical_integer, parse_hex_bytes,
    parse_integer, to_hex, values_match,
};

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::locator::Locator;
use crate::{Error, Result};

/// Configuration surface a change is applied through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mechanism {
    KeyValue,
    SecurityTemplate,
    GroupPolicy,
}

impl Mechanism {
    pub const ALL: [Mechanism; 3] = [
        Mechanism::KeyValue,
        Mechanism::SecurityTemplate,
        Mechanism::GroupPolicy,
    ];

    /// Stable short name used in artifact file names and surface ids.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KeyValue => "key_value",
            Self::SecurityTemplate => "security_template",
            Self::GroupPolicy => "group_policy",
        }
    }

    /// Whether this mechanism addresses registry-style locators.
    pub fn uses_registry_locator(&self) -> bool {
        matches!(self, Self::KeyValue | Self::GroupPolicy)
    }
}

impl fmt::Display for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Risk classification assigned upstream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// One configuration assertion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPolicyChange", into = "RawPolicyChange")]
pub struct PolicyChange {
    pub id: String,
    pub display_name: String,
    pub mechanism: Mechanism,
    /// Second surface the same assertion can be expressed through
    pub secondary: Option<Mechanism>,
    pub locator: Locator,
    pub expected_value: PolicyValue,
    pub risk_level: RiskLevel,
    pub requires_reboot: bool,
    pub notes: String,
}

impl PolicyChange {
    /// Create a change with default metadata.
    pub fn new(
        id: impl Into<String>,
        mechanism: Mechanism,
        locator: Locator,
        expected_value: PolicyValue,
    ) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
            mechanism,
            secondary: None,
            locator,
            expected_value,
            risk_level: RiskLevel::default(),
            requires_reboot: false,
            notes: String::new(),
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn with_secondary(mut self, mechanism: Mechanism) -> Self {
        self.secondary = Some(mechanism);
        self
    }

    pub fn with_reboot(mut self, requires_reboot: bool) -> Self {
        self.requires_reboot = requires_reboot;
        self
    }

    pub fn with_risk(mut self, risk_level: RiskLevel) -> Self {
        self.risk_level = risk_level;
        self
    }

    /// Declared type of the expected value.
    pub fn value_type(&self) -> ValueType {
        self.expected_value.value_type()
    }

    /// Mechanisms to attempt, primary first.
    pub fn mechanisms(&self) -> impl Iterator<Item = Mechanism> + '_ {
        std::iter::once(self.mechanism).chain(self.secondary)
    }

    /// Check internal consistency of the assertion.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Error::InvalidChange {
            id: self.id.clone(),
            reason,
        };

        if self.id.trim().is_empty() {
            return Err(invalid("id must not be empty".to_string()));
        }

        for mechanism in self.mechanisms() {
            let fits = match &self.locator {
                Locator::Registry { path, name } => {
                    if path.is_root() {
                        return Err(invalid(format!("{} names a hive root", path)));
                    }
                    if name.is_empty() {
                        return Err(invalid("value name must not be empty".to_string()));
                    }
                    mechanism.uses_registry_locator()
                }
                Locator::Template { section, key } => {
                    if section.trim().is_empty() || key.trim().is_empty() {
                        return Err(invalid("section and key must not be empty".to_string()));
                    }
                    mechanism == Mechanism::SecurityTemplate
                }
            };
            if !fits {
                return Err(invalid(format!(
                    "{} cannot address locator {}",
                    mechanism, self.locator
                )));
            }
        }

        if self.secondary == Some(self.mechanism) {
            return Err(invalid(
                "secondary mechanism repeats the primary".to_string(),
            ));
        }

        Ok(())
    }
}

/// Wire form of a [`PolicyChange`], with the expected value still untyped.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawPolicyChange {
    id: String,
    #[serde(default)]
    display_name: Option<String>,
    mechanism: Mechanism,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    secondary: Option<Mechanism>,
    locator: Locator,
    expected_value: Value,
    value_type: ValueType,
    #[serde(default)]
    risk_level: RiskLevel,
    #[serde(default)]
    requires_reboot: bool,
    #[serde(default)]
    notes: String,
}

impl TryFrom<RawPolicyChange> for PolicyChange {
    type Error = Error;

    fn try_from(raw: RawPolicyChange) -> Result<Self> {
        let expected_value =
            PolicyValue::from_raw(raw.value_type, &raw.expected_value).map_err(|reason| {
                Error::InvalidChange {
                    id: raw.id.clone(),
                    reason,
                }
            })?;

        let change = PolicyChange {
            display_name: raw.display_name.unwrap_or_else(|| raw.id.clone()),
            id: raw.id,
            mechanism: raw.mechanism,
            secondary: raw.secondary,
            locator: raw.locator,
            expected_value,
            risk_level: raw.risk_level,
            requires_reboot: raw.requires_reboot,
            notes: raw.notes,
        };
        change.validate()?;
        Ok(change)
    }
}

impl From<PolicyChange> for RawPolicyChange {
    fn from(change: PolicyChange) -> Self {
        Self {
            value_type: change.value_type(),
            expected_value: change.expected_value.to_raw(),
            id: change.id,
            display_name: Some(change.display_name),
            mechanism: change.mechanism,
            secondary: change.secondary,
            locator: change.locator,
            risk_level: change.risk_level,
            requires_reboot: change.requires_reboot,
            notes: change.notes,
        }
    }
}

/// The full ordered list of changes for one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub changes: Vec<PolicyChange>,
}

impl ChangeSet {
    /// Build a validated change set.
    pub fn new(changes: Vec<PolicyChange>) -> Result<Self> {
        let set = Self {
            name: None,
            changes,
        };
        set.validate()?;
        Ok(set)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Load a change set from a JSON or TOML document.
    ///
    /// The format follows the file extension; anything other than `.toml`
    /// is read as JSON, either a bare array of changes or an object with a
    /// `changes` list.
    pub fn load(path: &Path) -> Result<Self> {
        let content = harden_fs::read_text(path)?;
        let invalid = |message: String| Error::InvalidChangeSet {
            path: path.to_path_buf(),
            message,
        };

        let is_toml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("toml"));

        let set = if is_toml {
            toml::from_str::<ChangeSet>(&content).map_err(|e| invalid(e.to_string()))?
        } else if content.trim_start().starts_with('[') {
            let changes: Vec<PolicyChange> =
                serde_json::from_str(&content).map_err(|e| invalid(e.to_string()))?;
            ChangeSet {
                name: None,
                changes,
            }
        } else {
            serde_json::from_str::<ChangeSet>(&content).map_err(|e| invalid(e.to_string()))?
        };

        set.validate().map_err(|e| invalid(e.to_string()))?;
        Ok(set)
    }

    /// Validate every change and the uniqueness of ids.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for change in &self.changes {
            change.validate()?;
            if !seen.insert(change.id.as_str()) {
                return Err(Error::InvalidChange {
                    id: change.id.clone(),
                    reason: "duplicate id in change set".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PolicyChange> {
        self.changes.iter()
    }
}
