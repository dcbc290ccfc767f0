//! Mechanism adapters
//!
//! One adapter per configuration surface, all behind [`MechanismAdapter`].
//! The orchestrator, backup manager, verifier and reverser only ever see the
//! trait; which host binding sits underneath is decided once, when the
//! [`MechanismSet`] is built.

mod group_policy;
mod key_value;
mod render;
mod security_template;

pub use group_policy::GroupPolicyAdapter;
pub use key_value::KeyValueAdapter;
pub use render::{Procedure, RenderAdapter};
pub use security_template::SecurityTemplateAdapter;

use std::cell::RefCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::config::{PolicyBinding, RegistryBinding, SecurityBinding, StoreOptions};
use crate::locator::{KeyPath, Locator};
use crate::model::{Mechanism, PolicyValue};
use crate::store::{
    FileRegistry, InfDatabase, LgpoTool, RegExe, Secedit, TextPolicyStore,
};
use crate::{Error, Result};

/// Identity of one physically backed-up configuration surface
///
/// `scope` is the canonical key for the key-value surface, `database` for the
/// security database and the policy scope name for group policy. Comparison
/// ignores ASCII case in the scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurfaceId {
    pub mechanism: Mechanism,
    pub scope: String,
}

impl SurfaceId {
    pub fn new(mechanism: Mechanism, scope: impl Into<String>) -> Self {
        Self {
            mechanism,
            scope: scope.into(),
        }
    }
}

impl PartialEq for SurfaceId {
    fn eq(&self, other: &Self) -> bool {
        self.mechanism == other.mechanism && self.scope.eq_ignore_ascii_case(&other.scope)
    }
}

impl Eq for SurfaceId {}

impl Hash for SurfaceId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.mechanism.hash(state);
        self.scope.to_ascii_lowercase().hash(state);
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.mechanism, self.scope)
    }
}

/// What a write did (or would do) to its target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOutcome {
    /// The value did not exist and was created
    Created,
    /// An existing value was overwritten
    Updated,
    /// The value already held the expected data
    Unchanged,
    /// Nothing was mutated: dry-run or rendered procedure
    Planned,
}

impl fmt::Display for WriteOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
            Self::Planned => "planned",
        };
        f.write_str(name)
    }
}

/// Uniform access to one configuration surface
pub trait MechanismAdapter {
    /// The mechanism this adapter implements.
    fn mechanism(&self) -> Mechanism;

    /// The backed-up surface a locator belongs to.
    fn surface_for(&self, locator: &Locator) -> Result<SurfaceId>;

    /// Whether the target value currently exists.
    fn exists(&self, locator: &Locator) -> Result<bool> {
        Ok(self.read(locator)?.is_some())
    }

    /// Current value of the target, `None` when absent.
    fn read(&self, locator: &Locator) -> Result<Option<PolicyValue>>;

    /// Idempotent create-or-update. With `dry_run` nothing is mutated and
    /// [`WriteOutcome::Planned`] is returned.
    fn write(&mut self, locator: &Locator, value: &PolicyValue, dry_run: bool)
    -> Result<WriteOutcome>;

    /// Export a surface into `dest_dir` as `{stem}.{ext}` and return the path
    /// actually written.
    fn export_surface(&self, surface: &SurfaceId, dest_dir: &Path, stem: &str) -> Result<PathBuf>;

    /// Return a surface to the state captured in an exported artifact.
    fn restore_surface(&mut self, surface: &SurfaceId, artifact: &Path) -> Result<()>;
}

/// The three adapters of a run, one per mechanism
pub struct MechanismSet {
    key_value: Box<dyn MechanismAdapter>,
    security_template: Box<dyn MechanismAdapter>,
    group_policy: Box<dyn MechanismAdapter>,
}

impl MechanismSet {
    pub fn new(
        key_value: Box<dyn MechanismAdapter>,
        security_template: Box<dyn MechanismAdapter>,
        group_policy: Box<dyn MechanismAdapter>,
    ) -> Self {
        Self {
            key_value,
            security_template,
            group_policy,
        }
    }

    /// Build live adapters over the configured store bindings.
    pub fn from_stores(stores: &StoreOptions) -> Self {
        let key_value: Box<dyn MechanismAdapter> = match &stores.registry {
            RegistryBinding::File { path } => {
                Box::new(KeyValueAdapter::new(Box::new(FileRegistry::open(path))))
            }
            RegistryBinding::Native => Box::new(KeyValueAdapter::new(Box::new(RegExe::new()))),
        };
        let security_template: Box<dyn MechanismAdapter> = match &stores.security {
            SecurityBinding::File { path } => Box::new(SecurityTemplateAdapter::new(Box::new(
                InfDatabase::new(path),
            ))),
            SecurityBinding::Native => {
                Box::new(SecurityTemplateAdapter::new(Box::new(Secedit::new())))
            }
        };
        let group_policy: Box<dyn MechanismAdapter> = match &stores.policy {
            PolicyBinding::File { path } => Box::new(GroupPolicyAdapter::new(Box::new(
                TextPolicyStore::new(path),
            ))),
            PolicyBinding::Native { lgpo } => {
                let tool = match lgpo {
                    Some(program) => LgpoTool::new().with_program(program.clone()),
                    None => LgpoTool::new(),
                };
                Box::new(GroupPolicyAdapter::new(Box::new(tool)))
            }
        };
        Self::new(key_value, security_template, group_policy)
    }

    /// Render-only adapters that append to a shared procedure.
    pub fn render(procedure: Rc<RefCell<Procedure>>) -> Self {
        Self::new(
            Box::new(RenderAdapter::new(Mechanism::KeyValue, Rc::clone(&procedure))),
            Box::new(RenderAdapter::new(
                Mechanism::SecurityTemplate,
                Rc::clone(&procedure),
            )),
            Box::new(RenderAdapter::new(Mechanism::GroupPolicy, procedure)),
        )
    }

    pub fn get(&self, mechanism: Mechanism) -> &dyn MechanismAdapter {
        match mechanism {
            Mechanism::KeyValue => self.key_value.as_ref(),
            Mechanism::SecurityTemplate => self.security_template.as_ref(),
            Mechanism::GroupPolicy => self.group_policy.as_ref(),
        }
    }

    pub fn get_mut(&mut self, mechanism: Mechanism) -> &mut dyn MechanismAdapter {
        match mechanism {
            Mechanism::KeyValue => self.key_value.as_mut(),
            Mechanism::SecurityTemplate => self.security_template.as_mut(),
            Mechanism::GroupPolicy => self.group_policy.as_mut(),
        }
    }
}

impl fmt::Debug for MechanismSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MechanismSet").finish_non_exhaustive()
    }
}

/// Split a registry locator, rejecting template locators.
pub(crate) fn registry_locator(
    mechanism: Mechanism,
    locator: &Locator,
) -> Result<(&KeyPath, &str)> {
    match locator {
        Locator::Registry { path, name } => Ok((path, name.as_str())),
        Locator::Template { .. } => Err(Error::LocatorMismatch {
            mechanism,
            locator: locator.to_string(),
        }),
    }
}

/// Split a template locator, rejecting registry locators.
pub(crate) fn template_locator(
    mechanism: Mechanism,
    locator: &Locator,
) -> Result<(&str, &str)> {
    match locator {
        Locator::Template { section, key } => Ok((section.as_str(), key.as_str())),
        Locator::Registry { .. } => Err(Error::LocatorMismatch {
            mechanism,
            locator: locator.to_string(),
        }),
    }
}
