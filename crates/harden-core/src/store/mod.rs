//! Host bindings behind the mechanism adapters
//!
//! Each configuration surface is reached through a small store trait with two
//! bindings: a file-backed one (offline images, staging hosts, tests) and a
//! native one that drives the platform tool (`reg.exe`, `secedit.exe`,
//! `LGPO.exe`). Adapters only ever talk to the traits.

mod file_registry;
mod inf;
mod lgpo;
mod reg_exe;
mod security_db;
mod tool;

pub use file_registry::FileRegistry;
pub use inf::SecurityTemplate;
pub use lgpo::{LgpoTool, PolicyDocument, PolicyEntry, PolicyScope, TextPolicyStore};
pub use reg_exe::RegExe;
pub use security_db::{InfDatabase, Secedit};
pub use tool::{ToolOutput, run_tool};
pub(crate) use tool::decode_output;

use std::path::Path;

use crate::Result;
use crate::locator::KeyPath;
use crate::model::NativeValue;

/// Hierarchical key-value store (the registry)
pub trait RegistryStore {
    /// Whether the key exists.
    fn key_exists(&self, key: &KeyPath) -> Result<bool>;

    /// Read a named value, `None` when the key or value is absent.
    fn get_value(&self, key: &KeyPath, name: &str) -> Result<Option<NativeValue>>;

    /// Write a named value, creating the key when needed.
    fn set_value(&mut self, key: &KeyPath, name: &str, value: &NativeValue) -> Result<()>;

    /// Export the key and its subkeys to `dest`.
    ///
    /// Fails with [`crate::Error::SurfaceMissing`] when the key does not exist.
    fn export_key(&self, key: &KeyPath, dest: &Path) -> Result<()>;

    /// Restore a key from an artifact produced by [`RegistryStore::export_key`].
    fn import_key(&mut self, key: &KeyPath, artifact: &Path) -> Result<()>;

    /// File extension of exported artifacts.
    fn artifact_extension(&self) -> &'static str;
}

/// Security-policy database configured through security templates
pub trait SecurityDatabase {
    /// Export the full current policy as a template file.
    fn export(&self, dest: &Path) -> Result<()>;

    /// Configure the database from a template file.
    fn configure(&mut self, template: &Path) -> Result<()>;

    /// Return the database to the state captured in an exported template.
    ///
    /// Databases that can only merge fall back to [`SecurityDatabase::configure`].
    fn restore(&mut self, template: &Path) -> Result<()> {
        self.configure(template)
    }
}

/// Local group-policy store addressed through LGPO text descriptors
pub trait PolicyStore {
    /// Export every entry of a scope as a descriptor.
    fn export(&self, scope: PolicyScope, dest: &Path) -> Result<()>;

    /// Merge the entries of a descriptor into the store.
    fn import(&mut self, descriptor: &Path) -> Result<()>;

    /// Return a scope to the state captured in a descriptor.
    ///
    /// Stores that can only merge fall back to [`PolicyStore::import`].
    fn restore(&mut self, _scope: PolicyScope, descriptor: &Path) -> Result<()> {
        self.import(descriptor)
    }
}
