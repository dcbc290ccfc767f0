//! [`TestHost`]: a temporary directory standing in for a host.

use std::fs;
use std::path::{Path, PathBuf};

use harden_core::{
    ChangeSet, Locator, Mechanism, MechanismSet, PolicyValue, RunOptions, StoreOptions,
};
use tempfile::TempDir;

/// A sandboxed host whose three configuration surfaces are file stores
///
/// # Example
///
/// ```rust,no_run
/// use harden_test_utils::{TestHost, changes};
///
/// let host = TestHost::new();
/// host.seed_dword("HKLM\\Software\\Test", "Level", 3);
/// let report = harden_core::Orchestrator::new(changes::baseline(), host.options())
///     .unwrap()
///     .run()
///     .unwrap();
/// ```
pub struct TestHost {
    temp_dir: TempDir,
}

impl Default for TestHost {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHost {
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("TestHost::new: failed to create temp dir"),
        }
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Directory holding the file stores.
    pub fn state_dir(&self) -> PathBuf {
        self.root().join("state")
    }

    /// Directory receiving run directories.
    pub fn backup_dir(&self) -> PathBuf {
        self.root().join("backups")
    }

    pub fn stores(&self) -> StoreOptions {
        StoreOptions::files_in(&self.state_dir())
    }

    /// Live run options over this host's stores.
    pub fn options(&self) -> RunOptions {
        RunOptions {
            backup_location: self.backup_dir(),
            stores: self.stores(),
            ..RunOptions::default()
        }
    }

    /// Fresh live adapters over this host's stores.
    pub fn adapters(&self) -> MechanismSet {
        MechanismSet::from_stores(&self.stores())
    }

    /// Write a value through a mechanism, outside of any run.
    pub fn seed(&self, mechanism: Mechanism, locator: &Locator, value: PolicyValue) {
        self.adapters()
            .get_mut(mechanism)
            .write(locator, &value, false)
            .expect("TestHost::seed: write failed");
    }

    pub fn seed_dword(&self, key: &str, name: &str, value: i64) {
        let locator = Locator::registry(key, name).expect("TestHost::seed_dword: bad key");
        self.seed(Mechanism::KeyValue, &locator, PolicyValue::Integer(value));
    }

    /// Current value of a target.
    pub fn read(&self, mechanism: Mechanism, locator: &Locator) -> Option<PolicyValue> {
        self.adapters()
            .get(mechanism)
            .read(locator)
            .expect("TestHost::read: read failed")
    }

    pub fn read_registry(&self, key: &str, name: &str) -> Option<PolicyValue> {
        let locator = Locator::registry(key, name).expect("TestHost::read_registry: bad key");
        self.read(Mechanism::KeyValue, &locator)
    }

    /// Write a change set as JSON and return its path.
    pub fn write_change_set(&self, name: &str, changes: &ChangeSet) -> PathBuf {
        let path = self.root().join(name);
        let json = serde_json::to_string_pretty(changes).expect("change set serializes");
        fs::write(&path, json).expect("TestHost::write_change_set: write failed");
        path
    }

    /// Write a configuration file pointing at this host's stores and backup
    /// directory, followed by `extra` TOML lines.
    pub fn write_config(&self, extra: &str) -> PathBuf {
        let state = self.state_dir();
        let path = self.root().join("harden.toml");
        let content = format!(
            "backup_location = '{}'\n{}\n\n[stores.registry]\nkind = \"file\"\npath = '{}'\n\n[stores.security]\nkind = \"file\"\npath = '{}'\n\n[stores.policy]\nkind = \"file\"\npath = '{}'\n",
            self.backup_dir().display(),
            extra,
            state.join("registry.json").display(),
            state.join("secpol.inf").display(),
            state.join("policy.txt").display(),
        );
        fs::write(&path, content).expect("TestHost::write_config: write failed");
        path
    }

    /// The single run directory under the backup location.
    pub fn only_run_dir(&self) -> PathBuf {
        let mut runs: Vec<PathBuf> = fs::read_dir(self.backup_dir())
            .expect("backup dir exists")
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_dir())
            .collect();
        assert_eq!(runs.len(), 1, "expected exactly one run directory, found {runs:?}");
        runs.remove(0)
    }
}
