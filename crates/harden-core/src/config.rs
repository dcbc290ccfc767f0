//! Run configuration
//!
//! [`RunOptions`] controls one orchestrator run. Options come from an optional
//! `harden.toml`, resolved in this order (first hit wins):
//!
//! 1. An explicit path (`--config`)
//! 2. `./harden.toml`
//! 3. `<config_dir>/harden/harden.toml` (via `dirs::config_dir()`)
//!
//! Missing files fall back to defaults; command-line flags are applied on top
//! by the caller.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result};

/// Configuration file name
pub const CONFIG_FILE: &str = "harden.toml";

/// How adapters reach the host
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Adapters mutate the configured stores directly
    #[default]
    Live,
    /// Adapters append equivalent commands to a procedure script
    Render,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Live => f.write_str("live"),
            Self::Render => f.write_str("render"),
        }
    }
}

impl std::str::FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "live" => Ok(Self::Live),
            "render" => Ok(Self::Render),
            other => Err(format!("unknown mode '{}' (expected live or render)", other)),
        }
    }
}

/// Registry binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RegistryBinding {
    /// JSON hive document
    File { path: PathBuf },
    /// `reg.exe`
    Native,
}

/// Security database binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SecurityBinding {
    /// Security template file acting as the database
    File { path: PathBuf },
    /// `secedit.exe`
    Native,
}

/// Group-policy binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PolicyBinding {
    /// LGPO text descriptor holding both scopes
    File { path: PathBuf },
    /// `LGPO.exe`, optionally at an explicit path
    Native {
        #[serde(default)]
        lgpo: Option<String>,
    },
}

/// Host store bindings for the three mechanisms
///
/// Windows hosts default to the native tools; everywhere else the file-backed
/// stores under `./harden-state/` are used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    pub registry: RegistryBinding,
    pub security: SecurityBinding,
    pub policy: PolicyBinding,
}

impl Default for StoreOptions {
    fn default() -> Self {
        if cfg!(windows) {
            Self {
                registry: RegistryBinding::Native,
                security: SecurityBinding::Native,
                policy: PolicyBinding::Native { lgpo: None },
            }
        } else {
            Self::files_in(Path::new("harden-state"))
        }
    }
}

impl StoreOptions {
    /// File-backed stores inside one directory.
    pub fn files_in(dir: &Path) -> Self {
        Self {
            registry: RegistryBinding::File {
                path: dir.join("registry.json"),
            },
            security: SecurityBinding::File {
                path: dir.join("secpol.inf"),
            },
            policy: PolicyBinding::File {
                path: dir.join("policy.txt"),
            },
        }
    }
}

/// Options for one orchestrator run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOptions {
    /// Compute and log intended changes without mutating anything
    pub dry_run: bool,
    /// Back up every touched surface before the first write
    pub create_backup: bool,
    /// Directory receiving one sub-directory per run
    pub backup_location: PathBuf,
    /// Stop before any write when a surface backup failed
    pub abort_on_backup_failure: bool,
    /// Skip the verification pass
    pub skip_verification: bool,
    /// Restart the host at the end of a live run
    pub force_reboot: bool,
    pub mode: ExecutionMode,
    pub stores: StoreOptions,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            create_backup: true,
            backup_location: PathBuf::from("harden-backups"),
            abort_on_backup_failure: false,
            skip_verification: false,
            force_reboot: false,
            mode: ExecutionMode::Live,
            stores: StoreOptions::default(),
        }
    }
}

impl RunOptions {
    /// Parse options from TOML text.
    pub fn from_toml(content: &str, origin: &Path) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Load options from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = harden_fs::read_text(path)?;
        Self::from_toml(&content, path)
    }

    /// Resolve options from the first configuration file found.
    ///
    /// An explicit path must exist; the implicit locations are optional.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(Error::Config {
                    path: path.to_path_buf(),
                    message: "configuration file not found".to_string(),
                });
            }
            return Self::load(path);
        }

        let candidates = [
            Some(PathBuf::from(CONFIG_FILE)),
            dirs::config_dir().map(|d| d.join("harden").join(CONFIG_FILE)),
        ];
        for candidate in candidates.into_iter().flatten() {
            if candidate.exists() {
                debug!(path = %candidate.display(), "Using configuration file");
                return Self::load(&candidate);
            }
        }

        debug!("No configuration file found; using defaults");
        Ok(Self::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_back_up_and_verify() {
        let options = RunOptions::default();
        assert!(options.create_backup);
        assert!(!options.abort_on_backup_failure);
        assert!(!options.skip_verification);
        assert_eq!(options.mode, ExecutionMode::Live);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let options = RunOptions::from_toml(
            r#"
            abort_on_backup_failure = true
            backup_location = "D:/backups"
            mode = "render"

            [stores.registry]
            kind = "file"
            path = "state/hive.json"
            "#,
            Path::new("harden.toml"),
        )
        .unwrap();

        assert!(options.abort_on_backup_failure);
        assert!(options.create_backup);
        assert_eq!(options.backup_location, PathBuf::from("D:/backups"));
        assert_eq!(options.mode, ExecutionMode::Render);
        assert_eq!(
            options.stores.registry,
            RegistryBinding::File {
                path: PathBuf::from("state/hive.json")
            }
        );
    }

    #[test]
    fn native_policy_binding_accepts_tool_path() {
        let options = RunOptions::from_toml(
            "[stores.policy]\nkind = \"native\"\nlgpo = 'C:\\Tools\\LGPO.exe'\n",
            Path::new("harden.toml"),
        )
        .unwrap();
        assert_eq!(
            options.stores.policy,
            PolicyBinding::Native {
                lgpo: Some("C:\\Tools\\LGPO.exe".to_string())
            }
        );
    }

    #[test]
    fn invalid_file_is_a_config_error() {
        let err = RunOptions::from_toml("dry_run = 'maybe'", Path::new("harden.toml")).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = RunOptions::discover(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }
}
