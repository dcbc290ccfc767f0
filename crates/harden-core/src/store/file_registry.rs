//! File-backed registry hive
//!
//! The whole hive set lives in one JSON document that is re-read on every
//! operation and rewritten atomically on every mutation, so the file is the
//! single source of truth even when other processes edit it between steps.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::RegistryStore;
use crate::locator::KeyPath;
use crate::model::NativeValue;
use crate::{Error, Result};

const DEFAULT_HIVES: &[&str] = &["HKLM", "HKCU", "HKU", "HKCR"];
const EXPORT_FORMAT: &str = "harden-hive-export/1";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct HiveDocument {
    mounted: Vec<String>,
    keys: BTreeMap<String, KeyNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KeyNode {
    path: KeyPath,
    #[serde(default)]
    values: BTreeMap<String, NativeValue>,
}

impl KeyNode {
    fn find(&self, name: &str) -> Option<(&String, &NativeValue)> {
        self.values
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
    }
}

/// Exported subtree, the backup artifact of one key surface
#[derive(Debug, Serialize, Deserialize)]
struct KeyExport {
    format: String,
    root: KeyPath,
    keys: Vec<KeyNode>,
}

/// Registry store persisted as a JSON document
#[derive(Debug, Clone)]
pub struct FileRegistry {
    path: PathBuf,
    hives: Vec<String>,
}

impl FileRegistry {
    /// Open a hive document, mounting the default hives when it is new.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self::with_hives(path, DEFAULT_HIVES)
    }

    /// Open a hive document; a new document mounts exactly `hives`.
    ///
    /// Keys under any other authority are permanently unavailable.
    pub fn with_hives(path: impl Into<PathBuf>, hives: &[&str]) -> Self {
        Self {
            path: path.into(),
            hives: hives.iter().map(|h| h.to_ascii_uppercase()).collect(),
        }
    }

    /// Path of the backing document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<HiveDocument> {
        if !self.path.exists() {
            return Ok(HiveDocument {
                mounted: self.hives.clone(),
                keys: BTreeMap::new(),
            });
        }
        let content = harden_fs::read_text(&self.path)?;
        serde_json::from_str(&content)
            .map_err(|e| Error::parse("hive document", &self.path, e.to_string()))
    }

    fn save(&self, doc: &HiveDocument) -> Result<()> {
        let content = serde_json::to_string_pretty(doc)?;
        harden_fs::write_text(&self.path, &content)?;
        Ok(())
    }

    fn load_mounted(&self, key: &KeyPath) -> Result<HiveDocument> {
        let doc = self.load()?;
        if !doc.mounted.iter().any(|h| h == key.authority()) {
            return Err(Error::unavailable(
                key.canonical(),
                format!("hive {} is not loaded", key.authority()),
            ));
        }
        Ok(doc)
    }
}

impl RegistryStore for FileRegistry {
    fn key_exists(&self, key: &KeyPath) -> Result<bool> {
        let doc = self.load_mounted(key)?;
        Ok(doc.keys.values().any(|node| key.contains(&node.path)))
    }

    fn get_value(&self, key: &KeyPath, name: &str) -> Result<Option<NativeValue>> {
        let doc = self.load_mounted(key)?;
        Ok(doc
            .keys
            .get(&key.identity())
            .and_then(|node| node.find(name))
            .map(|(_, value)| value.clone()))
    }

    fn set_value(&mut self, key: &KeyPath, name: &str, value: &NativeValue) -> Result<()> {
        let mut doc = self.load_mounted(key)?;
        let node = doc.keys.entry(key.identity()).or_insert_with(|| KeyNode {
            path: key.clone(),
            values: BTreeMap::new(),
        });

        let stored_name = node
            .find(name)
            .map(|(existing, _)| existing.clone())
            .unwrap_or_else(|| name.to_string());
        node.values.insert(stored_name, value.clone());

        self.save(&doc)?;
        debug!(key = %key, name, "Hive value written");
        Ok(())
    }

    fn export_key(&self, key: &KeyPath, dest: &Path) -> Result<()> {
        let doc = self.load_mounted(key)?;
        let keys: Vec<KeyNode> = doc
            .keys
            .values()
            .filter(|node| key.contains(&node.path))
            .cloned()
            .collect();

        if keys.is_empty() {
            return Err(Error::SurfaceMissing {
                surface: key.canonical(),
            });
        }

        let export = KeyExport {
            format: EXPORT_FORMAT.to_string(),
            root: key.clone(),
            keys,
        };
        harden_fs::write_text(dest, &serde_json::to_string_pretty(&export)?)?;
        Ok(())
    }

    fn import_key(&mut self, key: &KeyPath, artifact: &Path) -> Result<()> {
        let content = harden_fs::read_text(artifact)?;
        let export: KeyExport = serde_json::from_str(&content).map_err(|e| {
            Error::ManifestCorrupt {
                message: format!("{}: {}", artifact.display(), e),
            }
        })?;

        if export.format != EXPORT_FORMAT || export.root != *key {
            return Err(Error::ManifestCorrupt {
                message: format!(
                    "{} holds {} ({}), expected {}",
                    artifact.display(),
                    export.root,
                    export.format,
                    key
                ),
            });
        }

        let mut doc = self.load_mounted(key)?;
        doc.keys.retain(|_, node| !key.contains(&node.path));
        for node in export.keys {
            doc.keys.insert(node.path.identity(), node);
        }
        self.save(&doc)
    }

    fn artifact_extension(&self) -> &'static str {
        "json"
    }
}
