//! Schema 1 manifest migration
//!
//! Schema 1 looked like this:
//!
//! ```json
//! {
//!   "timestamp": "2024-03-01T10:00:00Z",
//!   "hostname": "WS-01",
//!   "backups": {
//!     "registry": ["C:\\backups\\reg_1.reg", "C:\\backups\\reg_2.reg"],
//!     "security_policy": "C:\\backups\\secpol.inf",
//!     "group_policy": "C:\\backups\\machine.txt"
//!   }
//! }
//! ```
//!
//! Each value is either one path or a list of paths. Surfaces were not
//! recorded, so they are recovered from the artifacts themselves where
//! possible. Records keep the order of the fields and paths in the document,
//! which is the order the surfaces were backed up in.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use super::{BackupRecord, HostInfo, MANIFEST_VERSION, RollbackManifest, resolve_artifact};
use crate::locator::KeyPath;
use crate::mechanism::SurfaceId;
use crate::model::Mechanism;
use crate::store::{PolicyScope, decode_output};
use crate::{Error, Result};

pub(super) fn migrate(value: &Value, origin: &Path) -> Result<RollbackManifest> {
    let corrupt = |message: String| Error::ManifestCorrupt {
        message: format!("{}: {}", origin.display(), message),
    };

    let backups = value
        .get("backups")
        .and_then(Value::as_object)
        .ok_or_else(|| corrupt("schema 1 manifest has no 'backups' map".to_string()))?;

    let timestamp = value
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    let mut host = HostInfo::current();
    if let Some(hostname) = value.get("hostname").and_then(Value::as_str) {
        host.hostname = hostname.to_string();
    }

    let mut records = Vec::new();
    for (field, paths) in backups {
        let Some(mechanism) = mechanism_for(field) else {
            warn!(field = %field, "Ignoring unknown schema 1 backup field");
            continue;
        };
        for raw in scalar_or_list(paths).map_err(|m| corrupt(format!("{}: {}", field, m)))? {
            let artifact = resolve_artifact(origin, Path::new(&raw));
            let surface = SurfaceId::new(mechanism, legacy_scope(mechanism, &artifact));
            let mut record = if artifact.exists() {
                BackupRecord::captured(surface, artifact, None)
            } else {
                BackupRecord::failed(surface, format!("artifact {} is missing", raw))
            };
            record.timestamp = timestamp;
            records.push(record);
        }
    }

    debug!(records = records.len(), "Migrated schema 1 manifest");
    Ok(RollbackManifest {
        version: MANIFEST_VERSION,
        run_id: value
            .get("run_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("legacy-{}", timestamp.format("%Y%m%dT%H%M%S"))),
        created: timestamp,
        host,
        records,
    })
}

fn mechanism_for(field: &str) -> Option<Mechanism> {
    match field {
        "registry" | "key_value" => Some(Mechanism::KeyValue),
        "security_policy" | "security_template" => Some(Mechanism::SecurityTemplate),
        "group_policy" => Some(Mechanism::GroupPolicy),
        _ => None,
    }
}

fn scalar_or_list(value: &Value) -> std::result::Result<Vec<String>, String> {
    match value {
        Value::String(path) => Ok(vec![path.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| format!("{} is not a path", item))
            })
            .collect(),
        Value::Null => Ok(Vec::new()),
        other => Err(format!("expected a path or list of paths, got {}", other)),
    }
}

/// Recover the surface scope a schema 1 artifact belongs to.
fn legacy_scope(mechanism: Mechanism, artifact: &Path) -> String {
    match mechanism {
        Mechanism::SecurityTemplate => "database".to_string(),
        Mechanism::GroupPolicy => {
            let stem = file_stem(artifact).to_ascii_lowercase();
            if stem.contains("user") {
                PolicyScope::User.as_str().to_string()
            } else {
                PolicyScope::Computer.as_str().to_string()
            }
        }
        Mechanism::KeyValue => exported_key(artifact)
            .map(|key| key.canonical())
            .unwrap_or_else(|| file_stem(artifact)),
    }
}

/// First key named in a registry export, in either export format.
fn exported_key(artifact: &Path) -> Option<KeyPath> {
    let bytes = std::fs::read(artifact).ok()?;
    let text = decode_output(&bytes);

    if let Ok(json) = serde_json::from_str::<Value>(&text) {
        return json.get("root")?.as_str().and_then(|r| KeyPath::parse(r).ok());
    }
    text.lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix('[')?.strip_suffix(']'))
        .and_then(|key| KeyPath::parse(key).ok())
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalar_and_list_fields_become_records() {
        let dir = tempfile::tempdir().unwrap();
        let reg = dir.path().join("reg_1.reg");
        std::fs::write(
            &reg,
            "Windows Registry Editor Version 5.00\r\n\r\n[HKEY_LOCAL_MACHINE\\Software\\Policies\\Test]\r\n\"Level\"=dword:00000001\r\n",
        )
        .unwrap();
        let inf = dir.path().join("secpol.inf");
        std::fs::write(&inf, "[Unicode]\r\nUnicode=yes\r\n").unwrap();

        let value = json!({
            "timestamp": "2024-03-01T10:00:00Z",
            "hostname": "WS-01",
            "backups": {
                "registry": [reg.display().to_string(), "missing.reg"],
                "security_policy": inf.display().to_string(),
            }
        });
        let manifest = migrate(&value, &dir.path().join("manifest.json")).unwrap();

        assert_eq!(manifest.version(), MANIFEST_VERSION);
        assert_eq!(manifest.host.hostname, "WS-01");
        assert_eq!(manifest.records().len(), 3);

        let registry: Vec<_> = manifest
            .records()
            .iter()
            .filter(|r| r.mechanism() == Mechanism::KeyValue)
            .collect();
        assert_eq!(registry[0].surface.scope, "HKLM:\\Software\\Policies\\Test");
        assert!(registry[0].success);
        assert!(!registry[1].success);

        let security = manifest
            .records()
            .iter()
            .find(|r| r.mechanism() == Mechanism::SecurityTemplate)
            .unwrap();
        assert_eq!(security.surface.scope, "database");
    }

    #[test]
    fn records_follow_document_order() {
        let text = r#"{"backups": {
            "security_policy": "secpol.inf",
            "registry": ["b.reg", "a.reg"],
            "group_policy": "machine.txt"
        }}"#;
        let manifest = RollbackManifest::parse(text, Path::new("/nowhere/manifest.json")).unwrap();

        let order: Vec<_> = manifest.records().iter().map(|r| r.mechanism()).collect();
        assert_eq!(
            order,
            vec![
                Mechanism::SecurityTemplate,
                Mechanism::KeyValue,
                Mechanism::KeyValue,
                Mechanism::GroupPolicy,
            ]
        );
        assert_eq!(manifest.records()[1].surface.scope, "b");
    }

    #[test]
    fn missing_backups_map_is_corrupt() {
        let err = migrate(&json!({"timestamp": "x"}), Path::new("m.json")).unwrap_err();
        assert!(matches!(err, Error::ManifestCorrupt { .. }));
    }

    #[test]
    fn loads_through_manifest_parse() {
        let text = r#"{"backups": {"group_policy": "user_policy.txt"}}"#;
        let manifest = RollbackManifest::parse(text, Path::new("/nowhere/manifest.json")).unwrap();
        let record = &manifest.records()[0];
        assert_eq!(record.surface.scope, "user");
        assert!(!record.success);
    }
}
