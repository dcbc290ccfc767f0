//! Standalone PowerShell reversal procedure
//!
//! [`reversal_script`] renders the same walk the [`crate::reverse::Reverser`]
//! performs: newest record first, checksum checked before each restore, one
//! failure never stopping the others.

use std::path::Path;

use crate::manifest::{RollbackManifest, resolve_artifact};
use crate::model::Mechanism;

/// Single-quoted PowerShell literal.
pub(crate) fn ps_quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Script that restores every recorded surface of `manifest`.
pub fn reversal_script(manifest: &RollbackManifest, manifest_path: &Path) -> String {
    let mut lines = vec![
        "#Requires -RunAsAdministrator".to_string(),
        format!(
            "# Reversal procedure for run {} (host {}, created {})",
            manifest.run_id,
            manifest.host.hostname,
            manifest.created.to_rfc3339()
        ),
        "$ErrorActionPreference = 'Stop'".to_string(),
        "$failed = 0".to_string(),
        String::new(),
    ];

    for record in manifest.records().iter().rev() {
        lines.push(format!("# {}", record.surface));

        let artifact = match &record.artifact {
            Some(artifact) if record.success && !record.absent => {
                resolve_artifact(manifest_path, artifact)
            }
            _ => {
                let reason = if record.absent {
                    "surface did not exist before the run"
                } else {
                    "no artifact recorded"
                };
                lines.push(format!(
                    "Write-Warning {}",
                    ps_quote(&format!("Skipping {}: {}", record.surface, reason))
                ));
                lines.push(String::new());
                continue;
            }
        };
        let quoted = ps_quote(&artifact.display().to_string());

        lines.push("try {".to_string());
        lines.push(format!(
            "    if (-not (Test-Path -LiteralPath {})) {{ throw 'artifact missing' }}",
            quoted
        ));
        if let Some(checksum) = &record.checksum {
            let hex = checksum.strip_prefix("sha256:").unwrap_or(checksum);
            lines.push(format!(
                "    if ((Get-FileHash -Algorithm SHA256 -LiteralPath {}).Hash -ne {}) {{ throw 'checksum mismatch' }}",
                quoted,
                ps_quote(&hex.to_ascii_uppercase())
            ));
        }
        lines.extend(restore_commands(record.mechanism(), &quoted, &artifact));
        lines.push(format!(
            "    Write-Host {}",
            ps_quote(&format!("Restored {}", record.surface))
        ));
        lines.push("} catch {".to_string());
        lines.push(format!(
            "    Write-Warning (\"Restore failed for {}: \" + $_)",
            record.surface.to_string().replace('"', "`\"").replace('$', "`$")
        ));
        lines.push("    $failed++".to_string());
        lines.push("}".to_string());
        lines.push(String::new());
    }

    lines.push("if ($failed -gt 0) { exit 1 }".to_string());
    lines.push(String::new());
    lines.join("\r\n")
}

fn restore_commands(mechanism: Mechanism, quoted: &str, artifact: &Path) -> Vec<String> {
    let extension = artifact
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    match (mechanism, extension.as_str()) {
        (Mechanism::KeyValue, "reg") => vec![format!(
            "    reg.exe import {}; if ($LASTEXITCODE -ne 0) {{ throw \"reg.exe exited $LASTEXITCODE\" }}",
            quoted
        )],
        (Mechanism::SecurityTemplate, _) => vec![
            "    $db = Join-Path $env:TEMP ('harden-' + [guid]::NewGuid() + '.sdb')".to_string(),
            format!(
                "    secedit.exe /configure /db $db /cfg {} /areas SECURITYPOLICY USER_RIGHTS /quiet",
                quoted
            ),
            "    if ($LASTEXITCODE -ne 0) { throw \"secedit.exe exited $LASTEXITCODE\" }".to_string(),
        ],
        (Mechanism::GroupPolicy, _) => vec![format!(
            "    LGPO.exe /t {}; if ($LASTEXITCODE -ne 0) {{ throw \"LGPO.exe exited $LASTEXITCODE\" }}",
            quoted
        )],
        (Mechanism::KeyValue, _) => {
            vec!["    throw 'file-backed hive export cannot be replayed with reg.exe; use harden rollback'".to_string()]
        }
    }
}
