//! Host tool invocation

use std::ffi::OsStr;
use std::process::Command;

use tracing::debug;

use crate::{Error, Result};

/// Captured result of a tool run
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub program: String,
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// Turn a non-zero exit into [`Error::ToolFailed`].
    pub fn into_success(self) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            let stderr = if self.stderr.trim().is_empty() {
                self.stdout.trim().to_string()
            } else {
                self.stderr.trim().to_string()
            };
            Err(Error::ToolFailed {
                program: self.program,
                code: self.code,
                stderr,
            })
        }
    }
}

/// Run a host tool to completion and capture its output.
///
/// A tool that cannot be started at all means the surface is unreachable on
/// this host.
pub fn run_tool<I, S>(program: &str, args: I) -> Result<ToolOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args);
    debug!(program, command = ?cmd, "Running host tool");

    let output = cmd
        .output()
        .map_err(|e| Error::unavailable(program, format!("cannot start tool: {}", e)))?;

    Ok(ToolOutput {
        program: program.to_string(),
        code: output.status.code().unwrap_or(-1),
        stdout: decode_output(&output.stdout),
        stderr: decode_output(&output.stderr),
    })
}

/// Decode tool output that may be UTF-16LE (with BOM) or UTF-8.
pub(crate) fn decode_output(bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_prefix(&[0xff, 0xfe]) {
        let units: Vec<u16> = rest
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_utf16_with_bom() {
        let mut bytes = vec![0xff, 0xfe];
        for unit in "[Unicode]".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        assert_eq!(decode_output(&bytes), "[Unicode]");
    }

    #[test]
    fn decodes_plain_utf8() {
        assert_eq!(decode_output(b"ok"), "ok");
    }

    #[test]
    fn missing_tool_is_reported_unavailable() {
        let err = run_tool("harden-no-such-tool-xyz", ["--version"]).unwrap_err();
        assert!(matches!(err, Error::SurfaceUnavailable { .. }));
    }

    #[test]
    fn failed_exit_becomes_tool_error() {
        let output = ToolOutput {
            program: "reg".to_string(),
            code: 1,
            stdout: String::new(),
            stderr: "ERROR: The system was unable to find the specified registry key".into(),
        };
        let err = output.into_success().unwrap_err();
        assert!(err.to_string().contains("unable to find"));
    }
}
