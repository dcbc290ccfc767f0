//! Native `reg.exe` binding

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use super::RegistryStore;
use super::tool::run_tool;
use crate::locator::KeyPath;
use crate::model::{NativeKind, NativeValue, parse_hex_bytes, parse_integer, to_hex};
use crate::{Error, Result};

/// A value line of `reg query` output: four-space separated name, type, data.
static QUERY_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^ {4}(?P<name>.+?) {4}(?P<kind>REG_[A-Z_]+)(?: {4}(?P<data>.*))?$")
        .expect("query line pattern is valid")
});

#[derive(Debug, Clone)]
pub struct RegExe {
    program: String,
}

impl Default for RegExe {
    fn default() -> Self {
        Self {
            program: "reg".to_string(),
        }
    }
}

impl RegExe {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RegistryStore for RegExe {
    fn key_exists(&self, key: &KeyPath) -> Result<bool> {
        let output = run_tool(&self.program, ["query".to_string(), key.native()])?;
        Ok(output.success())
    }

    fn get_value(&self, key: &KeyPath, name: &str) -> Result<Option<NativeValue>> {
        let output = run_tool(
            &self.program,
            ["query".to_string(), key.native(), "/v".to_string(), name.to_string()],
        )?;
        // Exit code 1 means the key or the value does not exist.
        if output.code == 1 {
            return Ok(None);
        }
        let output = output.into_success()?;

        output
            .stdout
            .lines()
            .filter_map(parse_query_line)
            .find(|(found, _)| found.eq_ignore_ascii_case(name))
            .map(|(_, value)| Ok(value))
            .transpose()
    }

    fn set_value(&mut self, key: &KeyPath, name: &str, value: &NativeValue) -> Result<()> {
        run_tool(
            &self.program,
            [
                "add".to_string(),
                key.native(),
                "/v".to_string(),
                name.to_string(),
                "/t".to_string(),
                value.kind().reg_name().to_string(),
                "/d".to_string(),
                encode_data(value),
                "/f".to_string(),
            ],
        )?
        .into_success()?;
        Ok(())
    }

    fn export_key(&self, key: &KeyPath, dest: &Path) -> Result<()> {
        if !self.key_exists(key)? {
            return Err(Error::SurfaceMissing {
                surface: key.canonical(),
            });
        }
        run_tool(
            &self.program,
            [
                "export".to_string(),
                key.native(),
                dest.display().to_string(),
                "/y".to_string(),
            ],
        )?
        .into_success()?;
        Ok(())
    }

    fn import_key(&mut self, _key: &KeyPath, artifact: &Path) -> Result<()> {
        run_tool(
            &self.program,
            ["import".to_string(), artifact.display().to_string()],
        )?
        .into_success()?;
        Ok(())
    }

    fn artifact_extension(&self) -> &'static str {
        "reg"
    }
}

/// Parse one `reg query` value line into its name and value.
pub(crate) fn parse_query_line(line: &str) -> Option<(String, NativeValue)> {
    let caps = QUERY_LINE.captures(line.trim_end_matches('\r'))?;
    let kind = NativeKind::from_reg_name(&caps["kind"])?;
    let data = caps.name("data").map(|m| m.as_str()).unwrap_or("");

    let value = match kind {
        NativeKind::Dword => NativeValue::Dword(u32::try_from(parse_integer(data)?).ok()?),
        NativeKind::Qword => NativeValue::Qword(parse_integer(data)? as u64),
        NativeKind::Sz => NativeValue::Sz(data.to_string()),
        NativeKind::ExpandSz => NativeValue::ExpandSz(data.to_string()),
        NativeKind::MultiSz if data.is_empty() => NativeValue::MultiSz(Vec::new()),
        NativeKind::MultiSz => {
            NativeValue::MultiSz(data.split("\\0").map(str::to_string).collect())
        }
        NativeKind::Binary => NativeValue::Binary(parse_hex_bytes(data)?),
    };
    Some((caps["name"].to_string(), value))
}

/// Data argument of `reg add /d` for a value.
fn encode_data(value: &NativeValue) -> String {
    match value {
        NativeValue::Dword(d) => d.to_string(),
        NativeValue::Qword(q) => q.to_string(),
        NativeValue::Sz(s) | NativeValue::ExpandSz(s) => s.clone(),
        NativeValue::MultiSz(items) => items.join("\\0"),
        NativeValue::Binary(bytes) => to_hex(bytes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("    AllowBasic    REG_DWORD    0x0", "AllowBasic", NativeValue::Dword(0))]
    #[case("    Max Size    REG_QWORD    0x100000000", "Max Size", NativeValue::Qword(1 << 32))]
    #[case("    Banner    REG_SZ    Authorized use only", "Banner", NativeValue::Sz("Authorized use only".into()))]
    #[case("    Path    REG_EXPAND_SZ    %SystemRoot%\\x", "Path", NativeValue::ExpandSz("%SystemRoot%\\x".into()))]
    #[case("    Lines    REG_MULTI_SZ    a\\0b", "Lines", NativeValue::MultiSz(vec!["a".into(), "b".into()]))]
    #[case("    Blob    REG_BINARY    01FF", "Blob", NativeValue::Binary(vec![1, 255]))]
    #[case("    Empty    REG_SZ", "Empty", NativeValue::Sz(String::new()))]
    fn parses_query_lines(#[case] line: &str, #[case] name: &str, #[case] value: NativeValue) {
        assert_eq!(parse_query_line(line), Some((name.to_string(), value)));
    }

    #[test]
    fn ignores_key_header_lines() {
        assert_eq!(
            parse_query_line("HKEY_LOCAL_MACHINE\\Software\\Policies\\Test"),
            None
        );
    }

    #[test]
    fn encodes_add_data() {
        assert_eq!(encode_data(&NativeValue::Dword(4)), "4");
        assert_eq!(
            encode_data(&NativeValue::MultiSz(vec!["a".into(), "b".into()])),
            "a\\0b"
        );
        assert_eq!(encode_data(&NativeValue::Binary(vec![0x0a, 0xff])), "0aff");
    }
}
