//! Security template (INF) documents
//!
//! Templates are the exchange format of the security-policy database:
//! `[Section]` headers followed by `Key = Value` lines. Exports from the
//! native tool are UTF-16LE with a BOM; both encodings are accepted on read
//! and templates are always written as UTF-16LE.

use std::path::Path;

use super::tool::decode_output;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    key: String,
    value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Section {
    name: String,
    entries: Vec<Entry>,
}

/// An in-memory security template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityTemplate {
    sections: Vec<Section>,
}

/// Header sections every template carries; never merged between templates.
const HEADER_SECTIONS: &[&str] = &["Unicode", "Version"];

impl Default for SecurityTemplate {
    fn default() -> Self {
        let mut template = Self {
            sections: Vec::new(),
        };
        template.set("Unicode", "Unicode", "yes");
        template.set("Version", "signature", "\"$CHICAGO$\"");
        template.set("Version", "Revision", "1");
        template
    }
}

impl SecurityTemplate {
    /// Empty template with the standard header sections.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse template text. Unknown lines are kept verbatim.
    pub fn parse(text: &str) -> Self {
        let mut sections: Vec<Section> = Vec::new();

        for line in text.lines() {
            let line = line.trim().trim_start_matches('\u{feff}');
            if line.is_empty() || line.starts_with(';') {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                sections.push(Section {
                    name: name.trim().to_string(),
                    entries: Vec::new(),
                });
                continue;
            }
            let Some(section) = sections.last_mut() else {
                continue;
            };
            let entry = match line.split_once('=') {
                Some((key, value)) => Entry {
                    key: key.trim().to_string(),
                    value: Some(value.trim().to_string()),
                },
                None => Entry {
                    key: line.to_string(),
                    value: None,
                },
            };
            section.entries.push(entry);
        }

        Self { sections }
    }

    /// Load a template file in either encoding.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| harden_fs::Error::io(path, e))?;
        Ok(Self::parse(&decode_output(&bytes)))
    }

    /// Write the template as UTF-16LE with a BOM.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut bytes = vec![0xff, 0xfe];
        for unit in self.render().encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        harden_fs::write_atomic(path, &bytes)?;
        Ok(())
    }

    /// Look up a setting; section and key match case-insensitively.
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.section(section)?
            .entries
            .iter()
            .find(|e| e.key.eq_ignore_ascii_case(key))
            .and_then(|e| e.value.as_deref())
    }

    /// Insert or replace a setting, creating the section when needed.
    pub fn set(&mut self, section: &str, key: &str, value: &str) {
        let index = match self
            .sections
            .iter()
            .position(|s| s.name.eq_ignore_ascii_case(section))
        {
            Some(index) => index,
            None => {
                self.sections.push(Section {
                    name: section.to_string(),
                    entries: Vec::new(),
                });
                self.sections.len() - 1
            }
        };

        let entries = &mut self.sections[index].entries;
        match entries.iter_mut().find(|e| e.key.eq_ignore_ascii_case(key)) {
            Some(entry) => entry.value = Some(value.to_string()),
            None => entries.push(Entry {
                key: key.to_string(),
                value: Some(value.to_string()),
            }),
        }
    }

    /// Apply every setting of `other` on top of this template.
    pub fn merge(&mut self, other: &SecurityTemplate) {
        for section in &other.sections {
            if HEADER_SECTIONS
                .iter()
                .any(|h| h.eq_ignore_ascii_case(&section.name))
            {
                continue;
            }
            for entry in &section.entries {
                if let Some(value) = &entry.value {
                    self.set(&section.name, &entry.key, value);
                }
            }
        }
    }

    /// Template text with CRLF line endings.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for section in &self.sections {
            out.push_str(&format!("[{}]\r\n", section.name));
            for entry in &section.entries {
                match &entry.value {
                    Some(value) => out.push_str(&format!("{} = {}\r\n", entry.key, value)),
                    None => out.push_str(&format!("{}\r\n", entry.key)),
                }
            }
        }
        out
    }

    fn section(&self, name: &str) -> Option<&Section> {
        self.sections
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
    }
}
