//! `key: value` text records.
//!
//! Used for the configuration file and for the lock and failure records.
//! One key per line, whitespace around keys and values is ignored, the value
//! starts after the first `:`, blank lines and `#` comments are skipped.
//! A key may appear only once.

use crate::errors::RecordError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    entries: Vec<(String, String)>,
}

impl Record {
    pub fn parse(text: &str) -> Result<Self, RecordError> {
        let mut entries: Vec<(String, String)> = Vec::new();

        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once(':') else {
                return Err(RecordError::Malformed {
                    line: idx + 1,
                    content: line.to_string(),
                });
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(RecordError::Malformed {
                    line: idx + 1,
                    content: line.to_string(),
                });
            }
            if entries.iter().any(|(k, _)| k == key) {
                return Err(RecordError::DuplicateKey {
                    line: idx + 1,
                    key: key.to_string(),
                });
            }
            entries.push((key.to_string(), value.trim().to_string()));
        }

        Ok(Self { entries })
    }

    /// Value for `key`, or `None` if absent or blank.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn push(&mut self, key: &str, value: impl ToString) {
        self.entries.push((key.to_string(), value.to_string()));
    }

    /// Render back to text. Newlines inside values are flattened to spaces
    /// so a record always reads back with the same keys.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.entries {
            out.push_str(key);
            out.push_str(": ");
            out.push_str(&value.replace(['\r', '\n'], " "));
            out.push('\n');
        }
        out
    }
}
