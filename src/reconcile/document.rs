//! Snapshot reader for structured config documents.

use crate::{Error, Result};
use serde_yaml::Value;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// A config file as it exists on disk.
///
/// Keeps the raw text next to the parsed tree: decisions are made on the
/// tree, edits are made on the text, so untouched lines (comments, key
/// order, quoting) survive byte-for-byte.
#[derive(Debug, Clone)]
pub struct ConfigDocument {
    path: PathBuf,
    raw: String,
    value: Value,
}

/// Result of reading a config path.
#[derive(Debug, Clone)]
pub enum Snapshot {
    /// Nothing at the path yet; needs creation from a template
    Absent,
    Present(ConfigDocument),
}

impl Snapshot {
    pub fn document(&self) -> Option<&ConfigDocument> {
        match self {
            Snapshot::Absent => None,
            Snapshot::Present(doc) => Some(doc),
        }
    }
}

/// Read and parse the document at `path`.
///
/// A missing file is [`Snapshot::Absent`], not an error. Content that is
/// not valid YAML is [`Error::Parse`] with the position when available.
pub fn read(path: &Path) -> Result<Snapshot> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(Snapshot::Present(ConfigDocument::parse(path, raw)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Snapshot::Absent),
        Err(e) => Err(Error::Io(e)),
    }
}

impl ConfigDocument {
    /// Parse raw text that was (or will be) stored at `path`.
    pub fn parse(path: &Path, raw: String) -> Result<Self> {
        let value: Value = serde_yaml::from_str(&raw).map_err(|e| {
            let location = e.location();
            Error::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
                line: location.as_ref().map(|l| l.line()),
                column: location.as_ref().map(|l| l.column()),
            }
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            raw,
            value,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The exact text the document was loaded from.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Whether the root is a mapping at all (empty files parse as null).
    pub fn is_mapping(&self) -> bool {
        self.value.is_mapping()
    }

    /// Look up a nested value by key path, e.g. `["spring", "datasource"]`.
    pub fn get_path(&self, keys: &[&str]) -> Option<&Value> {
        keys.iter()
            .try_fold(&self.value, |node, key| node.as_mapping()?.get(*key))
    }

    /// Top-level keys in document order.
    pub fn top_level_keys(&self) -> Vec<String> {
        self.value
            .as_mapping()
            .map(|m| {
                m.keys()
                    .filter_map(|k| k.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Render a scalar as the string an operator would have typed.
///
/// Returns `None` for null, mappings, and sequences.
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Tagged(tagged) => scalar_to_string(&tagged.value),
        _ => None,
    }
}

impl std::fmt::Display for ConfigDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}
