use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::extract::Record;

pub const SNAPSHOT_FILE: &str = ".unit_mappings.json";

/// Unit vocabulary: short token -> canonical unit name, in file order.
/// File order is the scan order, so it is kept as a list rather than a map.
#[derive(Debug, Clone, Default)]
pub struct UnitTable {
    entries: Vec<(String, String)>,
}

impl UnitTable {
    /// Parse a line-oriented `token-canonicalName` file. A missing file is
    /// not an error (empty table); malformed lines are skipped.
    pub fn load(path: &Path) -> Self {
        let text = match fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) => {
                warn!("No unit table at {}: {}", path.display(), e);
                return Self::default();
            }
        };
        let mut entries = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match line.split_once('-') {
                Some((token, name)) if !token.is_empty() && !name.is_empty() => {
                    entries.push((token.to_string(), name.to_string()));
                }
                _ => warn!("Skipping malformed unit line: {:?}", line),
            }
        }
        Self { entries }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(t, n)| (t.as_str(), n.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Per-field memo of the renamed key and the tokens to strip from values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMapping {
    pub renamed: String,
    pub tokens: Vec<String>,
}

/// Detects unit tokens embedded in field values, renames the field with a
/// `(canonical unit)` suffix, strips the tokens and coerces what remains to a
/// number when possible. The first record to show a field decides its mapping;
/// every later record reuses it even if its own value lacks the token, so the
/// output schema stays stable.
pub struct UnitNormalizer {
    table: UnitTable,
    mappings: HashMap<String, FieldMapping>,
    snapshot_path: PathBuf,
}

impl UnitNormalizer {
    pub fn new(table: UnitTable, snapshot_path: PathBuf) -> Self {
        let mappings = load_snapshot(&snapshot_path);
        Self {
            table,
            mappings,
            snapshot_path,
        }
    }

    pub fn normalize(&mut self, record: Record) -> Record {
        let mut out = Record::new();
        for (key, val) in record {
            let raw = match &val {
                Value::Null => String::new(),
                Value::String(s) => s.trim().to_string(),
                other => other.to_string().trim().to_string(),
            };

            let mapping = self
                .mappings
                .entry(key.clone())
                .or_insert_with(|| detect_units(&key, &raw, &self.table));

            if matches!(val, Value::Null) {
                out.insert(mapping.renamed.clone(), Value::Null);
                continue;
            }

            let mut stripped = raw;
            for token in &mapping.tokens {
                stripped = stripped.replace(token.as_str(), "");
            }
            out.insert(mapping.renamed.clone(), coerce_number(stripped));
        }
        out
    }

    pub fn persist(&self) -> Result<()> {
        let json = serde_json::to_string(&self.mappings)?;
        fs::write(&self.snapshot_path, json)?;
        Ok(())
    }

    #[cfg(test)]
    pub fn mapping(&self, key: &str) -> Option<&FieldMapping> {
        self.mappings.get(key)
    }
}

/// Scan the table in order; every token found as a substring of the value
/// contributes a `(canonical name)` suffix and is recorded for stripping.
fn detect_units(key: &str, value: &str, table: &UnitTable) -> FieldMapping {
    let mut renamed = key.to_string();
    let mut tokens = Vec::new();
    for (token, name) in table.iter() {
        if value.contains(token) {
            renamed.push_str(&format!("({})", name));
            tokens.push(token.to_string());
        }
    }
    FieldMapping { renamed, tokens }
}

/// Drop thousands separators and parse as a float; exact integers narrow to
/// integer. On parse failure the stripped string is kept as-is, commas
/// included.
fn coerce_number(stripped: String) -> Value {
    let candidate = stripped.replace(',', "");
    match candidate.parse::<f64>() {
        Ok(n) if n.fract() == 0.0 && n.abs() < i64::MAX as f64 => Value::from(n as i64),
        Ok(n) => match serde_json::Number::from_f64(n) {
            Some(num) => Value::Number(num),
            None => Value::String(stripped),
        },
        Err(_) => Value::String(stripped),
    }
}

fn load_snapshot(path: &Path) -> HashMap<String, FieldMapping> {
    match fs::read_to_string(path) {
        Ok(text) => match serde_json::from_str(&text) {
            Ok(m) => m,
            Err(e) => {
                warn!("Unable to load unit mappings from {}: {}", path.display(), e);
                HashMap::new()
            }
        },
        Err(_) => HashMap::new(),
    }
}

// ── Tests ──
