//! Reading leads from disk and writing processed rows back

use crate::core::{ingest_rows, Row};
use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::path::Path;

/// Read rows from a JSON array or JSON Lines file
pub fn read_rows<P: AsRef<Path>>(path: P) -> Result<Vec<Row>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse_rows(&content).with_context(|| format!("Failed to parse rows in {}", path.display()))
}

/// Parse rows from JSON array or JSON Lines text
pub fn parse_rows(content: &str) -> Result<Vec<Row>> {
    let trimmed = content.trim_start();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let values: Vec<Value> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed)?
    } else {
        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str::<Value>(line)
                    .with_context(|| format!("Invalid JSON on line {}", n + 1))
            })
            .collect::<Result<_>>()?
    };

    let objects = values.iter().filter(|v| v.is_object()).count();
    if objects != values.len() {
        bail!(
            "Expected only JSON objects, found {} non-object values",
            values.len() - objects
        );
    }

    Ok(ingest_rows(values))
}

/// Write rows as a pretty-printed JSON array
pub fn write_rows<P: AsRef<Path>>(path: P, rows: &[Row]) -> Result<()> {
    let path = path.as_ref();
    let json = serde_json::to_string_pretty(rows)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}
