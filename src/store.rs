//! Reading and writing the shared JSON snapshots

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::warn;

use crate::derive::AuthorTable;
use crate::types::{count_from_value, PostRecord};

/// Load the records file. Returns `None` when the file does not exist.
pub fn load_records(path: &Path) -> Result<Option<Vec<PostRecord>>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read records: {}", path.display()))?;
    let records: Vec<PostRecord> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse records JSON: {}", path.display()))?;
    Ok(Some(records))
}

/// Write records back with 2-space indentation and a trailing newline
pub fn save_records(path: &Path, records: &[PostRecord]) -> Result<()> {
    write_json_file(path, records)
}

/// Load the username -> follower count table. A missing or malformed file yields an
/// empty table, since records may carry their own follower counts.
pub fn load_authors(path: &Path) -> Result<AuthorTable> {
    let mut table = AuthorTable::new();
    if !path.exists() {
        return Ok(table);
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read author table: {}", path.display()))?;
    let raw: BTreeMap<String, Value> = match serde_json::from_str(&content) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring malformed author table");
            return Ok(table);
        }
    };

    for (username, value) in &raw {
        let followers = count_from_value(value);
        if followers == 0 {
            continue;
        }
        table.insert(username, followers);
    }
    Ok(table)
}

/// Pretty-print any value as JSON with a trailing newline
pub fn write_json_file<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut json_str = serde_json::to_string_pretty(value)?;
    json_str.push('\n');
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, json_str).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}
