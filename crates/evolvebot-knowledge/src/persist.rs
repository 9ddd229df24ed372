//! Atomic JSON persistence: write to a sibling temp file, then rename.
//!
//! A reader never observes a half-written state file.

use crate::error::KnowledgeResult;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

/// Pretty-print `value` to `path` atomically, creating parent directories.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> KnowledgeResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(value)?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "state.json".to_string());
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Read `path` as JSON. A missing file yields `Ok(None)`.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> KnowledgeResult<Option<T>> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
