//! Knowledge pack store: local inbox plus its manifest index.
//!
//! ```text
//! <inbox>/
//!   manifest.json          {packs: [{file, savedAt, name, tags, pack_id}]}
//!   <sanitized-id>.json    one file per received pack
//! ```
//!
//! The manifest is the record of what was received and when; the daily digest
//! reads it.

use crate::error::{KnowledgeError, KnowledgeResult};
use crate::now_ts;
use crate::persist::{read_json, write_json_atomic};
use evolvebot_types::knowledge::{KnowledgePack, Manifest, ManifestEntry};
use evolvebot_types::{evolvebot_home, expand_home};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const MANIFEST_FILE: &str = "manifest.json";

const MAX_STEM_CHARS: usize = 120;

/// Resolve the inbox directory: the configured one, or
/// `~/.evolvebot/knowledge/inbox`.
pub fn get_inbox_path(inbox_dir: &str) -> PathBuf {
    let inbox_dir = inbox_dir.trim();
    if inbox_dir.is_empty() {
        evolvebot_home().join("knowledge").join("inbox")
    } else {
        expand_home(inbox_dir)
    }
}

/// Map an id or name onto a safe file stem.
pub fn sanitize_file_stem(raw: &str) -> String {
    let stem: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_STEM_CHARS)
        .collect();
    let stem = stem.trim_matches('.').to_string();
    if stem.is_empty() {
        "pack".to_string()
    } else {
        stem
    }
}

/// Read the manifest. A missing file is an empty manifest; a corrupt one is
/// logged and replaced on the next save.
pub fn load_manifest(inbox: &Path) -> Manifest {
    match read_json::<Manifest>(&inbox.join(MANIFEST_FILE)) {
        Ok(Some(m)) => m,
        Ok(None) => Manifest::default(),
        Err(e) => {
            warn!(inbox = %inbox.display(), "Knowledge manifest unreadable, starting fresh: {e}");
            Manifest::default()
        }
    }
}

/// Write `pack` into `inbox` and record it in the manifest.
///
/// Saving the same pack again overwrites the file and replaces its manifest
/// entry.
pub fn save_pack(pack: &KnowledgePack, inbox: &Path) -> KnowledgeResult<PathBuf> {
    std::fs::create_dir_all(inbox)?;

    let pack_id = pack.effective_id();
    let stem = if pack_id.is_empty() {
        sanitize_file_stem(&pack.name)
    } else {
        sanitize_file_stem(&pack_id)
    };
    let file = format!("{stem}.json");
    let path = inbox.join(&file);

    let mut stored = pack.clone();
    stored.pack_id = pack_id.clone();
    write_json_atomic(&path, &stored)?;

    let mut manifest = load_manifest(inbox);
    manifest.packs.retain(|e| e.file != file);
    manifest.packs.push(ManifestEntry {
        file,
        saved_at: now_ts(),
        name: pack.name.clone(),
        tags: pack.tags.clone(),
        pack_id,
    });
    write_json_atomic(&inbox.join(MANIFEST_FILE), &manifest)?;

    debug!(path = %path.display(), "Saved knowledge pack");
    Ok(path)
}

/// Parse a pack file. Structural problems are [`KnowledgeError::InvalidPack`].
pub fn load_pack_file(path: &Path) -> KnowledgeResult<KnowledgePack> {
    let invalid = |reason: String| KnowledgeError::InvalidPack {
        path: path.to_path_buf(),
        reason,
    };

    let text = std::fs::read_to_string(path)?;
    let value: serde_json::Value =
        serde_json::from_str(&text).map_err(|e| invalid(format!("not JSON: {e}")))?;
    let obj = value
        .as_object()
        .ok_or_else(|| invalid("not a JSON object".to_string()))?;

    for field in ["name", "kind", "content"] {
        let present = obj
            .get(field)
            .and_then(|v| v.as_str())
            .is_some_and(|s| !s.trim().is_empty());
        if !present {
            return Err(invalid(format!("missing {field}")));
        }
    }

    serde_json::from_value(value).map_err(|e| invalid(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pack(id: &str, name: &str) -> KnowledgePack {
        KnowledgePack {
            pack_id: id.to_string(),
            name: name.to_string(),
            kind: "note".to_string(),
            summary: "s".to_string(),
            tags: vec!["search".to_string()],
            score: 0.0,
            created_ts: 0.0,
            updated_ts: 0.0,
            content: "body".to_string(),
            version: "1.0".to_string(),
        }
    }

    #[test]
    fn test_sanitize_file_stem() {
        assert_eq!(sanitize_file_stem("abc-123_x"), "abc-123_x");
        assert_eq!(sanitize_file_stem("../etc/passwd"), "_etc_passwd");
        assert_eq!(sanitize_file_stem("  "), "pack");
        assert_eq!(sanitize_file_stem(&"x".repeat(500)).len(), 120);
    }

    #[test]
    fn test_save_pack_writes_file_and_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = tokio_test::assert_ok!(save_pack(&pack("p1", "first"), dir.path()));
        assert_eq!(path, dir.path().join("p1.json"));

        let loaded = tokio_test::assert_ok!(load_pack_file(&path));
        assert_eq!(loaded.pack_id, "p1");
        assert_eq!(loaded.content, "body");

        let manifest = load_manifest(dir.path());
        assert_eq!(manifest.packs.len(), 1);
        assert_eq!(manifest.packs[0].file, "p1.json");
        assert_eq!(manifest.packs[0].pack_id, "p1");
        assert!(manifest.packs[0].saved_at > 0.0);
    }

    #[test]
    fn test_resave_replaces_manifest_entry() {
        let dir = tempfile::tempdir().unwrap();
        save_pack(&pack("p1", "first"), dir.path()).unwrap();
        save_pack(&pack("p2", "second"), dir.path()).unwrap();
        save_pack(&pack("p1", "first v2"), dir.path()).unwrap();

        let manifest = load_manifest(dir.path());
        assert_eq!(manifest.packs.len(), 2);
        assert_eq!(manifest.packs[1].name, "first v2");
    }

    #[test]
    fn test_local_pack_gets_content_hash_id() {
        let dir = tempfile::tempdir().unwrap();
        let local = pack("", "local");
        let path = save_pack(&local, dir.path()).unwrap();
        let expected = local.effective_id();
        assert_eq!(path, dir.path().join(format!("{expected}.json")));
        assert_eq!(load_pack_file(&path).unwrap().pack_id, expected);
    }

    #[test]
    fn test_load_pack_file_rejects_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{"name":"x","kind":"","content":"c"}"#).unwrap();
        match load_pack_file(&path) {
            Err(KnowledgeError::InvalidPack { reason, .. }) => assert!(reason.contains("kind")),
            other => panic!("expected InvalidPack, got {other:?}"),
        }

        std::fs::write(&path, "[1,2]").unwrap();
        assert!(matches!(
            load_pack_file(&path),
            Err(KnowledgeError::InvalidPack { .. })
        ));

        std::fs::write(&path, "{oops").unwrap();
        assert!(matches!(
            load_pack_file(&path),
            Err(KnowledgeError::InvalidPack { .. })
        ));
    }

    #[test]
    fn test_corrupt_manifest_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE), "garbage").unwrap();
        save_pack(&pack("p1", "first"), dir.path()).unwrap();
        assert_eq!(load_manifest(dir.path()).packs.len(), 1);
    }

    #[test]
    fn test_get_inbox_path_default() {
        assert!(get_inbox_path("").ends_with("knowledge/inbox"));
        assert_eq!(get_inbox_path("/tmp/in"), PathBuf::from("/tmp/in"));
    }
}
