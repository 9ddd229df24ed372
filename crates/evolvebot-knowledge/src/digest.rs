//! Daily digest of packs received since the last digest.

use crate::review::truncate_chars;
use crate::store::{load_manifest, load_pack_file};
use evolvebot_types::knowledge::KnowledgePack;
use std::path::Path;
use tracing::debug;

/// Default number of packs listed in one digest.
pub const DEFAULT_DIGEST_ITEMS: usize = 12;

const SUMMARY_CHARS: usize = 240;

pub const FALLBACK_HEADER: &str = "Today's learned knowledge packs:";

/// Packs in the manifest saved strictly after `since_ts`, newest first,
/// at most `max_items` (minimum 1). Entries whose file is gone or corrupt are
/// skipped.
pub fn collect_recent(inbox: &Path, since_ts: f64, max_items: usize) -> Vec<KnowledgePack> {
    let manifest = load_manifest(inbox);
    let mut recent: Vec<(f64, KnowledgePack)> = manifest
        .packs
        .into_iter()
        .filter(|e| e.saved_at > since_ts && !e.file.is_empty())
        .filter_map(|e| match load_pack_file(&inbox.join(&e.file)) {
            Ok(pack) => Some((e.saved_at, pack)),
            Err(err) => {
                debug!(file = %e.file, "Digest skipping pack: {err}");
                None
            }
        })
        .collect();
    recent.sort_by(|a, b| b.0.total_cmp(&a.0));
    recent
        .into_iter()
        .take(max_items.max(1))
        .map(|(_, p)| p)
        .collect()
}

/// One `- name | summary | tags: a,b` line per pack.
pub fn digest_lines(packs: &[KnowledgePack]) -> Vec<String> {
    packs
        .iter()
        .map(|p| {
            format!(
                "- {} | {} | tags: {}",
                p.name,
                truncate_chars(p.summary.trim(), SUMMARY_CHARS),
                p.tags.join(",")
            )
        })
        .collect()
}

/// Plain digest used without a model or when the model fails.
pub fn fallback_digest(lines: &[String]) -> String {
    format!("{FALLBACK_HEADER}\n{}", lines.join("\n"))
}

pub fn digest_prompt(lines: &[String]) -> String {
    format!(
        "You organize knowledge for an agent. From the knowledge packs below, write a short \
         \"today's learning\" digest in Markdown (under 300 words): the new capability areas, \
         the most reusable points as a list, and where they apply.\n\nKnowledge packs:\n{}",
        lines.join("\n")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::save_pack;

    fn pack(id: &str, summary: &str) -> KnowledgePack {
        KnowledgePack {
            pack_id: id.to_string(),
            name: format!("name-{id}"),
            kind: "note".to_string(),
            summary: summary.to_string(),
            tags: vec!["a".to_string(), "b".to_string()],
            score: 0.0,
            created_ts: 0.0,
            updated_ts: 0.0,
            content: "c".to_string(),
            version: "1.0".to_string(),
        }
    }

    #[test]
    fn test_collect_recent_filters_and_orders() {
        let dir = tempfile::tempdir().unwrap();
        save_pack(&pack("old", "s"), dir.path()).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        let cutoff = crate::now_ts();
        std::thread::sleep(std::time::Duration::from_millis(20));
        save_pack(&pack("n1", "s"), dir.path()).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        save_pack(&pack("n2", "s"), dir.path()).unwrap();
        std::fs::remove_file(dir.path().join("n1.json")).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        save_pack(&pack("n3", "s"), dir.path()).unwrap();

        let recent = collect_recent(dir.path(), cutoff, 12);
        let ids: Vec<&str> = recent.iter().map(|p| p.pack_id.as_str()).collect();
        assert_eq!(ids, vec!["n3", "n2"]);

        assert_eq!(collect_recent(dir.path(), cutoff, 0).len(), 1);
    }

    #[test]
    fn test_missing_manifest_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(collect_recent(dir.path(), 0.0, 12).is_empty());
    }

    #[test]
    fn test_lines_and_fallback() {
        let lines = digest_lines(&[pack("x", &"s".repeat(300))]);
        assert!(lines[0].starts_with("- name-x | "));
        assert!(lines[0].ends_with("... | tags: a,b"));
        let digest = fallback_digest(&lines);
        assert!(digest.starts_with(FALLBACK_HEADER));
        assert!(digest.contains("name-x"));
    }
}
