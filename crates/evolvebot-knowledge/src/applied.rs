//! Applied-pack scan: which pack ids are already installed as skills.
//!
//! A skill installed from a knowledge pack carries the id in its `SKILL.md`
//! frontmatter:
//!
//! ```text
//! ---
//! name: web-research
//! pack_id: 3f2a...
//! ---
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;
use walkdir::WalkDir;

const SKILL_FILE: &str = "SKILL.md";

/// Default lifetime of a scan result.
pub const APPLIED_CACHE_TTL: Duration = Duration::from_secs(300);

/// Extract `pack_id` from a SKILL.md frontmatter block, if any.
pub fn frontmatter_pack_id(content: &str) -> Option<String> {
    let rest = content.strip_prefix("---")?;
    let end = rest.find("\n---")?;
    rest[..end].lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        if key.trim() != "pack_id" {
            return None;
        }
        let id = value.trim().trim_matches(|c| c == '"' || c == '\'');
        (!id.is_empty()).then(|| id.to_string())
    })
}

/// Walk `skills_dir` for `SKILL.md` files and collect their pack ids.
pub fn scan_applied_pack_ids(skills_dir: &Path) -> HashSet<String> {
    let mut applied = HashSet::new();
    if !skills_dir.is_dir() {
        return applied;
    }
    for entry in WalkDir::new(skills_dir)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() || entry.file_name() != SKILL_FILE {
            continue;
        }
        let Ok(content) = std::fs::read_to_string(entry.path()) else {
            continue;
        };
        if let Some(id) = frontmatter_pack_id(&content) {
            applied.insert(id);
        }
    }
    debug!(count = applied.len(), dir = %skills_dir.display(), "Scanned applied skills");
    applied
}

/// Short-lived cache over [`scan_applied_pack_ids`].
///
/// An empty result is never served from cache, so the first skill installed
/// after a scan is picked up on the next call.
#[derive(Debug)]
pub struct AppliedCache {
    ttl: Duration,
    ids: Arc<HashSet<String>>,
    scanned_at: Option<Instant>,
}

impl AppliedCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            ids: Arc::default(),
            scanned_at: None,
        }
    }

    /// The last scan, if it is still fresh and non-empty.
    pub fn cached(&self) -> Option<Arc<HashSet<String>>> {
        let fresh = self
            .scanned_at
            .is_some_and(|at| at.elapsed() < self.ttl && !self.ids.is_empty());
        fresh.then(|| Arc::clone(&self.ids))
    }

    /// Record a scan result taken now.
    pub fn store(&mut self, ids: HashSet<String>) -> Arc<HashSet<String>> {
        self.ids = Arc::new(ids);
        self.scanned_at = Some(Instant::now());
        Arc::clone(&self.ids)
    }
}

impl Default for AppliedCache {
    fn default() -> Self {
        Self::new(APPLIED_CACHE_TTL)
    }
}
