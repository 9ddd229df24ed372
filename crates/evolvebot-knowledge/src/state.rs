//! Persisted learning state (`~/.evolvebot/learning_state.json`).
//!
//! Invariant: the learned-id set and its FIFO order always hold the same ids.
//! Both live behind [`LearnedIds`], so there is no way to update one without
//! the other.

use crate::error::KnowledgeResult;
use crate::persist::{read_json, write_json_atomic};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::path::Path;
use tracing::warn;

pub const STATE_SCHEMA_VERSION: u32 = 1;

const DAY_SECS: f64 = 24.0 * 3600.0;

/// Ids of packs already pulled, oldest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LearnedIds {
    order: VecDeque<String>,
    set: HashSet<String>,
}

impl LearnedIds {
    /// Rebuild from an ordered list, dropping blanks and repeats.
    pub fn from_order<I: IntoIterator<Item = String>>(ids: I) -> Self {
        let mut out = Self::default();
        for id in ids {
            out.insert(id, 0);
        }
        out
    }

    pub fn contains(&self, id: &str) -> bool {
        self.set.contains(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Ids in first-learned order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Add `id` at the newest end. With `limit > 0`, evicts the oldest ids
    /// until at most `limit` remain and returns them. Re-adding a known id
    /// does not refresh its position.
    pub fn insert(&mut self, id: String, limit: usize) -> Vec<String> {
        if id.is_empty() || self.set.contains(&id) {
            return Vec::new();
        }
        self.set.insert(id.clone());
        self.order.push_back(id);

        let mut evicted = Vec::new();
        if limit > 0 {
            while self.order.len() > limit {
                if let Some(old) = self.order.pop_front() {
                    self.set.remove(&old);
                    evicted.push(old);
                }
            }
        }
        evicted
    }

    /// Remove every id in `ids`. Returns how many were removed.
    pub fn remove_all(&mut self, ids: &HashSet<String>) -> usize {
        if ids.is_empty() || self.set.is_disjoint(ids) {
            return 0;
        }
        let before = self.order.len();
        self.set.retain(|id| !ids.contains(id));
        self.order.retain(|id| !ids.contains(id));
        before - self.order.len()
    }

    #[cfg(test)]
    pub(crate) fn is_consistent(&self) -> bool {
        self.order.len() == self.set.len() && self.order.iter().all(|id| self.set.contains(id))
    }
}

/// The learning manager's durable state. Single writer: the learning lock.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LearningState {
    pub last_curiosity_ts: f64,
    pub last_review_ts: f64,
    pub last_digest_ts: f64,
    pub curiosity_daily_ts: f64,
    pub curiosity_daily_count: u32,
    pub learned: LearnedIds,
}

/// On-disk shape.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct StateFile {
    schema_version: u32,
    last_curiosity_ts: f64,
    last_review_ts: f64,
    last_digest_ts: f64,
    curiosity_daily_ts: f64,
    curiosity_daily_count: u32,
    learned_ids: Vec<String>,
    learned_ids_order: Vec<String>,
}

impl LearningState {
    /// Load from `path`. Missing or unreadable files yield a fresh state.
    pub fn load(path: &Path) -> Self {
        let file = match read_json::<StateFile>(path) {
            Ok(Some(f)) => f,
            Ok(None) => return Self::default(),
            Err(e) => {
                warn!(path = %path.display(), "Learning state load failed: {e}");
                return Self::default();
            }
        };
        if file.schema_version > STATE_SCHEMA_VERSION {
            warn!(
                version = file.schema_version,
                "Learning state written by a newer version; reading known fields"
            );
        }
        let learned = if file.learned_ids_order.is_empty() {
            let mut ids = file.learned_ids;
            ids.sort();
            LearnedIds::from_order(ids)
        } else {
            LearnedIds::from_order(file.learned_ids_order)
        };
        Self {
            last_curiosity_ts: file.last_curiosity_ts,
            last_review_ts: file.last_review_ts,
            last_digest_ts: file.last_digest_ts,
            curiosity_daily_ts: file.curiosity_daily_ts,
            curiosity_daily_count: file.curiosity_daily_count,
            learned,
        }
    }

    pub fn save(&self, path: &Path) -> KnowledgeResult<()> {
        let order: Vec<String> = self.learned.iter().map(str::to_string).collect();
        let mut ids = order.clone();
        ids.sort();
        let file = StateFile {
            schema_version: STATE_SCHEMA_VERSION,
            last_curiosity_ts: self.last_curiosity_ts,
            last_review_ts: self.last_review_ts,
            last_digest_ts: self.last_digest_ts,
            curiosity_daily_ts: self.curiosity_daily_ts,
            curiosity_daily_count: self.curiosity_daily_count,
            learned_ids: ids,
            learned_ids_order: order,
        };
        write_json_atomic(path, &file)
    }

    /// Start a new quota window once 24h have passed since the last one began.
    pub fn reset_daily_quota_if_needed(&mut self, now: f64) {
        if now - self.curiosity_daily_ts >= DAY_SECS {
            self.curiosity_daily_ts = now;
            self.curiosity_daily_count = 0;
        }
    }
}
