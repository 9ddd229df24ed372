//! Interest-tag extraction for task-driven learning.
//!
//! Approximate by nature: a vocabulary term or alias that appears anywhere in
//! the lowercased prompt (or tool error text) selects its tag. Terms and
//! aliases are lowercased with `str::to_lowercase` on both sides.

use std::collections::BTreeMap;

/// Upper bound on tags returned per task.
pub const MAX_TAGS: usize = 10;

/// Vocabulary plus alias table, normalized once.
#[derive(Debug, Clone, Default)]
pub struct TagExtractor {
    vocab: Vec<String>,
    /// lowercase vocab term -> configured spelling
    vocab_map: BTreeMap<String, String>,
    /// lowercase alias (or canonical) -> canonical tag
    alias_map: BTreeMap<String, String>,
}

impl TagExtractor {
    pub fn new(vocab: &[String], aliases: &BTreeMap<String, Vec<String>>) -> Self {
        let vocab: Vec<String> = vocab
            .iter()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect();
        let vocab_map = vocab.iter().map(|v| (v.to_lowercase(), v.clone())).collect();

        let mut alias_map = BTreeMap::new();
        for (canon, items) in aliases {
            let canon = canon.trim();
            if canon.is_empty() {
                continue;
            }
            alias_map.insert(canon.to_lowercase(), canon.to_string());
            for item in items.iter().map(|i| i.trim()).filter(|i| !i.is_empty()) {
                alias_map.insert(item.to_lowercase(), canon.to_string());
            }
        }

        Self {
            vocab,
            vocab_map,
            alias_map,
        }
    }

    /// Tags for a task, in discovery order, deduplicated, at most [`MAX_TAGS`].
    ///
    /// `tools_used` match exactly: an alias first, then a vocabulary term.
    /// With an empty vocabulary any tool name becomes a tag.
    pub fn extract(&self, prompt: &str, tool_errors: &[String], tools_used: &[String]) -> Vec<String> {
        let text = format!("{prompt}\n{}", tool_errors.join(";")).to_lowercase();
        let mut tags: Vec<String> = Vec::new();
        let mut add = |tag: &str| {
            if !tag.is_empty() && !tags.iter().any(|t| t == tag) {
                tags.push(tag.to_string());
            }
        };

        for cap in &self.vocab {
            if text.contains(&cap.to_lowercase()) {
                add(cap);
            }
        }
        for (alias, canon) in &self.alias_map {
            if text.contains(alias.as_str()) {
                add(canon);
            }
        }
        for tool in tools_used {
            let key = tool.trim().to_lowercase();
            if key.is_empty() {
                continue;
            }
            if let Some(canon) = self.alias_map.get(&key) {
                add(canon);
            } else if let Some(term) = self.vocab_map.get(&key) {
                add(term);
            } else if self.vocab_map.is_empty() {
                add(tool.trim());
            }
        }

        tags.truncate(MAX_TAGS);
        tags
    }
}
