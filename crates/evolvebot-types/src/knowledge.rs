//! Knowledge pack types shared by the registry client, store, and learning.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A remote catalog entry: everything about a pack except its content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgePackMeta {
    #[serde(alias = "id", alias = "packId")]
    pub pack_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub score: f64,
    #[serde(default, alias = "createdTs")]
    pub created_ts: f64,
    #[serde(default, alias = "updatedTs")]
    pub updated_ts: f64,
}

impl KnowledgePackMeta {
    /// Timestamp used for "most recent first" ordering.
    pub fn recency(&self) -> f64 {
        if self.updated_ts > 0.0 {
            self.updated_ts
        } else {
            self.created_ts
        }
    }
}

/// A full knowledge pack, as fetched from the registry or read from disk.
///
/// `pack_id` may be empty for locally authored packs that have not been
/// published yet; see [`KnowledgePack::effective_id`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgePack {
    #[serde(default, alias = "id", alias = "packId")]
    pub pack_id: String,
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub score: f64,
    #[serde(default, alias = "createdTs")]
    pub created_ts: f64,
    #[serde(default, alias = "updatedTs")]
    pub updated_ts: f64,
    pub content: String,
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl KnowledgePack {
    /// Server-assigned id if present, otherwise the content hash.
    pub fn effective_id(&self) -> String {
        let id = self.pack_id.trim();
        if id.is_empty() {
            compute_pack_id(self.name.trim(), self.kind.trim(), &self.content)
        } else {
            id.to_string()
        }
    }

    /// The catalog view of this pack.
    pub fn meta(&self) -> KnowledgePackMeta {
        KnowledgePackMeta {
            pack_id: self.effective_id(),
            name: self.name.clone(),
            kind: self.kind.clone(),
            summary: self.summary.clone(),
            tags: self.tags.clone(),
            score: self.score,
            created_ts: self.created_ts,
            updated_ts: self.updated_ts,
        }
    }
}

/// Content-addressed pack id: hex SHA-256 of `name\nkind\ncontent`.
///
/// Identical content always hashes to the same id, so republishing it is an
/// idempotent update on the registry.
pub fn compute_pack_id(name: &str, kind: &str, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(b"\n");
    hasher.update(kind.as_bytes());
    hasher.update(b"\n");
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// One line of the inbox manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub file: String,
    #[serde(rename = "savedAt")]
    pub saved_at: f64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub pack_id: String,
}

/// `<inbox>/manifest.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub packs: Vec<ManifestEntry>,
}

/// Registry catalog entry for a registered node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    #[serde(alias = "node_id")]
    pub node_id: String,
    #[serde(default, alias = "node_name")]
    pub node_name: String,
    #[serde(default, alias = "endpoint_url")]
    pub endpoint_url: String,
    #[serde(default)]
    pub capabilities: serde_json::Map<String, serde_json::Value>,
    #[serde(default, alias = "price_points")]
    pub price_points: u32,
}
