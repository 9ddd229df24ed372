//! Public registry client — knowledge catalog and node directory over HTTP.
//!
//! The registry URL in configuration is usually the WebSocket address nodes
//! register on (`wss://registry.example/ws`). HTTP requests go to the same
//! host: `ws(s)` becomes `http(s)` and a trailing `/ws` segment is dropped.
//!
//! Endpoints:
//! - `GET  /knowledge?tag=&limit=` → `{packs: [meta]}` or `[meta]`
//! - `GET  /knowledge/{id}`        → `{pack: {...}}` or the pack itself
//! - `POST /knowledge`             → publish ack
//! - `GET  /nodes?limit=`          → `{nodes: [...]}` or `[...]`

use crate::error::{KnowledgeError, KnowledgeResult};
use async_trait::async_trait;
use evolvebot_types::knowledge::{KnowledgePack, KnowledgePackMeta, NodeInfo};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Body of `POST /knowledge`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishRequest {
    pub id: String,
    pub name: String,
    pub kind: String,
    pub content: String,
    pub summary: String,
    pub tags: Vec<String>,
    pub version: String,
    pub owner_node: String,
    pub allow_update: bool,
}

/// The registry operations the learning and publish loops depend on.
#[async_trait]
pub trait KnowledgeRegistry: Send + Sync {
    /// List catalog entries, optionally filtered by one tag.
    async fn knowledge_list(
        &self,
        tag: Option<&str>,
        limit: usize,
    ) -> KnowledgeResult<Vec<KnowledgePackMeta>>;

    /// Fetch one pack with its content.
    async fn knowledge_get(&self, pack_id: &str) -> KnowledgeResult<KnowledgePack>;

    /// Publish (or update, when allowed) a pack. Returns the registry's ack.
    async fn knowledge_publish(&self, request: &PublishRequest)
        -> KnowledgeResult<serde_json::Value>;
}

/// Convert a registry WebSocket URL to its HTTP base.
pub fn registry_http_base(registry_url: &str) -> KnowledgeResult<Url> {
    let raw = registry_url.trim();
    let converted = if let Some(rest) = raw.strip_prefix("wss://") {
        format!("https://{rest}")
    } else if let Some(rest) = raw.strip_prefix("ws://") {
        format!("http://{rest}")
    } else {
        raw.to_string()
    };
    let mut url = Url::parse(&converted)
        .map_err(|e| KnowledgeError::Registry(format!("Invalid registry URL {raw:?}: {e}")))?;
    let path = url.path().trim_end_matches('/');
    let path = path.strip_suffix("/ws").unwrap_or(path).to_string();
    url.set_path(&path);
    url.set_query(None);
    Ok(url)
}

/// HTTP implementation of [`KnowledgeRegistry`].
pub struct RegistryClient {
    base: Url,
    token: String,
    client: reqwest::Client,
}

impl RegistryClient {
    pub fn new(registry_url: &str, token: &str) -> KnowledgeResult<Self> {
        Ok(Self {
            base: registry_http_base(registry_url)?,
            token: token.to_string(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, segments: &[&str]) -> KnowledgeResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| KnowledgeError::Registry(format!("Registry URL cannot be a base: {}", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.token.is_empty() {
            req
        } else {
            req.bearer_auth(&self.token)
        }
    }

    async fn get_json(
        &self,
        url: Url,
        query: &[(&str, String)],
    ) -> KnowledgeResult<serde_json::Value> {
        let response = self
            .authorized(self.client.get(url.clone()).query(query))
            .send()
            .await
            .map_err(|e| KnowledgeError::Registry(format!("GET {url} failed: {e}")))?;

        if !response.status().is_success() {
            return Err(KnowledgeError::Registry(format!(
                "GET {url} returned {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| KnowledgeError::Registry(format!("Failed to parse {url}: {e}")))
    }

    /// List registered nodes.
    pub async fn node_list(&self, limit: usize) -> KnowledgeResult<Vec<NodeInfo>> {
        let body = self
            .get_json(self.endpoint(&["nodes"])?, &[("limit", limit.to_string())])
            .await?;
        Ok(parse_list(body, "nodes"))
    }
}

/// Accept `{key: [...]}` or a bare array; skip entries that do not parse.
fn parse_list<T: serde::de::DeserializeOwned>(body: serde_json::Value, key: &str) -> Vec<T> {
    let items = match body {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(mut map) => match map.remove(key) {
            Some(serde_json::Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };
    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value(item) {
            Ok(v) => Some(v),
            Err(e) => {
                debug!("Skipping unparsable {key} entry: {e}");
                None
            }
        })
        .collect()
}

#[async_trait]
impl KnowledgeRegistry for RegistryClient {
    async fn knowledge_list(
        &self,
        tag: Option<&str>,
        limit: usize,
    ) -> KnowledgeResult<Vec<KnowledgePackMeta>> {
        let mut query = vec![("limit", limit.to_string())];
        if let Some(tag) = tag.filter(|t| !t.is_empty()) {
            query.push(("tag", tag.to_string()));
        }
        let body = self.get_json(self.endpoint(&["knowledge"])?, &query).await?;
        Ok(parse_list(body, "packs"))
    }

    async fn knowledge_get(&self, pack_id: &str) -> KnowledgeResult<KnowledgePack> {
        let body = self
            .get_json(self.endpoint(&["knowledge", pack_id])?, &[])
            .await?;
        let body = match body {
            serde_json::Value::Object(mut map) if map.get("pack").is_some_and(|p| p.is_object()) => {
                map.remove("pack").unwrap_or_default()
            }
            other => other,
        };
        let mut pack: KnowledgePack = serde_json::from_value(body)
            .map_err(|e| KnowledgeError::Registry(format!("Invalid pack {pack_id}: {e}")))?;
        if pack.pack_id.trim().is_empty() {
            pack.pack_id = pack_id.to_string();
        }
        Ok(pack)
    }

    async fn knowledge_publish(
        &self,
        request: &PublishRequest,
    ) -> KnowledgeResult<serde_json::Value> {
        let url = self.endpoint(&["knowledge"])?;
        let response = self
            .authorized(self.client.post(url.clone()).json(request))
            .send()
            .await
            .map_err(|e| KnowledgeError::Publish(format!("POST {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(KnowledgeError::Publish(format!(
                "Registry returned {status}: {}",
                body.trim()
            )));
        }

        // Some registries answer 204 / empty body.
        let text = response
            .text()
            .await
            .map_err(|e| KnowledgeError::Publish(format!("Failed to read publish ack: {e}")))?;
        if text.trim().is_empty() {
            return Ok(serde_json::json!({"ok": true}));
        }
        serde_json::from_str(&text)
            .map_err(|e| KnowledgeError::Publish(format!("Invalid publish ack: {e}")))
    }
}
