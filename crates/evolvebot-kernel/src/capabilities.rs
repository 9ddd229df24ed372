//! What a node advertises: the capability map and the capability card.

use evolvebot_types::capability::{CapabilityCard, Limits, Pricing, CARD_SCHEMA_VERSION};
use evolvebot_types::config::UniverseConfig;
use evolvebot_wire::Payload;
use serde_json::Value;

pub const CAP_LLM_CHAT: &str = "llm.chat";
pub const CAP_KNOWLEDGE_PACK: &str = "knowledge.pack";
pub const CAP_AGENT: &str = "evolvebot.agent";

/// Tools that become capabilities of their own when allow-listed for agent tasks.
const ADVERTISED_TOOLS: [&str; 2] = ["web_search", "web_fetch"];

/// The capability map sent with `register` / `update` and used to gate tasks.
///
/// Starts from the configured map (`{"llm.chat": true}` when empty), then
/// adds `knowledge.pack` when review packs are published, and the agent
/// capability plus allow-listed tools when agent tasks are allowed.
pub fn build_public_capabilities(cfg: &UniverseConfig) -> Payload {
    let mut caps: Payload = if cfg.capabilities.is_empty() {
        Payload::from_iter([(CAP_LLM_CHAT.to_string(), Value::Bool(true))])
    } else {
        cfg.capabilities
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    };

    if cfg.knowledge.review_publish {
        caps.insert(CAP_KNOWLEDGE_PACK.to_string(), Value::Bool(true));
    }

    if cfg.allow_agent_tasks {
        caps.insert(CAP_AGENT.to_string(), Value::Bool(true));
        for tool in ADVERTISED_TOOLS {
            if cfg.agent_tool_allowlist.iter().any(|t| t == tool) {
                caps.insert(tool.to_string(), Value::Bool(true));
            }
        }
    } else {
        caps.remove(CAP_AGENT);
    }
    caps
}

/// The advertised capability card, with the configured override map merged
/// over its top-level keys.
pub fn build_capability_card(cfg: &UniverseConfig) -> Value {
    let caps = build_public_capabilities(cfg);
    let summary = match cfg.node_name.trim() {
        "" => "evolvebot node".to_string(),
        name => name.to_string(),
    };
    let card = CapabilityCard {
        schema_version: CARD_SCHEMA_VERSION.to_string(),
        node_id: cfg.node_id.clone(),
        node_name: cfg.node_name.clone(),
        skills: caps.keys().cloned().collect(),
        capabilities: caps.into_iter().collect(),
        tools: cfg.tools.clone(),
        models: cfg.models.clone(),
        languages: cfg.languages.clone(),
        pricing: Pricing {
            unit: "point".to_string(),
            per_request: cfg.price_points.max(1),
        },
        limits: Limits {
            max_tokens: cfg.max_tokens,
            rate_limit_per_min: cfg.rate_limit_per_min,
            rate_limit_per_min_by_node: cfg.rate_limit_per_min_by_node,
        },
        summary,
    };
    card.to_advertised(&cfg.capability_card)
}
