//! Capability card — the declarative description a node advertises.
//!
//! Cards are rebuilt from configuration for every registration or update and
//! never persisted.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Current capability card schema.
pub const CARD_SCHEMA_VERSION: &str = "1.0";

/// Advertised capabilities, tools, pricing, and limits of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityCard {
    pub schema_version: String,
    pub node_id: String,
    pub node_name: String,
    pub capabilities: BTreeMap<String, serde_json::Value>,
    pub tools: Vec<String>,
    pub models: Vec<String>,
    pub languages: Vec<String>,
    pub pricing: Pricing,
    pub limits: Limits,
    pub summary: String,
    pub skills: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pricing {
    pub unit: String,
    pub per_request: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Limits {
    pub max_tokens: u32,
    pub rate_limit_per_min: u32,
    pub rate_limit_per_min_by_node: u32,
}

impl CapabilityCard {
    /// Serialize the card and merge `overrides` over the top-level keys.
    pub fn to_advertised(
        &self,
        overrides: &serde_json::Map<String, serde_json::Value>,
    ) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({}));
        if let serde_json::Value::Object(ref mut map) = value {
            for (k, v) in overrides {
                map.insert(k.clone(), v.clone());
            }
        }
        value
    }
}
