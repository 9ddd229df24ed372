//! Configuration types for the universe node.
//!
//! Every recognized option is an explicit field with a default. Missing keys
//! take the default; there is no dynamic lookup by name.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Top-level configuration file (`~/.evolvebot/config.toml`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvolveConfig {
    /// Agent workspace; installed skills live under `<workspace>/skills`.
    pub workspace: PathBuf,
    /// Public universe settings.
    pub universe: UniverseConfig,
    /// Language-model provider used for review curation and digests.
    pub model: ModelConfig,
}

impl Default for EvolveConfig {
    fn default() -> Self {
        Self {
            workspace: crate::evolvebot_home().join("workspace"),
            universe: UniverseConfig::default(),
            model: ModelConfig::default(),
        }
    }
}

impl EvolveConfig {
    /// Directory scanned for installed `SKILL.md` files.
    pub fn skills_dir(&self) -> PathBuf {
        self.workspace.join("skills")
    }
}

/// Settings for participating in the public node network.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UniverseConfig {
    /// Master switch for everything universe-related.
    pub enabled: bool,
    /// Run the node service endpoint (and/or relay) and accept remote work.
    pub provide_service: bool,
    /// Keep a registration session with the registry.
    pub auto_register: bool,

    /// Stable node identity. Generated at startup when empty.
    pub node_id: String,
    /// Human-readable node name.
    pub node_name: String,

    /// Registry WebSocket URL (`ws://host:port/ws`).
    pub registry_url: String,
    pub registry_token: String,

    /// Relay WebSocket URL; empty disables the relay client.
    pub relay_url: String,
    pub relay_token: String,
    /// Skip the direct endpoint and only accept work through the relay.
    pub relay_only: bool,

    pub service_host: String,
    /// `0` lets the OS pick a port.
    pub service_port: u16,
    /// Shared token remote callers must present. Empty disables the check.
    pub service_token: String,

    pub rate_limit_per_min: u32,
    pub rate_limit_burst: u32,
    pub rate_limit_per_min_by_node: u32,
    pub rate_limit_burst_by_node: u32,

    /// Full advertised URL; overrides every other advertise option.
    pub advertise_url: String,
    pub advertise_host: String,
    /// `0` means "use the bound port".
    pub advertise_port: u16,
    pub detect_public_ip: bool,
    pub detect_ip_service: String,
    pub self_check_enabled: bool,
    pub self_check_timeout_secs: f64,

    /// Advertised capability map. Empty means `{"llm.chat": true}`.
    pub capabilities: BTreeMap<String, serde_json::Value>,
    pub tools: Vec<String>,
    pub models: Vec<String>,
    pub languages: Vec<String>,
    pub price_points: u32,
    pub max_tokens: u32,
    /// Raw JSON merged over the generated capability card.
    pub capability_card: serde_json::Map<String, serde_json::Value>,
    pub allow_agent_tasks: bool,
    pub agent_tool_allowlist: Vec<String>,

    pub heartbeat_interval_secs: u64,
    pub handshake_timeout_secs: u64,

    /// Knowledge pack learning and publishing.
    pub knowledge: KnowledgeConfig,
}

impl Default for UniverseConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provide_service: true,
            auto_register: true,
            node_id: String::new(),
            node_name: String::new(),
            registry_url: String::new(),
            registry_token: String::new(),
            relay_url: String::new(),
            relay_token: String::new(),
            relay_only: false,
            service_host: "0.0.0.0".to_string(),
            service_port: 18790,
            service_token: String::new(),
            rate_limit_per_min: 60,
            rate_limit_burst: 10,
            rate_limit_per_min_by_node: 30,
            rate_limit_burst_by_node: 5,
            advertise_url: String::new(),
            advertise_host: String::new(),
            advertise_port: 0,
            detect_public_ip: false,
            detect_ip_service: "https://api.ipify.org".to_string(),
            self_check_enabled: true,
            self_check_timeout_secs: 3.0,
            capabilities: BTreeMap::new(),
            tools: Vec::new(),
            models: Vec::new(),
            languages: Vec::new(),
            price_points: 1,
            max_tokens: 1024,
            capability_card: serde_json::Map::new(),
            allow_agent_tasks: false,
            agent_tool_allowlist: Vec::new(),
            heartbeat_interval_secs: 30,
            handshake_timeout_secs: 10,
            knowledge: KnowledgeConfig::default(),
        }
    }
}

/// Learning policies, review gate, and publish outbox settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeConfig {
    /// Where received packs land. Empty means `~/.evolvebot/knowledge/inbox`.
    pub inbox_dir: String,
    /// Outbox drained by the publish loop. Empty disables publishing.
    pub publish_dir: String,
    pub publish_interval_secs: u64,
    /// FIFO cap on remembered learned pack ids. `0` disables the cap.
    pub learned_ids_limit: usize,
    /// Registry score below which candidates are ignored.
    pub learning_min_score: f64,
    /// Background tick for curiosity and review learning.
    pub background_interval_secs: u64,

    /// Canonical capability tags matched against task text.
    pub capability_vocab: Vec<String>,
    /// Canonical tag -> aliases.
    pub capability_aliases: BTreeMap<String, Vec<String>>,

    pub curiosity_enabled: bool,
    pub curiosity_interval_secs: u64,
    pub curiosity_daily_limit: u32,
    pub curiosity_tags: Vec<String>,

    pub task_driven_enabled: bool,
    pub task_driven_max_per_task: u32,
    /// Skip task-driven learning when no tag was extracted.
    pub task_driven_tagged_only: bool,

    pub review_enabled: bool,
    pub review_interval_secs: u64,
    pub review_min_tasks: usize,
    pub review_max_tasks: usize,
    /// Write accepted review packs into the publish outbox.
    pub review_publish: bool,
    pub review_publish_max_retries: u32,
    pub review_llm_enabled: bool,
    pub review_llm_temperature: f32,
    pub review_llm_max_tokens: u32,
    pub review_gate_enabled: bool,
    pub review_gate_min_score: i64,
    pub review_min_content_chars: usize,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            inbox_dir: String::new(),
            publish_dir: String::new(),
            publish_interval_secs: 300,
            learned_ids_limit: 2000,
            learning_min_score: 0.0,
            background_interval_secs: 60,
            capability_vocab: Vec::new(),
            capability_aliases: BTreeMap::new(),
            curiosity_enabled: false,
            curiosity_interval_secs: 86_400,
            curiosity_daily_limit: 2,
            curiosity_tags: Vec::new(),
            task_driven_enabled: false,
            task_driven_max_per_task: 1,
            task_driven_tagged_only: true,
            review_enabled: false,
            review_interval_secs: 86_400,
            review_min_tasks: 10,
            review_max_tasks: 20,
            review_publish: false,
            review_publish_max_retries: 3,
            review_llm_enabled: true,
            review_llm_temperature: 0.2,
            review_llm_max_tokens: 512,
            review_gate_enabled: true,
            review_gate_min_score: 70,
            review_min_content_chars: 300,
        }
    }
}

/// OpenAI-compatible chat completion provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Base URL, e.g. `https://api.openai.com/v1`. Empty disables the model.
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            model: String::new(),
            api_key_env: "EVOLVEBOT_API_KEY".to_string(),
            timeout_secs: 60,
        }
    }
}

impl ModelConfig {
    pub fn is_configured(&self) -> bool {
        !self.base_url.trim().is_empty() && !self.model.trim().is_empty()
    }
}
