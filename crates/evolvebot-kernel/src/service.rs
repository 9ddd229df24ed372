//! Service handle that answers remote `llm.chat` tasks with the local model.
//!
//! Task payload: `{"capability": "llm.chat", "prompt": "..."}` (`message` is
//! accepted as an alias for `prompt`). Result: `{"text": "..."}`.
//!
//! Finished tasks feed the learning manager: a summary goes to the review
//! buffer and the prompt drives task-driven learning.

use crate::capabilities::{build_public_capabilities, CAP_LLM_CHAT};
use async_trait::async_trait;
use evolvebot_knowledge::LearningManager;
use evolvebot_types::config::UniverseConfig;
use evolvebot_types::model::{CompletionDriver, CompletionRequest};
use evolvebot_wire::{Payload, ServiceHandle};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

const SERVED: [&str; 1] = [CAP_LLM_CHAT];

pub struct ChatService {
    capabilities: Payload,
    driver: Option<Arc<dyn CompletionDriver>>,
    learning: Option<Arc<LearningManager>>,
    max_tokens: u32,
}

impl ChatService {
    pub fn new(cfg: &UniverseConfig, driver: Option<Arc<dyn CompletionDriver>>) -> Self {
        // Only what this handle answers; the rest of the public map is
        // refused by the dispatcher's capability gate.
        let mut capabilities = build_public_capabilities(cfg);
        capabilities.retain(|name, _| SERVED.contains(&name.as_str()));
        Self {
            capabilities,
            driver,
            learning: None,
            max_tokens: cfg.max_tokens,
        }
    }

    pub fn with_learning(mut self, learning: Arc<LearningManager>) -> Self {
        self.learning = Some(learning);
        self
    }

    async fn chat(&self, from_node: &str, payload: &Payload) -> Result<serde_json::Value, String> {
        let driver = self
            .driver
            .as_ref()
            .ok_or_else(|| "no model configured on this node".to_string())?;
        let prompt = payload
            .get("prompt")
            .or_else(|| payload.get("message"))
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| "missing prompt".to_string())?;
        let max_tokens = payload
            .get("max_tokens")
            .and_then(|v| v.as_u64())
            .map(|n| (n as u32).min(self.max_tokens))
            .unwrap_or(self.max_tokens);

        debug!(from = from_node, "Universe: running llm.chat task");
        let request = CompletionRequest {
            prompt: prompt.to_string(),
            temperature: 0.7,
            max_tokens,
        };
        let result = driver.complete(request).await;

        if let Some(learning) = &self.learning {
            let answer = result.as_ref().ok().map(String::as_str);
            let errors: Vec<String> = result.as_ref().err().map(|e| e.to_string()).into_iter().collect();
            learning.record_task_summary(prompt, answer, &errors);
            let learning = Arc::clone(learning);
            let prompt = prompt.to_string();
            tokio::spawn(async move {
                learning.maybe_task_driven_learn(&prompt, &errors, &[]).await;
            });
        }

        match result {
            Ok(text) => Ok(json!({ "text": text })),
            Err(e) => {
                warn!(from = from_node, "Universe: llm.chat task failed: {e}");
                Err(format!("model error: {e}"))
            }
        }
    }
}

#[async_trait]
impl ServiceHandle for ChatService {
    fn capabilities(&self) -> Payload {
        self.capabilities.clone()
    }

    async fn handle_task(
        &self,
        from_node: &str,
        capability: &str,
        payload: &Payload,
    ) -> Result<serde_json::Value, String> {
        match capability {
            CAP_LLM_CHAT => self.chat(from_node, payload).await,
            other => Err(format!("capability {other} is not served by this node")),
        }
    }
}
