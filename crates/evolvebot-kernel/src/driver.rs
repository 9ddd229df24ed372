//! OpenAI-compatible chat completion driver.
//!
//! Works against any endpoint exposing `POST {base_url}/chat/completions`
//! (OpenAI, OpenRouter, Ollama, vLLM, ...). The API key is read from the
//! environment variable named in the model config; local servers may run
//! without one.

use async_trait::async_trait;
use evolvebot_types::config::ModelConfig;
use evolvebot_types::model::{CompletionDriver, CompletionRequest, DriverError};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

pub struct OpenAiCompatDriver {
    base_url: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiCompatDriver {
    pub fn new(base_url: &str, model: &str, api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
        }
    }

    /// Build from config. `None` when no model is configured.
    pub fn from_config(cfg: &ModelConfig) -> Option<Self> {
        if !cfg.is_configured() {
            return None;
        }
        let api_key = std::env::var(&cfg.api_key_env).ok();
        if api_key.is_none() {
            debug!(env = %cfg.api_key_env, "No API key in environment; sending unauthenticated requests");
        }
        Some(Self::new(
            &cfg.base_url,
            &cfg.model,
            api_key,
            Duration::from_secs(cfg.timeout_secs.max(1)),
        ))
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl CompletionDriver for OpenAiCompatDriver {
    async fn complete(&self, request: CompletionRequest) -> Result<String, DriverError> {
        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": request.prompt}],
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });

        let mut req = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| DriverError::Http(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(DriverError::Api {
                status: status.as_u16(),
                message: body.chars().take(200).collect(),
            });
        }

        let data: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| DriverError::Parse(e.to_string()))?;

        data["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| DriverError::Parse("missing choices[0].message.content".to_string()))
    }
}
