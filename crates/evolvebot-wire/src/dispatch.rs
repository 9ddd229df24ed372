//! Inbound request handling shared by the node endpoint and the relay client.
//!
//! The [`ServiceHandle`] trait abstracts the agent/tooling side: the wire
//! layer authenticates and rate-limits, then hands capability-gated work to
//! the handle.

use crate::error::ProtocolError;
use crate::message::{error_envelope, Envelope, EnvelopeType, Payload};
use crate::rate_limit::{DualRateLimiter, RateLimitConfig};
use async_trait::async_trait;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

/// Payload key carrying the caller's service token.
pub const SERVICE_TOKEN_KEY: &str = "serviceToken";

/// Rate-limit key for requests without a `from_node`.
const ANONYMOUS_NODE: &str = "anonymous";

/// Trait for the agent side to serve remote work requests.
#[async_trait]
pub trait ServiceHandle: Send + Sync + 'static {
    /// Currently enabled capabilities (`name -> true` or a descriptor).
    fn capabilities(&self) -> Payload;

    /// Run a task for a remote node. `payload` no longer contains the token.
    async fn handle_task(
        &self,
        from_node: &str,
        capability: &str,
        payload: &Payload,
    ) -> Result<serde_json::Value, String>;
}

/// Turns inbound envelopes into exactly one response envelope each.
pub struct Dispatcher {
    node_id: String,
    service_token: String,
    limiter: DualRateLimiter,
    handle: Arc<dyn ServiceHandle>,
}

impl Dispatcher {
    /// An empty `service_token` disables token checks.
    pub fn new(
        node_id: impl Into<String>,
        service_token: impl Into<String>,
        limits: &RateLimitConfig,
        handle: Arc<dyn ServiceHandle>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            service_token: service_token.into(),
            limiter: DualRateLimiter::new(limits),
            handle,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Answer a frame that failed to parse.
    pub fn reject_invalid(&self, err: &ProtocolError) -> Envelope {
        debug!("Rejecting malformed envelope: {err}");
        error_envelope("", &self.node_id, 400, format!("{err}"))
    }

    /// Handle one request envelope and produce its response.
    pub async fn handle(&self, env: &Envelope) -> Envelope {
        // Pings bypass token and rate checks.
        if env.kind() == EnvelopeType::Ping {
            return env.reply(EnvelopeType::Pong, &self.node_id, Payload::new());
        }

        if !self.token_ok(env) {
            warn!(from = env.from_node(), kind = %env.kind(), "Rejected request with bad service token");
            return env.error_reply(&self.node_id, 401, "invalid service token");
        }

        let remote = if env.from_node().is_empty() {
            ANONYMOUS_NODE
        } else {
            env.from_node()
        };
        if let Err(e) = self.limiter.check(remote) {
            return env.error_reply(&self.node_id, 429, e.to_string());
        }

        match env.kind() {
            EnvelopeType::Task => self.handle_task(env, remote).await,
            other => env.error_reply(
                &self.node_id,
                400,
                format!("unexpected message type: {other}"),
            ),
        }
    }

    fn token_ok(&self, env: &Envelope) -> bool {
        if self.service_token.is_empty() {
            return true;
        }
        let presented = env.payload_str(SERVICE_TOKEN_KEY).unwrap_or_default();
        presented
            .as_bytes()
            .ct_eq(self.service_token.as_bytes())
            .into()
    }

    async fn handle_task(&self, env: &Envelope, remote: &str) -> Envelope {
        let capability = env.payload_str("capability").unwrap_or_default().to_string();
        if capability.is_empty() {
            return env.error_reply(&self.node_id, 400, "task requires a capability");
        }
        if !capability_enabled(&self.handle.capabilities(), &capability) {
            return env.error_reply(
                &self.node_id,
                403,
                format!("capability not offered: {capability}"),
            );
        }

        let mut payload = env.payload().clone();
        payload.remove(SERVICE_TOKEN_KEY);

        match self.handle.handle_task(remote, &capability, &payload).await {
            Ok(result) => {
                let mut out = Payload::new();
                out.insert("capability".to_string(), serde_json::Value::String(capability));
                out.insert("result".to_string(), result);
                env.reply(EnvelopeType::TaskResult, &self.node_id, out)
            }
            Err(e) => {
                warn!(from = remote, capability = %capability, "Task failed: {e}");
                env.error_reply(&self.node_id, 500, e)
            }
        }
    }

    /// Drop idle per-node rate-limit state.
    pub fn compact(&self) {
        self.limiter.retain_recent();
    }
}

fn capability_enabled(caps: &Payload, name: &str) -> bool {
    match caps.get(name) {
        None | Some(serde_json::Value::Null) | Some(serde_json::Value::Bool(false)) => false,
        Some(_) => true,
    }
}
