//! RegistrationSession — keeps this node announced in the registry.
//!
//! Per connection attempt:
//!
//! ```text
//! Connecting ──register/register_ok──▶ Registered ──▶ Heartbeating ──(every interval: update/update_ok)──┐
//!     ▲                                                   │                                          │
//!     └────────────── Reconnecting (backoff) ◀────────────┴──── timeout / disconnect / wrong reply ◀──┘
//! ```
//!
//! `update` is never sent on a connection before its `register_ok`. Backoff
//! resets right after every successful registration.

use crate::backoff::Backoff;
use crate::error::WireError;
use crate::message::{make_envelope, EnvelopeType, Payload};
use crate::ws::{recv_envelope, send_envelope};
use evolvebot_types::shutdown::{sleep_or_shutdown, wait_for_shutdown};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Where the session currently is. Observable through [`RegistrationSession::state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Registered,
    Heartbeating,
    Reconnecting,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct RegistrationConfig {
    pub registry_url: String,
    pub registry_token: String,
    pub node_id: String,
    pub node_name: String,
    /// Advertised inbound address; empty in relay-only mode.
    pub endpoint_url: String,
    pub capabilities: Payload,
    pub capability_card: serde_json::Value,
    pub price_points: u32,
    pub heartbeat_interval: Duration,
    pub handshake_timeout: Duration,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            registry_url: String::new(),
            registry_token: String::new(),
            node_id: String::new(),
            node_name: String::new(),
            endpoint_url: String::new(),
            capabilities: Payload::new(),
            capability_card: serde_json::Value::Object(Payload::new()),
            price_points: 1,
            heartbeat_interval: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(10),
            backoff_initial: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
        }
    }
}

pub struct RegistrationSession {
    config: RegistrationConfig,
    state_tx: watch::Sender<SessionState>,
}

impl RegistrationSession {
    pub fn new(config: RegistrationConfig) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Connecting);
        Self { config, state_tx }
    }

    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, state: SessionState) {
        self.state_tx.send_replace(state);
    }

    /// The payload sent with both `register` and `update`.
    pub fn registration_payload(&self) -> Payload {
        let c = &self.config;
        let mut payload = Payload::new();
        payload.insert("nodeId".to_string(), json!(c.node_id));
        payload.insert("nodeName".to_string(), json!(c.node_name));
        payload.insert("endpointUrl".to_string(), json!(c.endpoint_url));
        payload.insert(
            "capabilities".to_string(),
            serde_json::Value::Object(c.capabilities.clone()),
        );
        payload.insert("capabilityCard".to_string(), c.capability_card.clone());
        payload.insert("pricePoints".to_string(), json!(c.price_points));
        payload.insert("registryToken".to_string(), json!(c.registry_token));
        payload
    }

    /// Register, heartbeat, and reconnect until `shutdown` fires.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = Backoff::new(self.config.backoff_initial, self.config.backoff_max);
        loop {
            if *shutdown.borrow() {
                break;
            }
            self.set_state(SessionState::Connecting);
            let err = tokio::select! {
                r = self.run_attempt(&mut backoff) => r,
                _ = wait_for_shutdown(&mut shutdown) => break,
            };

            self.set_state(SessionState::Reconnecting);
            let delay = backoff.next_delay();
            warn!(
                registry = %self.config.registry_url,
                "Universe: registry connection failed ({err}); retrying in {:.0}s",
                delay.as_secs_f64()
            );
            if !sleep_or_shutdown(delay, &mut shutdown).await {
                break;
            }
        }
        self.set_state(SessionState::Stopped);
        debug!("Universe: registration session stopped");
    }

    /// One connection. Only returns with the error that ended it.
    pub async fn run_attempt(&self, backoff: &mut Backoff) -> WireError {
        match self.attempt(backoff).await {
            Ok(never) => match never {},
            Err(e) => e,
        }
    }

    async fn attempt(&self, backoff: &mut Backoff) -> Result<std::convert::Infallible, WireError> {
        let timeout = self.config.handshake_timeout;
        let (ws, _) = tokio::time::timeout(
            timeout,
            tokio_tungstenite::connect_async(self.config.registry_url.as_str()),
        )
        .await
        .map_err(|_| WireError::Timeout("registry connect"))??;
        let (mut tx, mut rx) = ws.split();

        let register = make_envelope(
            EnvelopeType::Register,
            Some(&self.config.node_id),
            Some(self.registration_payload()),
        );
        send_envelope(&mut tx, &register).await?;
        let reply = tokio::time::timeout(timeout, recv_envelope(&mut rx))
            .await
            .map_err(|_| WireError::Timeout("register_ok"))??;
        if reply.kind() != EnvelopeType::RegisterOk {
            let reason = reply.error_message().unwrap_or("register failed");
            let _ = tx.close().await;
            return Err(WireError::Registration(reason.to_string()));
        }

        self.set_state(SessionState::Registered);
        info!(
            registry = %self.config.registry_url,
            node_id = %self.config.node_id,
            "Universe: registered in registry"
        );
        backoff.reset();

        self.set_state(SessionState::Heartbeating);
        loop {
            tokio::time::sleep(self.config.heartbeat_interval).await;
            let update = make_envelope(
                EnvelopeType::Update,
                Some(&self.config.node_id),
                Some(self.registration_payload()),
            );
            send_envelope(&mut tx, &update).await?;
            let reply = tokio::time::timeout(timeout, recv_envelope(&mut rx))
                .await
                .map_err(|_| WireError::Timeout("update_ok"))??;
            if reply.kind() != EnvelopeType::UpdateOk {
                let reason = reply.error_message().unwrap_or("update failed");
                let _ = tx.close().await;
                return Err(WireError::Registration(reason.to_string()));
            }
            debug!(node_id = %self.config.node_id, "Universe: heartbeat acknowledged");
        }
    }
}
