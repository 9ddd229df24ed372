//! RelayClient: inbound reachability for nodes without a public address.
//!
//! The node dials out to a relay and keeps that session open. The first
//! frame is a `relay_hello` carrying the relay token and the node's service
//! token; the relay answers `relay_hello_ok` and from then on forwards
//! requests addressed to this node over the same socket. Each forwarded
//! request goes through the same [`Dispatcher`] as the direct endpoint, so
//! the dual rate limits apply unchanged.
//!
//! The relay checks caller tokens against the service token it received in
//! the hello, so forwarded requests are not re-checked here.

use crate::backoff::Backoff;
use crate::dispatch::{Dispatcher, ServiceHandle};
use crate::error::WireError;
use crate::message::{make_envelope, EnvelopeType, Payload};
use crate::rate_limit::RateLimitConfig;
use crate::ws::{next_frame, recv_envelope, send_envelope, Frame};
use evolvebot_types::shutdown::{sleep_or_shutdown, wait_for_shutdown};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Immutable relay session configuration.
#[derive(Debug, Clone)]
pub struct RelayClientConfig {
    pub relay_url: String,
    pub node_id: String,
    pub relay_token: String,
    pub service_token: String,
    pub limits: RateLimitConfig,
    /// Bound on connect + hello round-trip.
    pub handshake_timeout: Duration,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
}

impl Default for RelayClientConfig {
    fn default() -> Self {
        Self {
            relay_url: String::new(),
            node_id: String::new(),
            relay_token: String::new(),
            service_token: String::new(),
            limits: RateLimitConfig::default(),
            handshake_timeout: Duration::from_secs(10),
            backoff_initial: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
        }
    }
}

pub struct RelayClient {
    config: RelayClientConfig,
    dispatcher: Dispatcher,
}

impl RelayClient {
    pub fn new(config: RelayClientConfig, handle: Arc<dyn ServiceHandle>) -> Self {
        // Caller tokens were already verified by the relay.
        let dispatcher = Dispatcher::new(config.node_id.clone(), "", &config.limits, handle);
        Self { config, dispatcher }
    }

    fn hello_payload(&self) -> Payload {
        let mut payload = Payload::new();
        payload.insert("nodeId".to_string(), json!(self.config.node_id));
        payload.insert("relayToken".to_string(), json!(self.config.relay_token));
        payload.insert("serviceToken".to_string(), json!(self.config.service_token));
        payload
    }

    /// Keep a relay session alive until `shutdown` fires.
    ///
    /// Failures are logged and retried with exponential backoff; this only
    /// returns on shutdown.
    pub async fn run_forever(&self, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = Backoff::new(self.config.backoff_initial, self.config.backoff_max);
        loop {
            if *shutdown.borrow() {
                break;
            }
            // The session gets its own receiver so it can close the socket
            // cleanly; the outer race covers a hung connect or handshake.
            let mut session_shutdown = shutdown.clone();
            let outcome = tokio::select! {
                r = self.run_session(&mut backoff, &mut session_shutdown) => r,
                _ = wait_for_shutdown(&mut shutdown) => break,
            };
            if *shutdown.borrow() {
                break;
            }
            let delay = backoff.next_delay();
            match outcome {
                Ok(()) => info!("Universe: relay session ended; reconnecting in {delay:?}"),
                Err(e) => warn!(
                    relay = %self.config.relay_url,
                    "Universe: relay connection failed ({e}); retrying in {delay:?}"
                ),
            }
            if !sleep_or_shutdown(delay, &mut shutdown).await {
                break;
            }
        }
        debug!("Universe: relay client stopped");
    }

    /// One connection: handshake, then serve forwarded requests.
    async fn run_session(
        &self,
        backoff: &mut Backoff,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), WireError> {
        let timeout = self.config.handshake_timeout;
        let (ws, _) = tokio::time::timeout(
            timeout,
            tokio_tungstenite::connect_async(self.config.relay_url.as_str()),
        )
        .await
        .map_err(|_| WireError::Timeout("relay connect"))??;
        let (mut tx, mut rx) = ws.split();

        let hello = make_envelope(
            EnvelopeType::RelayHello,
            Some(&self.config.node_id),
            Some(self.hello_payload()),
        );
        send_envelope(&mut tx, &hello).await?;
        let reply = tokio::time::timeout(timeout, recv_envelope(&mut rx))
            .await
            .map_err(|_| WireError::Timeout("relay_hello_ok"))??;
        if reply.kind() != EnvelopeType::RelayHelloOk {
            let reason = reply.error_message().unwrap_or("relay hello rejected");
            return Err(WireError::RelayHandshake(reason.to_string()));
        }

        info!(
            relay = %self.config.relay_url,
            node_id = %self.config.node_id,
            "Universe: relay session established"
        );
        backoff.reset();

        loop {
            let frame = tokio::select! {
                frame = next_frame(&mut rx) => frame?,
                _ = wait_for_shutdown(shutdown) => {
                    let _ = tx.close().await;
                    return Ok(());
                }
            };
            let response = match frame {
                Frame::Envelope(env) => self.dispatcher.handle(&env).await,
                Frame::Invalid(e) => self.dispatcher.reject_invalid(&e),
                Frame::Closed => return Err(WireError::ConnectionClosed),
            };
            send_envelope(&mut tx, &response).await?;
        }
    }
}
