//! Universe supervisor: composes the node endpoint, relay client,
//! registration session, and publish loop into one handle.
//!
//! Every task listens on one shutdown channel. [`UniverseHandle::shutdown`]
//! signals it, awaits each task, and then stops the endpoint, so nothing is
//! left running once it returns.

use crate::advertise::{resolve_advertise_url, self_check};
use crate::capabilities::{build_capability_card, build_public_capabilities};
use crate::error::{KernelError, KernelResult};
use evolvebot_knowledge::{KnowledgeRegistry, PublishLoop, PublishLoopConfig, RegistryClient};
use evolvebot_types::config::{EvolveConfig, UniverseConfig};
use evolvebot_types::expand_home;
use evolvebot_wire::{
    NodeServer, NodeServerConfig, RateLimitConfig, RegistrationConfig, RegistrationSession,
    RelayClient, RelayClientConfig, ServiceHandle, SessionState,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// A running universe. Dropping it without [`shutdown`](Self::shutdown)
/// leaves the tasks running until the runtime exits.
pub struct UniverseHandle {
    node_id: String,
    endpoint_url: String,
    server: Option<NodeServer>,
    registration_state: Option<watch::Receiver<SessionState>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl UniverseHandle {
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Advertised endpoint; empty in relay-only or publish-only mode.
    pub fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }

    pub fn bound_port(&self) -> Option<u16> {
        self.server.as_ref().map(NodeServer::bound_port)
    }

    /// Registration session state, if a session was started.
    pub fn registration_state(&self) -> Option<watch::Receiver<SessionState>> {
        self.registration_state.clone()
    }

    /// Names of the background tasks that were started.
    pub fn task_names(&self) -> Vec<&'static str> {
        self.tasks.iter().map(|(name, _)| *name).collect()
    }

    /// Signal every task, wait for each to finish, then stop the endpoint.
    pub async fn shutdown(self) {
        info!(node_id = %self.node_id, "Universe: shutting down");
        let _ = self.shutdown_tx.send(true);
        for (name, task) in self.tasks {
            if let Err(e) = task.await {
                warn!(task = name, "Universe: task ended abnormally: {e}");
            }
        }
        if let Some(server) = self.server {
            server.stop().await;
        }
        info!(node_id = %self.node_id, "Universe: stopped");
    }
}

/// HTTP registry client for the configured registry, if any.
pub fn registry_client(cfg: &UniverseConfig) -> Option<Arc<dyn KnowledgeRegistry>> {
    if cfg.registry_url.trim().is_empty() {
        return None;
    }
    match RegistryClient::new(&cfg.registry_url, &cfg.registry_token) {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            warn!("Universe: registry client unavailable: {e}");
            None
        }
    }
}

fn rate_limits(cfg: &UniverseConfig) -> RateLimitConfig {
    RateLimitConfig {
        per_min: cfg.rate_limit_per_min,
        burst: cfg.rate_limit_burst,
        per_min_by_node: cfg.rate_limit_per_min_by_node,
        burst_by_node: cfg.rate_limit_burst_by_node,
    }
}

/// Publish loop settings, when review publishing has an outbox.
fn publish_loop_config(cfg: &UniverseConfig, node_id: &str) -> Option<PublishLoopConfig> {
    let k = &cfg.knowledge;
    let dir = k.publish_dir.trim();
    if !k.review_publish || dir.is_empty() {
        return None;
    }
    let mut config = PublishLoopConfig::new(expand_home(dir), node_id);
    config.interval = Duration::from_secs(k.publish_interval_secs);
    config.max_retries = k.review_publish_max_retries;
    Some(config)
}

fn is_loopback_url(url: &str) -> bool {
    url.starts_with("ws://127.0.0.1") || url.starts_with("ws://localhost")
}

/// Start everything the configuration asks for.
///
/// Returns `None` when the universe is disabled or there is nothing to run.
/// The only startup failure is an endpoint that cannot bind.
pub async fn start_universe(
    cfg: &EvolveConfig,
    service: Arc<dyn ServiceHandle>,
    registry: Option<Arc<dyn KnowledgeRegistry>>,
) -> KernelResult<Option<UniverseHandle>> {
    let mut uc = cfg.universe.clone();
    if !uc.enabled {
        return Ok(None);
    }
    if uc.node_id.trim().is_empty() {
        uc.node_id = uuid::Uuid::new_v4().to_string();
        warn!(
            node_id = %uc.node_id,
            "Universe: node_id missing; generated a new one (persist it in config for stability)"
        );
    }
    let node_id = uc.node_id.clone();
    let serve = uc.provide_service && uc.auto_register;

    let publish = publish_loop_config(&uc, &node_id);
    if publish.is_none() && !serve {
        return Ok(None);
    }

    let mut relay_only = uc.relay_only;
    if relay_only && uc.relay_url.trim().is_empty() {
        warn!("Universe: relay_only is set but relay_url is empty; falling back to direct mode");
        relay_only = false;
    }

    let (shutdown_tx, _) = watch::channel(false);
    let mut server = None;
    let mut endpoint_url = String::new();

    if serve && !relay_only {
        let started = NodeServer::start(
            NodeServerConfig {
                host: uc.service_host.clone(),
                port: uc.service_port,
                node_id: node_id.clone(),
                service_token: uc.service_token.clone(),
                limits: rate_limits(&uc),
            },
            Arc::clone(&service),
        )
        .await
        .map_err(|e| {
            KernelError::BootFailed(format!(
                "cannot bind node endpoint {}:{}: {e}",
                uc.service_host, uc.service_port
            ))
        })?;

        endpoint_url = resolve_advertise_url(&uc, started.bound_port()).await;
        if is_loopback_url(&endpoint_url) {
            warn!(url = %endpoint_url, "Universe: advertised URL is loopback; other machines cannot reach this node");
        }
        server = Some(started);
    }

    let mut tasks: Vec<(&'static str, JoinHandle<()>)> = Vec::new();

    if let Some(config) = publish {
        match &registry {
            Some(registry) => {
                let publisher = PublishLoop::new(config, Arc::clone(registry));
                let rx = shutdown_tx.subscribe();
                tasks.push(("publish", tokio::spawn(async move { publisher.run(rx).await })));
            }
            None => warn!("Universe: review publishing is on but no registry is configured"),
        }
    }

    let mut registration_state = None;
    if serve {
        if !endpoint_url.is_empty() && uc.self_check_enabled {
            let timeout = Duration::from_secs_f64(uc.self_check_timeout_secs.max(0.1));
            if self_check(&endpoint_url, timeout).await {
                info!(url = %endpoint_url, "Universe: self-check passed");
            } else {
                warn!(url = %endpoint_url, "Universe: self-check failed (NAT or firewall may block)");
            }
        }

        if uc.registry_url.trim().is_empty() {
            warn!("Universe: no registry_url configured; node will not be discoverable");
        } else {
            let session = RegistrationSession::new(RegistrationConfig {
                registry_url: uc.registry_url.clone(),
                registry_token: uc.registry_token.clone(),
                node_id: node_id.clone(),
                node_name: uc.node_name.clone(),
                endpoint_url: endpoint_url.clone(),
                capabilities: build_public_capabilities(&uc),
                capability_card: build_capability_card(&uc),
                price_points: uc.price_points.max(1),
                heartbeat_interval: Duration::from_secs(uc.heartbeat_interval_secs.max(1)),
                handshake_timeout: Duration::from_secs(uc.handshake_timeout_secs.max(1)),
                ..Default::default()
            });
            registration_state = Some(session.state());
            let rx = shutdown_tx.subscribe();
            tasks.push(("registration", tokio::spawn(async move { session.run(rx).await })));
        }

        if !uc.relay_url.trim().is_empty() {
            let relay = RelayClient::new(
                RelayClientConfig {
                    relay_url: uc.relay_url.clone(),
                    node_id: node_id.clone(),
                    relay_token: uc.relay_token.clone(),
                    service_token: uc.service_token.clone(),
                    limits: rate_limits(&uc),
                    handshake_timeout: Duration::from_secs(uc.handshake_timeout_secs.max(1)),
                    ..Default::default()
                },
                Arc::clone(&service),
            );
            let rx = shutdown_tx.subscribe();
            tasks.push(("relay", tokio::spawn(async move { relay.run_forever(rx).await })));
            info!(relay = %uc.relay_url, "Universe: relay client started");
        }
    }

    if tasks.is_empty() && server.is_none() {
        return Ok(None);
    }

    info!(
        node_id = %node_id,
        endpoint = %endpoint_url,
        tasks = tasks.len(),
        "Universe: started"
    );
    Ok(Some(UniverseHandle {
        node_id,
        endpoint_url,
        server,
        registration_state,
        shutdown_tx,
        tasks,
    }))
}
