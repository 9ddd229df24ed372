//! NodeServer — direct inbound endpoint for other nodes and the registry.
//!
//! A [`NodeServer`] binds a TCP listener, upgrades each connection to a
//! WebSocket, and runs every inbound envelope through a [`Dispatcher`]. Bad
//! frames and rate-limited requests get an error envelope; the connection
//! stays open.
//!
//! Shutdown is scoped: [`NodeServer::stop`] closes the listener first, then
//! sends a close frame on every open connection and waits for all of them.

use crate::dispatch::{Dispatcher, ServiceHandle};
use crate::error::WireError;
use crate::rate_limit::RateLimitConfig;
use crate::ws::{next_frame, send_envelope, Frame};
use evolvebot_types::shutdown::wait_for_shutdown;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// Time allowed for the WebSocket upgrade handshake.
const UPGRADE_TIMEOUT: Duration = Duration::from_secs(10);

/// How often idle per-node rate-limit buckets are dropped.
const LIMITER_COMPACT_INTERVAL: Duration = Duration::from_secs(300);

/// Configuration for a NodeServer. Immutable; restart the server to change it.
#[derive(Debug, Clone)]
pub struct NodeServerConfig {
    pub host: String,
    /// `0` lets the OS pick; see [`NodeServer::bound_port`].
    pub port: u16,
    pub node_id: String,
    /// Shared token callers must present. Empty disables the check.
    pub service_token: String,
    pub limits: RateLimitConfig,
}

impl Default for NodeServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            node_id: String::new(),
            service_token: String::new(),
            limits: RateLimitConfig::default(),
        }
    }
}

/// A running node endpoint.
pub struct NodeServer {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl NodeServer {
    /// Bind and start accepting connections.
    ///
    /// Binding failure is returned to the caller; it indicates
    /// misconfiguration rather than a transient fault.
    pub async fn start(
        config: NodeServerConfig,
        handle: Arc<dyn ServiceHandle>,
    ) -> Result<Self, WireError> {
        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        let local_addr = listener.local_addr()?;

        info!(
            "Universe: node endpoint listening on {} (node_id={})",
            local_addr, config.node_id
        );

        let dispatcher = Arc::new(Dispatcher::new(
            config.node_id.clone(),
            config.service_token.clone(),
            &config.limits,
            handle,
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let accept_task = tokio::spawn(accept_loop(listener, dispatcher, shutdown_rx));

        Ok(Self {
            local_addr,
            shutdown_tx,
            accept_task: Mutex::new(Some(accept_task)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The port actually bound (useful when configured with port 0).
    pub fn bound_port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Stop accepting, close every connection, and wait for them to finish.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let task = self
            .accept_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("Universe: node endpoint task failed: {e}");
            }
            info!("Universe: node endpoint on {} stopped", self.local_addr);
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut connections = JoinSet::new();
    let mut compact = tokio::time::interval(LIMITER_COMPACT_INTERVAL);

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    debug!("Universe: accepted connection from {}", addr);
                    connections.spawn(serve_connection(
                        stream,
                        addr,
                        Arc::clone(&dispatcher),
                        shutdown.clone(),
                    ));
                }
                Err(e) => {
                    error!("Universe: accept error: {}", e);
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                        _ = wait_for_shutdown(&mut shutdown) => break,
                    }
                }
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            _ = compact.tick() => dispatcher.compact(),
            _ = wait_for_shutdown(&mut shutdown) => break,
        }
    }

    drop(listener);
    debug!(
        open = connections.len(),
        "Universe: listener closed, draining connections"
    );
    while connections.join_next().await.is_some() {}
}

async fn serve_connection(
    stream: TcpStream,
    addr: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    mut shutdown: watch::Receiver<bool>,
) {
    let ws = match tokio::time::timeout(UPGRADE_TIMEOUT, tokio_tungstenite::accept_async(stream))
        .await
    {
        Ok(Ok(ws)) => ws,
        Ok(Err(e)) => {
            debug!("Universe: WebSocket upgrade from {} failed: {}", addr, e);
            return;
        }
        Err(_) => {
            debug!("Universe: WebSocket upgrade from {} timed out", addr);
            return;
        }
    };
    let (mut tx, mut rx) = ws.split();

    loop {
        let frame = tokio::select! {
            frame = next_frame(&mut rx) => frame,
            _ = wait_for_shutdown(&mut shutdown) => {
                let _ = tx.close().await;
                return;
            }
        };

        let response = match frame {
            Ok(Frame::Envelope(env)) => dispatcher.handle(&env).await,
            Ok(Frame::Invalid(e)) => dispatcher.reject_invalid(&e),
            Ok(Frame::Closed) => {
                debug!("Universe: {} closed the connection", addr);
                break;
            }
            Err(e) => {
                debug!("Universe: connection from {} ended: {}", addr, e);
                break;
            }
        };

        if let Err(e) = send_envelope(&mut tx, &response).await {
            warn!("Universe: failed to reply to {}: {}", addr, e);
            break;
        }
    }

    let _ = tx.close().await;
}
