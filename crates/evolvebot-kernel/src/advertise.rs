//! Advertised endpoint URL resolution and reachability self-check.

use evolvebot_types::config::UniverseConfig;
use evolvebot_wire::ws::{recv_envelope, send_envelope};
use evolvebot_wire::{make_envelope, EnvelopeType};
use futures::StreamExt;
use std::time::Duration;
use tracing::debug;

/// Public-IP lookup timeout.
const DETECT_IP_TIMEOUT: Duration = Duration::from_secs(5);

/// Ask an echo service (plain-text body) for this host's public IP.
pub async fn detect_public_ip(service_url: &str) -> Option<String> {
    let client = reqwest::Client::builder()
        .timeout(DETECT_IP_TIMEOUT)
        .build()
        .unwrap_or_default();
    let resp = match client.get(service_url).send().await {
        Ok(resp) => resp,
        Err(e) => {
            debug!(service = service_url, "Public IP detection failed: {e}");
            return None;
        }
    };
    if !resp.status().is_success() {
        debug!(service = service_url, status = %resp.status(), "Public IP detection failed");
        return None;
    }
    let ip = resp.text().await.ok()?.trim().to_string();
    (!ip.is_empty()).then_some(ip)
}

/// The URL other nodes should use to reach this one.
///
/// Precedence: explicit URL, advertise host, detected public IP, a concrete
/// service host, then loopback.
pub async fn resolve_advertise_url(cfg: &UniverseConfig, bound_port: u16) -> String {
    let explicit = cfg.advertise_url.trim();
    if !explicit.is_empty() {
        return explicit.to_string();
    }

    let port = if cfg.advertise_port > 0 {
        cfg.advertise_port
    } else {
        bound_port
    };

    let host = cfg.advertise_host.trim();
    if !host.is_empty() {
        return format!("ws://{host}:{port}");
    }

    if cfg.detect_public_ip {
        if let Some(ip) = detect_public_ip(&cfg.detect_ip_service).await {
            return format!("ws://{ip}:{port}");
        }
    }

    let service_host = cfg.service_host.trim();
    if !service_host.is_empty() && service_host != "0.0.0.0" {
        return format!("ws://{service_host}:{port}");
    }

    format!("ws://127.0.0.1:{port}")
}

/// Ping `endpoint_url` and expect a pong within `timeout`.
pub async fn self_check(endpoint_url: &str, timeout: Duration) -> bool {
    let check = async {
        let (ws, _) = tokio_tungstenite::connect_async(endpoint_url).await?;
        let (mut tx, mut rx) = ws.split();
        send_envelope(&mut tx, &make_envelope(EnvelopeType::Ping, None, None)).await?;
        let reply = recv_envelope(&mut rx).await?;
        Ok::<bool, evolvebot_wire::WireError>(reply.kind() == EnvelopeType::Pong)
    };
    match tokio::time::timeout(timeout, check).await {
        Ok(Ok(ok)) => ok,
        Ok(Err(e)) => {
            debug!(url = endpoint_url, "Self-check failed: {e}");
            false
        }
        Err(_) => {
            debug!(url = endpoint_url, "Self-check timed out");
            false
        }
    }
}
