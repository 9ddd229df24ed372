//! Integration tests for the universe supervisor.
//!
//! A fake registry runs as an in-process WebSocket server; the node endpoint
//! binds to an OS-assigned loopback port. No external services are contacted.

use async_trait::async_trait;
use evolvebot_kernel::{start_universe, ChatService};
use evolvebot_knowledge::{KnowledgeRegistry, KnowledgeResult, PublishRequest};
use evolvebot_types::config::EvolveConfig;
use evolvebot_types::knowledge::{KnowledgePack, KnowledgePackMeta};
use evolvebot_wire::message::{Envelope, EnvelopeType, Payload};
use evolvebot_wire::ws::{recv_envelope, send_envelope};
use evolvebot_wire::{make_envelope, SessionState};
use futures::StreamExt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

// ---------------------------------------------------------------------------
// Fake registry that acknowledges register/update and records them
// ---------------------------------------------------------------------------

async fn spawn_registry() -> (String, Arc<Mutex<Vec<Envelope>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws", listener.local_addr().unwrap());
    let received = Arc::new(Mutex::new(Vec::new()));
    let rec = received.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let rec = rec.clone();
            tokio::spawn(async move {
                let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                let (mut tx, mut rx) = ws.split();
                while let Ok(env) = recv_envelope(&mut rx).await {
                    rec.lock().unwrap().push(env.clone());
                    let kind = match env.kind() {
                        EnvelopeType::Register => EnvelopeType::RegisterOk,
                        _ => EnvelopeType::UpdateOk,
                    };
                    let reply = env.reply(kind, "registry", Payload::new());
                    if send_envelope(&mut tx, &reply).await.is_err() {
                        return;
                    }
                }
            });
        }
    });
    (url, received)
}

/// Accepts every publish and records the request.
#[derive(Default)]
struct RecordingRegistry {
    published: Mutex<Vec<PublishRequest>>,
}

#[async_trait]
impl KnowledgeRegistry for RecordingRegistry {
    async fn knowledge_list(
        &self,
        _tag: Option<&str>,
        _limit: usize,
    ) -> KnowledgeResult<Vec<KnowledgePackMeta>> {
        Ok(Vec::new())
    }

    async fn knowledge_get(&self, pack_id: &str) -> KnowledgeResult<KnowledgePack> {
        Err(evolvebot_knowledge::KnowledgeError::Registry(format!(
            "no pack {pack_id}"
        )))
    }

    async fn knowledge_publish(
        &self,
        request: &PublishRequest,
    ) -> KnowledgeResult<serde_json::Value> {
        self.published.lock().unwrap().push(request.clone());
        Ok(serde_json::json!({"ok": true}))
    }
}

fn node_config(registry_url: &str) -> EvolveConfig {
    let mut cfg = EvolveConfig::default();
    let uc = &mut cfg.universe;
    uc.enabled = true;
    uc.node_id = "node-test".to_string();
    uc.node_name = "tester".to_string();
    uc.registry_url = registry_url.to_string();
    uc.service_host = "127.0.0.1".to_string();
    uc.service_port = 0;
    uc.heartbeat_interval_secs = 1;
    uc.handshake_timeout_secs = 2;
    uc.self_check_timeout_secs = 2.0;
    cfg
}

fn service(cfg: &EvolveConfig) -> Arc<ChatService> {
    Arc::new(ChatService::new(&cfg.universe, None))
}

async fn wait_until<F: Fn() -> bool>(what: &str, f: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !f() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_disabled_universe_starts_nothing() {
    let cfg = EvolveConfig::default();
    let handle = start_universe(&cfg, service(&cfg), None).await.unwrap();
    assert!(handle.is_none());
}

#[tokio::test]
async fn test_start_registers_bound_endpoint_and_shuts_down() {
    let (registry_url, received) = spawn_registry().await;
    let cfg = node_config(&registry_url);
    let handle = start_universe(&cfg, service(&cfg), None)
        .await
        .unwrap()
        .expect("universe should start");

    let port = handle.bound_port().unwrap();
    assert_ne!(port, 0);
    assert_eq!(handle.endpoint_url(), format!("ws://127.0.0.1:{port}"));
    assert_eq!(handle.task_names(), vec!["registration"]);

    wait_until("register + update", || received.lock().unwrap().len() >= 2).await;
    {
        let envs = received.lock().unwrap();
        assert_eq!(envs[0].kind(), EnvelopeType::Register);
        assert_eq!(envs[1].kind(), EnvelopeType::Update);
        let payload = envs[0].payload();
        assert_eq!(payload["nodeId"], "node-test");
        assert_eq!(payload["endpointUrl"], handle.endpoint_url());
        assert_eq!(payload["capabilities"]["llm.chat"], true);
        assert_eq!(payload["capabilityCard"]["nodeName"], "tester");
    }

    // The endpoint answers pings.
    let (ws, _) = tokio_tungstenite::connect_async(handle.endpoint_url())
        .await
        .unwrap();
    let (mut tx, mut rx) = ws.split();
    send_envelope(&mut tx, &make_envelope(EnvelopeType::Ping, Some("peer"), None))
        .await
        .unwrap();
    assert_eq!(recv_envelope(&mut rx).await.unwrap().kind(), EnvelopeType::Pong);

    let mut state = handle.registration_state().unwrap();
    let endpoint = handle.endpoint_url().to_string();
    tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
        .await
        .expect("shutdown should finish promptly");
    assert_eq!(*state.borrow_and_update(), SessionState::Stopped);
    assert!(tokio_tungstenite::connect_async(endpoint.as_str()).await.is_err());
}

#[tokio::test]
async fn test_generated_node_id_and_relay_only_fallback() {
    let (registry_url, received) = spawn_registry().await;
    let mut cfg = node_config(&registry_url);
    cfg.universe.node_id.clear();
    cfg.universe.relay_only = true;
    cfg.universe.self_check_enabled = false;

    let handle = start_universe(&cfg, service(&cfg), None)
        .await
        .unwrap()
        .unwrap();
    // No relay URL: the direct endpoint is still started.
    assert!(handle.bound_port().is_some());
    assert_eq!(handle.node_id().len(), 36);

    wait_until("register", || !received.lock().unwrap().is_empty()).await;
    let node_id = handle.node_id().to_string();
    assert_eq!(received.lock().unwrap()[0].from_node(), node_id);
    handle.shutdown().await;
}

#[tokio::test]
async fn test_publish_only_mode_runs_publish_loop() {
    let dir = tempfile::tempdir().unwrap();
    let outbox = dir.path().join("outbox");
    std::fs::create_dir_all(&outbox).unwrap();
    std::fs::write(
        outbox.join("review_1.json"),
        serde_json::json!({"name": "Review", "kind": "review", "content": "lesson"}).to_string(),
    )
    .unwrap();

    let mut cfg = node_config("");
    cfg.universe.provide_service = false;
    cfg.universe.knowledge.review_publish = true;
    cfg.universe.knowledge.publish_dir = outbox.to_string_lossy().to_string();

    let registry = Arc::new(RecordingRegistry::default());
    let handle = start_universe(&cfg, service(&cfg), Some(registry.clone()))
        .await
        .unwrap()
        .expect("publish loop should run without the service");
    assert!(handle.bound_port().is_none());
    assert_eq!(handle.task_names(), vec!["publish"]);

    let published_file = outbox.join("published").join("review_1.json");
    wait_until("publish", || published_file.exists()).await;
    {
        let published = registry.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].owner_node, "node-test");
    }

    tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_bind_failure_is_boot_error() {
    let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut cfg = node_config("");
    cfg.universe.service_port = taken.local_addr().unwrap().port();

    let err = start_universe(&cfg, service(&cfg), None).await.err().unwrap();
    assert!(matches!(err, evolvebot_kernel::KernelError::BootFailed(_)), "got {err:?}");
}
