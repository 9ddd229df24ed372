//! Publish loop: drain an outbox directory into the registry.
//!
//! ```text
//! <outbox>/
//!   .publish_state.json   failure counters, survive restarts
//!   *.json                packs waiting to be published
//!   published/            packs the registry accepted
//!   failed/               quarantined packs + <file>.error.txt
//! ```
//!
//! A file that cannot be parsed or published is retried on later passes. Once
//! its counter reaches `max_retries` it is moved to `failed/` and the counter
//! dropped.

use crate::client::{KnowledgeRegistry, PublishRequest};
use crate::error::{KnowledgeError, KnowledgeResult};
use crate::now_ts;
use crate::persist::{read_json, write_json_atomic};
use crate::store::load_pack_file;
use evolvebot_types::shutdown::sleep_or_shutdown;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub const PUBLISH_STATE_FILE: &str = ".publish_state.json";
pub const PUBLISHED_DIR: &str = "published";
pub const FAILED_DIR: &str = "failed";

const MIN_INTERVAL: Duration = Duration::from_secs(10);

/// Per-file failure record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailureInfo {
    pub count: u32,
    pub last_error: String,
    pub updated_ts: f64,
}

/// Persisted failure counters, keyed by file name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishState {
    pub failures: BTreeMap<String, FailureInfo>,
}

impl PublishState {
    pub fn load(outbox: &Path) -> Self {
        match read_json::<Self>(&outbox.join(PUBLISH_STATE_FILE)) {
            Ok(state) => state.unwrap_or_default(),
            Err(e) => {
                warn!(outbox = %outbox.display(), "Publish state unreadable, starting fresh: {e}");
                Self::default()
            }
        }
    }

    pub fn save(&self, outbox: &Path) -> KnowledgeResult<()> {
        write_json_atomic(&outbox.join(PUBLISH_STATE_FILE), self)
    }
}

/// What one pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PublishReport {
    pub published: usize,
    pub retried: usize,
    pub quarantined: usize,
}

#[derive(Debug, Clone)]
pub struct PublishLoopConfig {
    pub outbox_dir: PathBuf,
    /// Sent as `ownerNode` with every publish.
    pub owner_node: String,
    pub interval: Duration,
    pub max_retries: u32,
}

impl PublishLoopConfig {
    pub fn new(outbox_dir: PathBuf, owner_node: impl Into<String>) -> Self {
        Self {
            outbox_dir,
            owner_node: owner_node.into(),
            interval: Duration::from_secs(300),
            max_retries: 3,
        }
    }
}

pub struct PublishLoop {
    config: PublishLoopConfig,
    registry: Arc<dyn KnowledgeRegistry>,
}

impl PublishLoop {
    pub fn new(mut config: PublishLoopConfig, registry: Arc<dyn KnowledgeRegistry>) -> Self {
        config.interval = config.interval.max(MIN_INTERVAL);
        config.max_retries = config.max_retries.max(1);
        Self { config, registry }
    }

    pub fn config(&self) -> &PublishLoopConfig {
        &self.config
    }

    /// Pass after pass until shutdown. The first pass runs immediately.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            outbox = %self.config.outbox_dir.display(),
            interval_secs = self.config.interval.as_secs(),
            "Publish loop started"
        );
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.run_pass().await {
                Ok(report) if report != PublishReport::default() => {
                    info!(
                        published = report.published,
                        retried = report.retried,
                        quarantined = report.quarantined,
                        "Publish pass complete"
                    );
                }
                Ok(_) => {}
                Err(e) => warn!("Publish pass failed: {e}"),
            }
            if !sleep_or_shutdown(self.config.interval, &mut shutdown).await {
                break;
            }
        }
        info!("Publish loop stopped");
    }

    /// One pass over the outbox. The failure map is saved even when every
    /// file fails.
    pub async fn run_pass(&self) -> KnowledgeResult<PublishReport> {
        let outbox = &self.config.outbox_dir;
        std::fs::create_dir_all(outbox)?;

        let mut state = PublishState::load(outbox);
        let mut report = PublishReport::default();

        for path in pending_files(outbox)? {
            let Some(file_name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
                continue;
            };
            match self.publish_file(&path).await {
                Ok(()) => {
                    state.failures.remove(&file_name);
                    match move_into(&path, &outbox.join(PUBLISHED_DIR)) {
                        Ok(dest) => debug!(file = %file_name, dest = %dest.display(), "Published pack"),
                        Err(e) => warn!(file = %file_name, "Published but could not move: {e}"),
                    }
                    report.published += 1;
                }
                Err(e) => {
                    let error = e.to_string();
                    let entry = state.failures.entry(file_name.clone()).or_default();
                    entry.count += 1;
                    entry.last_error = error.clone();
                    entry.updated_ts = now_ts();

                    if entry.count >= self.config.max_retries {
                        let attempts = entry.count;
                        state.failures.remove(&file_name);
                        quarantine(&path, &outbox.join(FAILED_DIR), &error);
                        warn!(file = %file_name, attempts, "Quarantined pack: {error}");
                        report.quarantined += 1;
                    } else {
                        debug!(file = %file_name, attempts = entry.count, "Publish failed, will retry: {error}");
                        report.retried += 1;
                    }
                }
            }
        }

        state.save(outbox)?;
        Ok(report)
    }

    async fn publish_file(&self, path: &Path) -> KnowledgeResult<()> {
        let pack = load_pack_file(path)?;
        let request = PublishRequest {
            id: pack.effective_id(),
            name: pack.name,
            kind: pack.kind,
            content: pack.content,
            summary: pack.summary,
            tags: pack.tags,
            version: pack.version,
            owner_node: self.config.owner_node.clone(),
            allow_update: true,
        };
        self.registry.knowledge_publish(&request).await?;
        Ok(())
    }
}

/// Outbox candidates: visible `*.json` files, sorted by name.
fn pending_files(outbox: &Path) -> KnowledgeResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(outbox)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') || !name.ends_with(".json") {
            continue;
        }
        files.push(entry.path());
    }
    files.sort();
    Ok(files)
}

/// Move `src` into `dir`, suffixing `_<unix_ts>` when the name is taken.
fn move_into(src: &Path, dir: &Path) -> KnowledgeResult<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let name = src
        .file_name()
        .ok_or_else(|| KnowledgeError::Publish(format!("no file name: {}", src.display())))?;
    let mut dest = dir.join(name);
    if dest.exists() {
        let stem = src
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let ts = chrono::Utc::now().timestamp();
        let renamed = match src.extension() {
            Some(ext) => format!("{stem}_{ts}.{}", ext.to_string_lossy()),
            None => format!("{stem}_{ts}"),
        };
        dest = dir.join(renamed);
    }
    std::fs::rename(src, &dest)?;
    Ok(dest)
}

fn quarantine(path: &Path, failed_dir: &Path, error: &str) {
    match move_into(path, failed_dir) {
        Ok(dest) => {
            let mut note = dest.clone().into_os_string();
            note.push(".error.txt");
            if let Err(e) = std::fs::write(PathBuf::from(note), format!("{error}\n")) {
                warn!(file = %dest.display(), "Could not write error note: {e}");
            }
        }
        Err(e) => warn!(file = %path.display(), "Quarantine move failed: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use evolvebot_types::knowledge::{KnowledgePack, KnowledgePackMeta};
    use std::sync::Mutex;

    /// Accepts every publish unless `fail` is set; records requests.
    #[derive(Default)]
    struct RecordingRegistry {
        fail: bool,
        requests: Mutex<Vec<PublishRequest>>,
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
            Err(KnowledgeError::Registry(format!("no pack {pack_id}")))
        }

        async fn knowledge_publish(
            &self,
            request: &PublishRequest,
        ) -> KnowledgeResult<serde_json::Value> {
            self.requests.lock().unwrap().push(request.clone());
            if self.fail {
                return Err(KnowledgeError::Publish("registry returned 500".to_string()));
            }
            Ok(serde_json::json!({"ok": true}))
        }
    }

    fn publish_loop(outbox: &Path, registry: Arc<RecordingRegistry>) -> PublishLoop {
        PublishLoop::new(
            PublishLoopConfig::new(outbox.to_path_buf(), "node-a"),
            registry,
        )
    }

    fn write_pack(outbox: &Path, file: &str, body: serde_json::Value) {
        std::fs::create_dir_all(outbox).unwrap();
        std::fs::write(outbox.join(file), body.to_string()).unwrap();
    }

    #[test]
    fn test_config_floors() {
        let mut config = PublishLoopConfig::new(PathBuf::from("/tmp/x"), "n");
        config.interval = Duration::from_secs(1);
        config.max_retries = 0;
        let pl = PublishLoop::new(config, Arc::new(RecordingRegistry::default()));
        assert_eq!(pl.config().interval, MIN_INTERVAL);
        assert_eq!(pl.config().max_retries, 1);
    }

    #[tokio::test]
    async fn test_publish_success_moves_file() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(RecordingRegistry::default());
        write_pack(
            dir.path(),
            "a.json",
            serde_json::json!({"name": "tips", "kind": "note", "content": "body", "tags": ["x"]}),
        );
        write_pack(
            dir.path(),
            "b.json",
            serde_json::json!({"id": "srv-b", "name": "b", "kind": "note", "content": "c"}),
        );
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let report = publish_loop(dir.path(), registry.clone()).run_pass().await.unwrap();
        assert_eq!(report.published, 2);
        assert!(dir.path().join(PUBLISHED_DIR).join("a.json").exists());
        assert!(!dir.path().join("a.json").exists());
        assert!(dir.path().join("notes.txt").exists());

        let requests = registry.requests.lock().unwrap();
        assert_eq!(
            requests[0].id,
            evolvebot_types::knowledge::compute_pack_id("tips", "note", "body")
        );
        assert_eq!(requests[1].id, "srv-b");
        assert!(requests.iter().all(|r| r.allow_update && r.owner_node == "node-a"));
    }

    #[tokio::test]
    async fn test_unparseable_quarantined_after_max_retries() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(RecordingRegistry::default());
        write_pack(dir.path(), "bad.json", serde_json::json!({"name": "no content"}));
        let pl = publish_loop(dir.path(), registry);

        for attempt in 1..=2u32 {
            let report = pl.run_pass().await.unwrap();
            assert_eq!(report.retried, 1);
            let state = PublishState::load(dir.path());
            assert_eq!(state.failures["bad.json"].count, attempt);
        }

        let report = pl.run_pass().await.unwrap();
        assert_eq!(report.quarantined, 1);
        let failed = dir.path().join(FAILED_DIR);
        assert!(failed.join("bad.json").exists());
        assert!(failed.join("bad.json.error.txt").exists());
        assert!(PublishState::load(dir.path()).failures.is_empty());

        // Nothing left to do on the next pass.
        assert_eq!(pl.run_pass().await.unwrap(), PublishReport::default());
        let quarantined = std::fs::read_dir(&failed)
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .map(|e| e.file_name().to_string_lossy().ends_with(".json"))
                    .unwrap_or(false)
            })
            .count();
        assert_eq!(quarantined, 1);
    }

    #[tokio::test]
    async fn test_registry_failure_counts_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(RecordingRegistry {
            fail: true,
            ..Default::default()
        });
        write_pack(
            dir.path(),
            "p.json",
            serde_json::json!({"name": "p", "kind": "note", "content": "c"}),
        );

        publish_loop(dir.path(), registry.clone()).run_pass().await.unwrap();
        // A fresh loop reads the persisted counter.
        publish_loop(dir.path(), registry.clone()).run_pass().await.unwrap();
        let state = PublishState::load(dir.path());
        assert_eq!(state.failures["p.json"].count, 2);
        assert!(state.failures["p.json"].last_error.contains("500"));

        let ok = Arc::new(RecordingRegistry::default());
        let report = publish_loop(dir.path(), ok).run_pass().await.unwrap();
        assert_eq!(report.published, 1);
        assert!(PublishState::load(dir.path()).failures.is_empty());
    }

    #[test]
    fn test_move_into_suffixes_on_collision() {
        let dir = tempfile::tempdir().unwrap();
        let dest_dir = dir.path().join("published");
        std::fs::create_dir_all(&dest_dir).unwrap();
        std::fs::write(dest_dir.join("x.json"), "old").unwrap();
        std::fs::write(dir.path().join("x.json"), "new").unwrap();

        let dest = move_into(&dir.path().join("x.json"), &dest_dir).unwrap();
        let name = dest.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("x_") && name.ends_with(".json"));
        assert_eq!(std::fs::read_to_string(dest_dir.join("x.json")).unwrap(), "old");
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let pl = Arc::new(publish_loop(dir.path(), Arc::new(RecordingRegistry::default())));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn({
            let pl = pl.clone();
            async move { pl.run(rx).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(dir.path().join(PUBLISH_STATE_FILE).exists());
    }
}
