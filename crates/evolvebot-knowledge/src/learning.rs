//! Learning manager: three policies over one shared state.
//!
//! - **Curiosity**: periodic small pulls, bounded by a rolling daily quota.
//! - **Task-driven**: pulls packs matching the tags of a finished task.
//! - **Review**: curates buffered task summaries into a new pack.
//!
//! All three, plus the daily digest, run under a single async lock over
//! [`LearningState`]. The lock is held across registry calls so two triggers
//! can never spend the same quota or fetch the same pack twice. The
//! applied-skill scan runs on the blocking pool before the lock is taken.
//!
//! Failures inside a pass are logged and retried on the next trigger. Every
//! pulled pack is saved and recorded before the next fetch starts, so a pass
//! that fails halfway keeps what it already learned.

use crate::applied::{scan_applied_pack_ids, AppliedCache};
use crate::client::KnowledgeRegistry;
use crate::digest::{collect_recent, digest_lines, digest_prompt, fallback_digest};
use crate::error::{KnowledgeError, KnowledgeResult};
use crate::persist::write_json_atomic;
use crate::review::{build_review_pack, summarize_task, ReviewBuffer, ReviewSettings};
use crate::state::LearningState;
use crate::store::{get_inbox_path, save_pack};
use crate::tags::TagExtractor;
use crate::now_ts;
use evolvebot_types::config::{EvolveConfig, KnowledgeConfig};
use evolvebot_types::knowledge::KnowledgePackMeta;
use evolvebot_types::model::{CompletionDriver, CompletionRequest};
use evolvebot_types::shutdown::{sleep_or_shutdown, wait_for_shutdown};
use evolvebot_types::{evolvebot_home, expand_home};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const DAY_SECS: f64 = 24.0 * 3600.0;

/// Candidate over-fetch factors before dedup and filtering.
const CURIOSITY_FETCH_FACTOR: usize = 3;
const TASK_FETCH_FACTOR: usize = 5;

/// Paths and knobs the manager works with.
#[derive(Debug, Clone)]
pub struct LearningSettings {
    pub knowledge: KnowledgeConfig,
    pub state_path: PathBuf,
    pub skills_dir: PathBuf,
    pub inbox_dir: PathBuf,
    /// Publish outbox; `None` when publishing is not configured.
    pub outbox_dir: Option<PathBuf>,
}

impl LearningSettings {
    pub fn from_config(cfg: &EvolveConfig) -> Self {
        let knowledge = cfg.universe.knowledge.clone();
        let outbox_dir = match knowledge.publish_dir.trim() {
            "" => None,
            dir => Some(expand_home(dir)),
        };
        Self {
            inbox_dir: get_inbox_path(&knowledge.inbox_dir),
            outbox_dir,
            state_path: evolvebot_home().join("learning_state.json"),
            skills_dir: cfg.skills_dir(),
            knowledge,
        }
    }
}

struct LearningInner {
    state: LearningState,
}

struct BackgroundTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct LearningManager {
    settings: LearningSettings,
    /// `None` when no registry is configured; pull policies are then no-ops.
    registry: Option<Arc<dyn KnowledgeRegistry>>,
    driver: Option<Arc<dyn CompletionDriver>>,
    tags: TagExtractor,
    inner: Mutex<LearningInner>,
    applied: std::sync::Mutex<AppliedCache>,
    review_buffer: std::sync::Mutex<ReviewBuffer>,
    background: std::sync::Mutex<Option<BackgroundTask>>,
}

impl LearningManager {
    pub fn new(
        settings: LearningSettings,
        registry: Option<Arc<dyn KnowledgeRegistry>>,
        driver: Option<Arc<dyn CompletionDriver>>,
    ) -> Self {
        let state = LearningState::load(&settings.state_path);
        let tags = TagExtractor::new(
            &settings.knowledge.capability_vocab,
            &settings.knowledge.capability_aliases,
        );
        Self {
            settings,
            registry,
            driver,
            tags,
            inner: Mutex::new(LearningInner { state }),
            applied: std::sync::Mutex::new(AppliedCache::default()),
            review_buffer: std::sync::Mutex::new(ReviewBuffer::default()),
            background: std::sync::Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &LearningSettings {
        &self.settings
    }

    /// A copy of the current state.
    pub async fn state(&self) -> LearningState {
        self.inner.lock().await.state.clone()
    }

    pub fn review_buffer_len(&self) -> usize {
        self.review_buffer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    fn save_state(&self, state: &LearningState) {
        if let Err(e) = state.save(&self.settings.state_path) {
            warn!(path = %self.settings.state_path.display(), "Learning state save failed: {e}");
        }
    }

    // -- shared pieces ------------------------------------------------------

    /// Forget learned ids whose packs are now installed as skills.
    /// Pack ids installed as skills. A stale cache is refreshed on the
    /// blocking pool; callers fetch this before taking the state lock.
    async fn applied_ids(&self) -> Arc<HashSet<String>> {
        let cached = self.applied.lock().unwrap_or_else(|e| e.into_inner()).cached();
        if let Some(ids) = cached {
            return ids;
        }
        let dir = self.settings.skills_dir.clone();
        let ids = match tokio::task::spawn_blocking(move || scan_applied_pack_ids(&dir)).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!("Applied-skill scan failed: {e}");
                HashSet::new()
            }
        };
        self.applied.lock().unwrap_or_else(|e| e.into_inner()).store(ids)
    }

    fn prune_applied(&self, inner: &mut LearningInner, applied: &HashSet<String>) {
        let removed = inner.state.learned.remove_all(applied);
        if removed > 0 {
            debug!(removed, "Pruned applied packs from learned ids");
        }
    }

    /// Record `pack_id` as learned, unless it is applied or already known.
    fn mark_learned(&self, inner: &mut LearningInner, applied: &HashSet<String>, pack_id: &str) {
        if pack_id.is_empty() || applied.contains(pack_id) {
            return;
        }
        let evicted = inner
            .state
            .learned
            .insert(pack_id.to_string(), self.settings.knowledge.learned_ids_limit);
        if !evicted.is_empty() {
            debug!(evicted = evicted.len(), "Evicted oldest learned ids");
        }
    }

    async fn list_candidates(
        &self,
        registry: &dyn KnowledgeRegistry,
        tags: &[String],
        limit: usize,
    ) -> KnowledgeResult<Vec<KnowledgePackMeta>> {
        let mut results = Vec::new();
        if tags.is_empty() {
            results.extend(registry.knowledge_list(None, limit).await?);
        } else {
            for tag in tags {
                results.extend(registry.knowledge_list(Some(tag), limit).await?);
            }
        }

        let mut seen = HashSet::new();
        results.retain(|p| !p.pack_id.is_empty() && seen.insert(p.pack_id.clone()));

        let min_score = self.settings.knowledge.learning_min_score;
        if min_score > 0.0 {
            results.retain(|p| p.score >= min_score);
        }
        Ok(results)
    }

    /// Never-learned candidates, most recently updated first.
    fn pick_new(
        state: &LearningState,
        mut packs: Vec<KnowledgePackMeta>,
        limit: usize,
    ) -> Vec<KnowledgePackMeta> {
        if limit == 0 {
            return Vec::new();
        }
        packs.retain(|p| !p.pack_id.is_empty() && !state.learned.contains(&p.pack_id));
        packs.sort_by(|a, b| b.recency().total_cmp(&a.recency()));
        packs.truncate(limit);
        packs
    }

    /// Fetch one pack, save it to the inbox, and record it as learned.
    async fn learn_one(
        &self,
        registry: &dyn KnowledgeRegistry,
        inner: &mut LearningInner,
        applied: &HashSet<String>,
        meta: &KnowledgePackMeta,
    ) -> KnowledgeResult<()> {
        let pack = registry.knowledge_get(&meta.pack_id).await?;
        let inbox = self.settings.inbox_dir.clone();
        tokio::task::spawn_blocking(move || save_pack(&pack, &inbox))
            .await
            .map_err(|e| KnowledgeError::Learning(format!("save task failed: {e}")))??;
        self.mark_learned(inner, applied, &meta.pack_id);
        Ok(())
    }

    // -- curiosity ----------------------------------------------------------

    /// Run curiosity learning if it is due. Returns how many packs were pulled.
    pub async fn maybe_curiosity_learn(&self) -> usize {
        let Some(registry) = self.registry.clone() else {
            return 0;
        };
        if !self.settings.knowledge.curiosity_enabled {
            return 0;
        }
        let applied = self.applied_ids().await;
        let mut inner = self.inner.lock().await;
        match self.curiosity_pass(registry.as_ref(), &mut inner, &applied).await {
            Ok(n) => n,
            Err(e) => {
                warn!("Curiosity learning failed: {e}");
                0
            }
        }
    }

    async fn curiosity_pass(
        &self,
        registry: &dyn KnowledgeRegistry,
        inner: &mut LearningInner,
        applied: &HashSet<String>,
    ) -> KnowledgeResult<usize> {
        let cfg = &self.settings.knowledge;
        let now = now_ts();
        if now - inner.state.last_curiosity_ts < cfg.curiosity_interval_secs as f64 {
            return Ok(0);
        }

        self.prune_applied(inner, applied);
        inner.state.reset_daily_quota_if_needed(now);
        let daily_limit = cfg.curiosity_daily_limit;
        if daily_limit == 0 || inner.state.curiosity_daily_count >= daily_limit {
            return Ok(0);
        }
        let remaining = (daily_limit - inner.state.curiosity_daily_count).max(1) as usize;

        let candidates = self
            .list_candidates(registry, &cfg.curiosity_tags, remaining * CURIOSITY_FETCH_FACTOR)
            .await?;
        let picks = Self::pick_new(&inner.state, candidates, remaining);

        for meta in &picks {
            self.learn_one(registry, inner, applied, meta).await?;
            inner.state.curiosity_daily_count += 1;
            self.save_state(&inner.state);
        }

        inner.state.last_curiosity_ts = now;
        self.save_state(&inner.state);
        if !picks.is_empty() {
            info!(count = picks.len(), "Curiosity learning pulled packs");
        }
        Ok(picks.len())
    }

    // -- task-driven --------------------------------------------------------

    /// Pull packs matching a finished task. Returns how many were pulled.
    pub async fn maybe_task_driven_learn(
        &self,
        task_prompt: &str,
        tool_errors: &[String],
        tools_used: &[String],
    ) -> usize {
        let Some(registry) = self.registry.clone() else {
            return 0;
        };
        let cfg = &self.settings.knowledge;
        if !cfg.task_driven_enabled || cfg.task_driven_max_per_task == 0 {
            return 0;
        }
        let applied = self.applied_ids().await;
        let mut inner = self.inner.lock().await;
        match self
            .task_driven_pass(registry.as_ref(), &mut inner, &applied, task_prompt, tool_errors, tools_used)
            .await
        {
            Ok(n) => n,
            Err(e) => {
                warn!("Task-driven learning failed: {e}");
                0
            }
        }
    }

    async fn task_driven_pass(
        &self,
        registry: &dyn KnowledgeRegistry,
        inner: &mut LearningInner,
        applied: &HashSet<String>,
        task_prompt: &str,
        tool_errors: &[String],
        tools_used: &[String],
    ) -> KnowledgeResult<usize> {
        let cfg = &self.settings.knowledge;
        self.prune_applied(inner, applied);

        let tags = self.tags.extract(task_prompt, tool_errors, tools_used);
        let tagged_only = cfg.task_driven_tagged_only;
        if tagged_only && tags.is_empty() {
            return Ok(0);
        }
        let query_tags: &[String] = if tagged_only { &tags } else { &[] };

        let max = cfg.task_driven_max_per_task as usize;
        let candidates = self
            .list_candidates(registry, query_tags, max * TASK_FETCH_FACTOR)
            .await?;
        let picks = Self::pick_new(&inner.state, candidates, max);

        for meta in &picks {
            self.learn_one(registry, inner, applied, meta).await?;
            self.save_state(&inner.state);
        }
        if !picks.is_empty() {
            info!(count = picks.len(), tags = ?tags, "Task-driven learning pulled packs");
        }
        Ok(picks.len())
    }

    // -- review -------------------------------------------------------------

    /// Buffer a one-line summary of a finished task for review learning.
    pub fn record_task_summary(&self, prompt: &str, answer: Option<&str>, tool_errors: &[String]) {
        if let Some(line) = summarize_task(prompt, answer, tool_errors) {
            self.review_buffer
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(line);
        }
    }

    /// Curate buffered summaries into a pack if review is due.
    ///
    /// Returns the path of the written pack, if one passed the gate.
    pub async fn maybe_review_learn(&self) -> Option<PathBuf> {
        let cfg = &self.settings.knowledge;
        if !cfg.review_enabled {
            return None;
        }
        let mut inner = self.inner.lock().await;
        match self.review_pass(&mut inner).await {
            Ok(path) => path,
            Err(e) => {
                warn!("Review learning failed: {e}");
                None
            }
        }
    }

    async fn review_pass(&self, inner: &mut LearningInner) -> KnowledgeResult<Option<PathBuf>> {
        let cfg = &self.settings.knowledge;
        let now = now_ts();
        if now - inner.state.last_review_ts < cfg.review_interval_secs as f64 {
            return Ok(None);
        }

        let min_tasks = cfg.review_min_tasks.max(1);
        let max_tasks = cfg.review_max_tasks.max(min_tasks);
        let summaries = {
            let buffer = self.review_buffer.lock().unwrap_or_else(|e| e.into_inner());
            if buffer.len() < min_tasks {
                return Ok(None);
            }
            buffer.recent(max_tasks)
        };

        let settings = ReviewSettings::from(cfg);
        let outcome = build_review_pack(self.driver.as_deref(), &settings, &summaries).await;
        if !outcome.advance {
            return Ok(None);
        }

        let written = match outcome.pack {
            Some(pack) => {
                let dir = match (&self.settings.outbox_dir, cfg.review_publish) {
                    (Some(outbox), true) => outbox.clone(),
                    _ => self.settings.inbox_dir.clone(),
                };
                let path = dir.join(format!("review_{}.json", now as i64));
                write_json_atomic(&path, &pack)?;
                info!(path = %path.display(), "Review learning wrote pack");
                Some(path)
            }
            None => None,
        };

        inner.state.last_review_ts = now;
        self.review_buffer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.save_state(&inner.state);
        Ok(written)
    }

    // -- digest -------------------------------------------------------------

    /// Summarize packs received since the last digest.
    ///
    /// Returns `None` when nothing new arrived. Advances `last_digest_ts`
    /// exactly once per call either way.
    pub async fn build_daily_digest(&self, max_items: usize) -> Option<String> {
        let mut inner = self.inner.lock().await;
        let now = now_ts();
        let since = if inner.state.last_digest_ts > 0.0 {
            inner.state.last_digest_ts
        } else {
            now - DAY_SECS
        };

        let inbox = self.settings.inbox_dir.clone();
        let recent = match tokio::task::spawn_blocking(move || collect_recent(&inbox, since, max_items)).await {
            Ok(recent) => recent,
            Err(e) => {
                warn!("Digest scan failed: {e}");
                Vec::new()
            }
        };

        let digest = if recent.is_empty() {
            None
        } else {
            let lines = digest_lines(&recent);
            Some(self.digest_text(&lines).await)
        };

        inner.state.last_digest_ts = now;
        self.save_state(&inner.state);
        digest
    }

    async fn digest_text(&self, lines: &[String]) -> String {
        let cfg = &self.settings.knowledge;
        let driver = match &self.driver {
            Some(driver) if cfg.review_llm_enabled => driver,
            _ => return fallback_digest(lines),
        };
        let request = CompletionRequest {
            prompt: digest_prompt(lines),
            temperature: cfg.review_llm_temperature,
            max_tokens: cfg.review_llm_max_tokens,
        };
        match driver.complete(request).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => fallback_digest(lines),
            Err(e) => {
                warn!("Daily digest model call failed: {e}");
                fallback_digest(lines)
            }
        }
    }

    // -- background ---------------------------------------------------------

    /// Spawn the curiosity + review loop. No-op if it is already running.
    pub fn start_background(self: &Arc<Self>, interval: Duration) {
        let mut guard = self.background.lock().unwrap_or_else(|e| e.into_inner());
        if guard.as_ref().is_some_and(|bg| !bg.handle.is_finished()) {
            return;
        }
        let (shutdown, rx) = watch::channel(false);
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run_background(interval, rx).await });
        *guard = Some(BackgroundTask { shutdown, handle });
        info!(interval_secs = interval.as_secs(), "Learning background loop started");
    }

    /// Signal the background loop and wait for it to finish.
    pub async fn stop_background(&self) {
        let task = self
            .background
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            let _ = task.shutdown.send(true);
            if let Err(e) = task.handle.await {
                warn!("Learning background task failed: {e}");
            }
            info!("Learning background loop stopped");
        }
    }

    async fn run_background(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            // Each pulled pack is flushed on its own, so abandoning a pass
            // mid-way loses nothing already learned.
            tokio::select! {
                _ = async {
                    self.maybe_curiosity_learn().await;
                    self.maybe_review_learn().await;
                } => {}
                _ = wait_for_shutdown(&mut shutdown) => break,
            }
            if !sleep_or_shutdown(interval, &mut shutdown).await {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use evolvebot_types::knowledge::KnowledgePack;
    use evolvebot_types::model::DriverError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // ---------------------------------------------------------------------
    // In-memory registry and scripted model
    // ---------------------------------------------------------------------

    #[derive(Default)]
    struct MemoryRegistry {
        packs: Vec<KnowledgePack>,
        gets: AtomicUsize,
        fail_get_after: Option<usize>,
    }

    impl MemoryRegistry {
        fn with_packs(tag: &str, n: usize) -> Self {
            let packs = (0..n)
                .map(|i| KnowledgePack {
                    pack_id: format!("{tag}-{i}"),
                    name: format!("{tag} pack {i}"),
                    kind: "note".to_string(),
                    summary: format!("summary {i}"),
                    tags: vec![tag.to_string()],
                    score: 10.0 * i as f64,
                    created_ts: 0.0,
                    updated_ts: 1000.0 + i as f64,
                    content: format!("content {i}"),
                    version: "1.0".to_string(),
                })
                .collect();
            Self {
                packs,
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl KnowledgeRegistry for MemoryRegistry {
        async fn knowledge_list(
            &self,
            tag: Option<&str>,
            limit: usize,
        ) -> KnowledgeResult<Vec<KnowledgePackMeta>> {
            Ok(self
                .packs
                .iter()
                .filter(|p| tag.map_or(true, |t| p.tags.iter().any(|x| x == t)))
                .take(limit)
                .map(|p| p.meta())
                .collect())
        }

        async fn knowledge_get(&self, pack_id: &str) -> KnowledgeResult<KnowledgePack> {
            let n = self.gets.fetch_add(1, Ordering::SeqCst);
            if self.fail_get_after.is_some_and(|limit| n >= limit) {
                return Err(KnowledgeError::Registry("registry down".to_string()));
            }
            self.packs
                .iter()
                .find(|p| p.pack_id == pack_id)
                .cloned()
                .ok_or_else(|| KnowledgeError::Registry(format!("no pack {pack_id}")))
        }

        async fn knowledge_publish(
            &self,
            _request: &crate::client::PublishRequest,
        ) -> KnowledgeResult<serde_json::Value> {
            Ok(serde_json::json!({"ok": true}))
        }
    }

    struct ScriptedDriver {
        reply: Result<String, String>,
        calls: AtomicUsize,
    }

    impl ScriptedDriver {
        fn ok(reply: &str) -> Self {
            Self {
                reply: Ok(reply.to_string()),
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                reply: Err("model offline".to_string()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CompletionDriver for ScriptedDriver {
        async fn complete(&self, _request: CompletionRequest) -> Result<String, DriverError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply.clone().map_err(DriverError::Http)
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        settings: LearningSettings,
    }

    fn fixture(tweak: impl FnOnce(&mut KnowledgeConfig)) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let mut knowledge = KnowledgeConfig::default();
        tweak(&mut knowledge);
        let settings = LearningSettings {
            knowledge,
            state_path: dir.path().join("learning_state.json"),
            skills_dir: dir.path().join("workspace").join("skills"),
            inbox_dir: dir.path().join("inbox"),
            outbox_dir: Some(dir.path().join("outbox")),
        };
        Fixture {
            _dir: dir,
            settings,
        }
    }

    fn curious(k: &mut KnowledgeConfig) {
        k.curiosity_enabled = true;
        k.curiosity_interval_secs = 0;
        k.curiosity_daily_limit = 2;
        k.curiosity_tags = vec!["search".to_string()];
    }

    fn install_skill(settings: &LearningSettings, pack_id: &str) {
        let dir = settings.skills_dir.join(pack_id);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("SKILL.md"),
            format!("---\nname: s\npack_id: {pack_id}\n---\n"),
        )
        .unwrap();
    }

    // ---------------------------------------------------------------------
    // Curiosity
    // ---------------------------------------------------------------------

    #[tokio::test]
    async fn test_curiosity_respects_daily_quota() {
        let fx = fixture(curious);
        let registry = Arc::new(MemoryRegistry::with_packs("search", 5));
        let manager = LearningManager::new(fx.settings.clone(), Some(registry.clone()), None);

        assert_eq!(manager.maybe_curiosity_learn().await, 2);
        assert_eq!(manager.maybe_curiosity_learn().await, 0);
        assert_eq!(registry.gets.load(Ordering::SeqCst), 2);

        let state = manager.state().await;
        assert_eq!(state.curiosity_daily_count, 2);
        // Most recently updated first.
        assert_eq!(state.learned.iter().collect::<Vec<_>>(), vec!["search-4", "search-3"]);
        assert!(fx.settings.inbox_dir.join("search-4.json").exists());

        let reloaded = LearningState::load(&fx.settings.state_path);
        assert_eq!(reloaded.learned, state.learned);
        assert_eq!(reloaded.curiosity_daily_count, 2);
        assert!(reloaded.last_curiosity_ts > 0.0);
    }

    #[tokio::test]
    async fn test_curiosity_interval_not_due() {
        let fx = fixture(|k| {
            curious(k);
            k.curiosity_interval_secs = 3600;
        });
        let registry = Arc::new(MemoryRegistry::with_packs("search", 5));
        let manager = LearningManager::new(fx.settings.clone(), Some(registry.clone()), None);
        assert_eq!(manager.maybe_curiosity_learn().await, 2);

        // Quota is refilled by hand; the interval still blocks.
        {
            let mut inner = manager.inner.lock().await;
            inner.state.curiosity_daily_count = 0;
        }
        assert_eq!(manager.maybe_curiosity_learn().await, 0);
    }

    #[tokio::test]
    async fn test_curiosity_min_score_filter() {
        let fx = fixture(|k| {
            curious(k);
            k.learning_min_score = 35.0;
            k.curiosity_daily_limit = 10;
        });
        let registry = Arc::new(MemoryRegistry::with_packs("search", 5));
        let manager = LearningManager::new(fx.settings.clone(), Some(registry), None);
        assert_eq!(manager.maybe_curiosity_learn().await, 1);
        assert!(manager.state().await.learned.contains("search-4"));
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_learned_packs() {
        let fx = fixture(|k| {
            curious(k);
            k.curiosity_daily_limit = 3;
        });
        let registry = Arc::new(MemoryRegistry {
            fail_get_after: Some(1),
            ..MemoryRegistry::with_packs("search", 5)
        });
        let manager = LearningManager::new(fx.settings.clone(), Some(registry), None);
        assert_eq!(manager.maybe_curiosity_learn().await, 0);

        let on_disk = LearningState::load(&fx.settings.state_path);
        assert_eq!(on_disk.learned.len(), 1);
        assert_eq!(on_disk.curiosity_daily_count, 1);
        assert_eq!(on_disk.last_curiosity_ts, 0.0);
    }

    #[tokio::test]
    async fn test_without_registry_is_noop() {
        let fx = fixture(curious);
        let manager = LearningManager::new(fx.settings.clone(), None, None);
        assert_eq!(manager.maybe_curiosity_learn().await, 0);
        assert_eq!(manager.maybe_task_driven_learn("search", &[], &[]).await, 0);
    }

    // ---------------------------------------------------------------------
    // Applied pruning and FIFO retention
    // ---------------------------------------------------------------------

    #[tokio::test]
    async fn test_applied_pack_pruned_and_not_marked() {
        let fx = fixture(|k| {
            curious(k);
            k.curiosity_daily_limit = 5;
        });
        let registry = Arc::new(MemoryRegistry::with_packs("search", 3));
        let manager = LearningManager::new(fx.settings.clone(), Some(registry), None);
        assert_eq!(manager.maybe_curiosity_learn().await, 3);
        assert!(manager.state().await.learned.contains("search-1"));

        install_skill(&fx.settings, "search-1");
        *manager.applied.lock().unwrap() = AppliedCache::new(Duration::ZERO);
        let applied = manager.applied_ids().await;
        {
            let mut inner = manager.inner.lock().await;
            manager.prune_applied(&mut inner, &applied);
            assert!(!inner.state.learned.contains("search-1"));
            manager.mark_learned(&mut inner, &applied, "search-1");
            assert!(!inner.state.learned.contains("search-1"));
        }
    }

    #[tokio::test]
    async fn test_applied_scan_does_not_need_state_lock() {
        let fx = fixture(curious);
        install_skill(&fx.settings, "pack-9");
        let manager = LearningManager::new(fx.settings.clone(), None, None);

        let _held = manager.inner.lock().await;
        let applied = tokio::time::timeout(Duration::from_secs(2), manager.applied_ids())
            .await
            .expect("scan ran behind the state lock");
        assert!(applied.contains("pack-9"));
    }

    #[tokio::test]
    async fn test_learned_ids_limit_evicts_oldest() {
        let fx = fixture(|k| {
            curious(k);
            k.curiosity_daily_limit = 10;
            k.learned_ids_limit = 3;
        });
        let registry = Arc::new(MemoryRegistry::with_packs("search", 5));
        let manager = LearningManager::new(fx.settings.clone(), Some(registry), None);
        assert_eq!(manager.maybe_curiosity_learn().await, 5);

        let state = manager.state().await;
        assert_eq!(
            state.learned.iter().collect::<Vec<_>>(),
            vec!["search-2", "search-1", "search-0"]
        );
    }

    // ---------------------------------------------------------------------
    // Task-driven
    // ---------------------------------------------------------------------

    #[tokio::test]
    async fn test_task_driven_uses_extracted_tags() {
        let fx = fixture(|k| {
            k.task_driven_enabled = true;
            k.task_driven_max_per_task = 1;
            k.capability_vocab = vec!["search".to_string()];
        });
        let registry = Arc::new(MemoryRegistry::with_packs("search", 3));
        let manager = LearningManager::new(fx.settings.clone(), Some(registry.clone()), None);

        assert_eq!(manager.maybe_task_driven_learn("write a poem", &[], &[]).await, 0);
        assert_eq!(registry.gets.load(Ordering::SeqCst), 0);

        assert_eq!(
            manager
                .maybe_task_driven_learn("please SEARCH the web", &[], &[])
                .await,
            1
        );
        let state = manager.state().await;
        assert!(state.learned.contains("search-2"));
        // Task-driven pulls do not spend the curiosity quota.
        assert_eq!(state.curiosity_daily_count, 0);
    }

    // ---------------------------------------------------------------------
    // Review
    // ---------------------------------------------------------------------

    fn reviewing(k: &mut KnowledgeConfig) {
        k.review_enabled = true;
        k.review_interval_secs = 0;
        k.review_min_tasks = 2;
        k.review_min_content_chars = 10;
    }

    fn fill_buffer(manager: &LearningManager, n: usize) {
        for i in 0..n {
            manager.record_task_summary(&format!("question {i}"), Some("answer"), &[]);
        }
    }

    #[tokio::test]
    async fn test_review_gate_reject_advances_and_clears() {
        let fx = fixture(reviewing);
        let driver = Arc::new(ScriptedDriver::ok(r#"{"publish": true, "score": 50, "content": "long enough content"}"#));
        let manager = LearningManager::new(fx.settings.clone(), None, Some(driver));
        fill_buffer(&manager, 3);

        assert!(manager.maybe_review_learn().await.is_none());
        assert_eq!(manager.review_buffer_len(), 0);
        assert!(manager.state().await.last_review_ts > 0.0);
    }

    #[tokio::test]
    async fn test_review_accepted_goes_to_outbox_when_publishing() {
        let fx = fixture(|k| {
            reviewing(k);
            k.review_publish = true;
        });
        let driver = Arc::new(ScriptedDriver::ok(
            r###"{"publish": true, "score": 90, "title": "Search tips", "tags": ["search"], "content_markdown": "## Key Learnings\nuse quotes"}"###,
        ));
        let manager = LearningManager::new(fx.settings.clone(), None, Some(driver));
        fill_buffer(&manager, 2);

        let path = manager.maybe_review_learn().await.unwrap();
        assert!(path.starts_with(fx.settings.outbox_dir.as_ref().unwrap()));
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("review_") && name.ends_with(".json"));

        let pack = crate::store::load_pack_file(&path).unwrap();
        assert_eq!(pack.name, "Search tips");
        assert_eq!(pack.kind, "review");
    }

    #[tokio::test]
    async fn test_review_accepted_goes_to_inbox_without_publish() {
        let fx = fixture(reviewing);
        let driver = Arc::new(ScriptedDriver::ok(
            r#"{"publish": true, "score": 90, "content": "a reusable pattern"}"#,
        ));
        let manager = LearningManager::new(fx.settings.clone(), None, Some(driver));
        fill_buffer(&manager, 2);
        let path = manager.maybe_review_learn().await.unwrap();
        assert!(path.starts_with(&fx.settings.inbox_dir));
    }

    #[tokio::test]
    async fn test_review_without_model_keeps_buffer() {
        let fx = fixture(reviewing);
        let manager = LearningManager::new(fx.settings.clone(), None, None);
        fill_buffer(&manager, 3);
        assert!(manager.maybe_review_learn().await.is_none());
        assert_eq!(manager.review_buffer_len(), 3);
        assert_eq!(manager.state().await.last_review_ts, 0.0);
    }

    #[tokio::test]
    async fn test_review_below_min_tasks_waits() {
        let fx = fixture(reviewing);
        let driver = Arc::new(ScriptedDriver::ok("{}"));
        let manager = LearningManager::new(fx.settings.clone(), None, Some(driver.clone()));
        fill_buffer(&manager, 1);
        assert!(manager.maybe_review_learn().await.is_none());
        assert_eq!(driver.calls.load(Ordering::SeqCst), 0);
    }

    // ---------------------------------------------------------------------
    // Digest
    // ---------------------------------------------------------------------

    #[tokio::test]
    async fn test_digest_falls_back_when_model_fails() {
        let fx = fixture(curious);
        let registry = Arc::new(MemoryRegistry::with_packs("search", 2));
        let driver = Arc::new(ScriptedDriver::failing());
        let manager =
            LearningManager::new(fx.settings.clone(), Some(registry), Some(driver.clone()));
        manager.maybe_curiosity_learn().await;

        let digest = manager.build_daily_digest(12).await.unwrap();
        assert!(digest.starts_with(crate::digest::FALLBACK_HEADER));
        assert!(digest.contains("search pack 1"));
        assert_eq!(driver.calls.load(Ordering::SeqCst), 1);

        // Nothing new since the last digest.
        let first_ts = manager.state().await.last_digest_ts;
        assert!(manager.build_daily_digest(12).await.is_none());
        assert!(manager.state().await.last_digest_ts >= first_ts);
    }

    #[tokio::test]
    async fn test_digest_uses_model_text() {
        let fx = fixture(curious);
        let registry = Arc::new(MemoryRegistry::with_packs("search", 1));
        let driver = Arc::new(ScriptedDriver::ok("  curated digest  "));
        let manager = LearningManager::new(fx.settings.clone(), Some(registry), Some(driver));
        manager.maybe_curiosity_learn().await;
        assert_eq!(manager.build_daily_digest(12).await.as_deref(), Some("curated digest"));
    }

    #[tokio::test]
    async fn test_digest_advances_even_without_manifest() {
        let fx = fixture(|_| {});
        let manager = LearningManager::new(fx.settings.clone(), None, None);
        assert!(manager.build_daily_digest(12).await.is_none());
        assert!(manager.state().await.last_digest_ts > 0.0);
    }

    // ---------------------------------------------------------------------
    // Background loop
    // ---------------------------------------------------------------------

    #[tokio::test]
    async fn test_background_start_stop() {
        let fx = fixture(curious);
        let registry = Arc::new(MemoryRegistry::with_packs("search", 5));
        let manager = Arc::new(LearningManager::new(
            fx.settings.clone(),
            Some(registry),
            None,
        ));
        manager.start_background(Duration::from_secs(3600));
        manager.start_background(Duration::from_secs(3600));

        tokio::time::timeout(Duration::from_secs(5), async {
            while manager.state().await.learned.len() < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        tokio::time::timeout(Duration::from_secs(2), manager.stop_background())
            .await
            .expect("stop should interrupt the interval sleep");
    }
}
