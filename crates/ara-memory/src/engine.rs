//! Memory Engine – the facade the conversational bridge talks to.
//!
//! [`MemoryEngine`] composes the record store, similarity index, ranker,
//! consolidation policy and persistence layer behind two core calls:
//!
//! * [`remember`][MemoryEngine::remember] – embed, insert, enforce capacity,
//!   persist.
//! * [`recall`][MemoryEngine::recall] – embed, search, rank, touch.
//!
//! # Concurrency
//!
//! The store sits behind a [`tokio::sync::RwLock`]. Every mutation (insert,
//! touch, merge, evict) takes the write guard; searches and snapshots take
//! the read guard, so a search never observes a half-applied mutation but
//! may miss an insert that lands after it started. Embedding and
//! summarization calls are made with no guard held.
//!
//! # Durability
//!
//! With `flush_interval = 0` every mutation is written through before the
//! call returns. Otherwise mutations mark the engine dirty and a background
//! task flushes at most `flush_interval` seconds later; that interval is the
//! most work a crash can lose. [`shutdown`][MemoryEngine::shutdown] always
//! performs a final flush.
//!
//! # Example
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use ara_memory::{MemoryConfig, MemoryEngine, EmbeddingProvider};
//! # use ara_types::Metadata;
//! # async fn demo(provider: Arc<dyn EmbeddingProvider>) -> Result<(), ara_types::MemoryError> {
//! let engine = MemoryEngine::builder(MemoryConfig::default(), provider)
//!     .state_path("memory.json")
//!     .open()
//!     .await?;
//! engine.remember("My sister is called Ines", Metadata::new()).await?;
//! let hits = engine.recall("what is my sister's name?", 3).await?;
//! engine.shutdown().await?;
//! # Ok(()) }
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use ara_types::{ConversationTurn, MemoryError, MemoryId, Metadata, RecalledMemory, Role};
use chrono::Utc;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::config::MemoryConfig;
use crate::consolidation::{ConsolidationPolicy, ConsolidationReport, Summarizer, concatenate};
use crate::context::{format_context, transcript_windows};
use crate::embedding::{EmbeddingProvider, RetryPolicy, embed_with_retry};
use crate::index::{ExhaustiveIndex, SimilarityIndex};
use crate::persistence::SnapshotFile;
use crate::ranker::{Ranker, RankingWeights};
use crate::store::MemoryRecordStore;

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

/// What to do when the persisted state cannot be loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnCorrupt {
    /// Refuse to open; the error is returned from [`EngineBuilder::open`].
    #[default]
    Fail,
    /// Move the bad file aside as `<name>.corrupt` and start empty.
    StartFresh,
}

/// A reference document to seed into the store.
#[derive(Debug, Clone, PartialEq)]
pub struct SeedDocument {
    pub name: String,
    pub content: String,
    pub importance: Option<f32>,
}

pub struct EngineBuilder {
    config: MemoryConfig,
    embedder: Arc<dyn EmbeddingProvider>,
    summarizer: Option<Arc<dyn Summarizer>>,
    index: Box<dyn SimilarityIndex>,
    state_path: Option<PathBuf>,
    on_corrupt: OnCorrupt,
}

impl EngineBuilder {
    /// Persist to (and load from) this file. Without one the engine is
    /// purely in-memory.
    pub fn state_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_path = Some(path.into());
        self
    }

    /// Use `summarizer` to condense merged entries during maintenance.
    pub fn summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn on_corrupt(mut self, policy: OnCorrupt) -> Self {
        self.on_corrupt = policy;
        self
    }

    /// Replace the exhaustive scan with another index implementation.
    pub fn index(mut self, index: Box<dyn SimilarityIndex>) -> Self {
        self.index = index;
        self
    }

    /// Validate the config, load persisted state and start background work.
    ///
    /// # Errors
    ///
    /// * [`MemoryError::InvalidConfig`] for an out-of-range option.
    /// * [`MemoryError::CorruptState`] if the state file is unreadable and
    ///   the policy is [`OnCorrupt::Fail`].
    /// * [`MemoryError::Io`] if the state file exists but cannot be read.
    pub async fn open(self) -> Result<MemoryEngine, MemoryError> {
        self.config.validate()?;

        let persistence = self.state_path.map(SnapshotFile::new);
        let mut store = match &persistence {
            Some(file) => load_store(file, self.on_corrupt).await?,
            None => MemoryRecordStore::new(),
        };
        store.set_default_importance(self.config.default_importance);

        let policy = ConsolidationPolicy::from_config(&self.config);
        let report = policy.enforce_capacity(&mut store, Utc::now(), None)?;
        if !report.is_empty() {
            info!(
                merged = report.merged_groups,
                evicted = report.evicted,
                "loaded store exceeded capacity"
            );
        }
        let entries = store.len();

        let inner = Arc::new(EngineInner {
            retry: RetryPolicy::from_config(&self.config),
            ranker: Ranker::new(RankingWeights::from_config(&self.config)),
            policy,
            store: RwLock::new(store),
            index: self.index,
            embedder: self.embedder,
            summarizer: self.summarizer,
            dirty: AtomicBool::new(persistence.is_some() && !report.is_empty()),
            persistence,
            flush_lock: Mutex::new(()),
            background: Mutex::new(None),
            config: self.config,
        });
        let engine = MemoryEngine { inner };
        engine.start_background().await;

        info!(
            entries,
            capacity = engine.inner.config.capacity,
            persistent = engine.inner.persistence.is_some(),
            "memory engine opened"
        );
        Ok(engine)
    }
}

async fn load_store(
    file: &SnapshotFile,
    on_corrupt: OnCorrupt,
) -> Result<MemoryRecordStore, MemoryError> {
    let f = file.clone();
    let loaded = tokio::task::spawn_blocking(move || f.load())
        .await
        .map_err(join_error)?;
    match loaded {
        Ok(store) => Ok(store),
        Err(MemoryError::CorruptState(msg)) if on_corrupt == OnCorrupt::StartFresh => {
            warn!(error = %msg, "persisted memory is corrupt, starting fresh");
            let f = file.clone();
            tokio::task::spawn_blocking(move || f.quarantine())
                .await
                .map_err(join_error)??;
            Ok(MemoryRecordStore::new())
        }
        Err(e) => Err(e),
    }
}

fn join_error(e: tokio::task::JoinError) -> MemoryError {
    MemoryError::Internal(format!("blocking task failed: {e}"))
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────────────────────────

/// Point-in-time counters for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemoryStats {
    pub entries: usize,
    pub capacity: usize,
    pub dimension: Option<usize>,
    pub total_access_count: u64,
    /// Mutations not yet flushed to disk.
    pub dirty: bool,
}

struct BackgroundTask {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct EngineInner {
    config: MemoryConfig,
    store: RwLock<MemoryRecordStore>,
    index: Box<dyn SimilarityIndex>,
    ranker: Ranker,
    policy: ConsolidationPolicy,
    embedder: Arc<dyn EmbeddingProvider>,
    summarizer: Option<Arc<dyn Summarizer>>,
    retry: RetryPolicy,
    persistence: Option<SnapshotFile>,
    dirty: AtomicBool,
    flush_lock: Mutex<()>,
    background: Mutex<Option<BackgroundTask>>,
}

/// Cheap to clone; all clones share one store.
#[derive(Clone)]
pub struct MemoryEngine {
    inner: Arc<EngineInner>,
}

impl MemoryEngine {
    pub fn builder(config: MemoryConfig, embedder: Arc<dyn EmbeddingProvider>) -> EngineBuilder {
        EngineBuilder {
            config,
            embedder,
            summarizer: None,
            index: Box::new(ExhaustiveIndex),
            state_path: None,
            on_corrupt: OnCorrupt::default(),
        }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.inner.config
    }

    // ── remember ─────────────────────────────────────────────────────────────

    /// Store `text` and return its id.
    ///
    /// Leading and trailing whitespace is trimmed. If an entry with the same
    /// role and content already exists its id is returned and nothing is
    /// embedded. When the insert pushes the store over capacity the store is
    /// consolidated before this returns; if the new entry was merged, the
    /// merged entry's id is returned. The returned id is never the one
    /// evicted by that pass, even when its retention score is the lowest.
    ///
    /// # Errors
    ///
    /// * [`MemoryError::InvalidArgument`] for blank text or an importance
    ///   outside `[0, 1]`.
    /// * [`MemoryError::EmbeddingUnavailable`] if the provider fails; the
    ///   store is left unchanged.
    /// * [`MemoryError::InvalidEmbedding`] if the provider returns a vector
    ///   the store cannot hold.
    /// * [`MemoryError::Io`] if a synchronous flush fails. The entry stays
    ///   in memory and is retried by the next flush.
    #[instrument(skip(self, text, metadata), fields(chars = text.len()))]
    pub async fn remember(&self, text: &str, metadata: Metadata) -> Result<MemoryId, MemoryError> {
        let content = text.trim();
        if content.is_empty() {
            return Err(MemoryError::InvalidArgument("text must not be blank".into()));
        }
        if let Some(importance) = metadata.importance
            && !(importance.is_finite() && (0.0..=1.0).contains(&importance))
        {
            return Err(MemoryError::InvalidArgument(format!(
                "importance must be in [0, 1], got {importance}"
            )));
        }

        if let Some(id) = self
            .inner
            .store
            .read()
            .await
            .find_by_content(metadata.role, content)
        {
            debug!(%id, "already remembered");
            return Ok(id);
        }

        let embedding =
            embed_with_retry(self.inner.embedder.as_ref(), content, &self.inner.retry).await?;

        let id = {
            let mut store = self.inner.store.write().await;
            // A concurrent remember of the same text may have won the race.
            if let Some(id) = store.find_by_content(metadata.role, content) {
                return Ok(id);
            }
            let now = Utc::now();
            let id = store.insert(content.to_string(), embedding, metadata, now)?;
            let report = self.inner.policy.enforce_capacity(&mut store, now, Some(id))?;
            report.resolve(id).unwrap_or(id)
        };

        self.after_mutation().await?;
        debug!(%id, "remembered");
        Ok(id)
    }

    /// Index a conversation as overlapping context chunks.
    ///
    /// Windows of `chunk_size` turns start every `chunk_size - overlap`
    /// turns; each is remembered with role
    /// [`ContextChunk`][Role::ContextChunk]. Stops at the first failure;
    /// windows remembered before it are kept.
    #[instrument(skip(self, turns), fields(turns = turns.len()))]
    pub async fn remember_transcript(
        &self,
        turns: &[ConversationTurn],
        chunk_size: usize,
        overlap: usize,
    ) -> Result<Vec<MemoryId>, MemoryError> {
        let windows = transcript_windows(turns, chunk_size, overlap)?;
        let mut ids = Vec::with_capacity(windows.len());
        for window in windows {
            let meta = Metadata::new()
                .with_role(Role::ContextChunk)
                .with_tag("kind", "chunk");
            ids.push(self.remember(&window, meta).await?);
        }
        info!(chunks = ids.len(), "transcript indexed");
        Ok(ids)
    }

    /// Seed read-only reference documents through the regular insert path.
    /// Blank documents are skipped.
    #[instrument(skip(self, documents), fields(documents = documents.len()))]
    pub async fn seed(&self, documents: Vec<SeedDocument>) -> Result<Vec<MemoryId>, MemoryError> {
        let mut ids = Vec::with_capacity(documents.len());
        for doc in documents {
            if doc.content.trim().is_empty() {
                debug!(name = %doc.name, "skipping blank document");
                continue;
            }
            let mut meta = Metadata::new()
                .with_role(Role::Knowledge)
                .with_tag("doc_name", doc.name);
            meta.importance = doc.importance;
            ids.push(self.remember(&doc.content, meta).await?);
        }
        Ok(ids)
    }

    // ── recall ───────────────────────────────────────────────────────────────

    /// The `k` best memories for `query`, best first.
    ///
    /// Every returned entry has its access count incremented and its
    /// last-accessed time set; nothing else is modified. An empty store
    /// yields an empty result without calling the embedding provider.
    ///
    /// # Errors
    ///
    /// * [`MemoryError::InvalidArgument`] when `k` is zero or the query is
    ///   blank.
    /// * [`MemoryError::EmbeddingUnavailable`] if the provider fails.
    /// * [`MemoryError::DimensionMismatch`] if the provider's vector does not
    ///   match the store.
    #[instrument(skip(self, query))]
    pub async fn recall(&self, query: &str, k: usize) -> Result<Vec<RecalledMemory>, MemoryError> {
        if k == 0 {
            return Err(MemoryError::InvalidArgument("k must be at least 1".into()));
        }
        if query.trim().is_empty() {
            return Err(MemoryError::InvalidArgument("query must not be blank".into()));
        }
        if self.inner.store.read().await.is_empty() {
            return Ok(Vec::new());
        }
        let embedding =
            embed_with_retry(self.inner.embedder.as_ref(), query.trim(), &self.inner.retry)
                .await?;
        self.recall_with_embedding(&embedding, k).await
    }

    /// [`recall`][Self::recall] with a precomputed query vector.
    pub async fn recall_with_embedding(
        &self,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<RecalledMemory>, MemoryError> {
        if k == 0 {
            return Err(MemoryError::InvalidArgument("k must be at least 1".into()));
        }
        let wanted = k.saturating_mul(self.inner.config.candidate_multiplier);
        let candidates = {
            let store = self.inner.store.read().await;
            self.inner.index.search(&store, query, wanted)?
        };
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let results = {
            let mut store = self.inner.store.write().await;
            self.inner
                .ranker
                .rank(&mut store, &candidates, k, Utc::now())?
        };

        if !results.is_empty()
            && let Err(e) = self.after_mutation().await
        {
            // The results are valid; only the access bookkeeping is not yet durable.
            warn!(error = %e, "flush after recall failed");
        }
        debug!(candidates = candidates.len(), returned = results.len(), "recalled");
        Ok(results)
    }

    /// Recall rendered as a prompt block, or `""` when nothing is found.
    ///
    /// Never fails: errors are logged and degrade to no context.
    pub async fn recall_context(&self, query: &str, k: usize) -> String {
        match self.recall(query, k).await {
            Ok(memories) => format_context(&memories),
            Err(e) => {
                warn!(error = %e, "memory recall failed, continuing without context");
                String::new()
            }
        }
    }

    // ── maintenance ──────────────────────────────────────────────────────────

    /// Merge every group of near-duplicates, then evict down to the
    /// eviction target if the store is over capacity.
    ///
    /// Groups are planned under the read guard and summarized with no guard
    /// held; a group that lost a member in the meantime is skipped.
    #[instrument(skip(self))]
    pub async fn consolidate(&self) -> Result<ConsolidationReport, MemoryError> {
        let plans = {
            let store = self.inner.store.read().await;
            self.inner
                .policy
                .plan_merges(&store)
                .into_iter()
                .map(|group| {
                    let fragments = group
                        .members
                        .iter()
                        .map(|id| store.get(*id).map(|e| e.content.clone()))
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok((group, fragments))
                })
                .collect::<Result<Vec<_>, MemoryError>>()?
        };

        let mut merges = Vec::with_capacity(plans.len());
        for (group, fragments) in plans {
            let content = self.summarize(&fragments).await;
            merges.push((group, content));
        }

        let mut report = ConsolidationReport::default();
        {
            let mut store = self.inner.store.write().await;
            for (group, content) in merges {
                self.inner
                    .policy
                    .apply_merge(&mut store, group, content, &mut report)?;
            }
            report.evicted = self.inner.policy.evict(&mut store, Utc::now()).len();
        }

        if !report.is_empty() {
            self.after_mutation().await?;
        }
        info!(
            merged_groups = report.merged_groups,
            entries_merged = report.entries_merged,
            evicted = report.evicted,
            "consolidation pass complete"
        );
        Ok(report)
    }

    async fn summarize(&self, fragments: &[String]) -> String {
        let Some(summarizer) = &self.inner.summarizer else {
            return concatenate(fragments);
        };
        let timeout = self.inner.config.summarize_timeout();
        match tokio::time::timeout(timeout, summarizer.summarize(fragments)).await {
            Ok(Ok(text)) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(Ok(_)) => {
                warn!("summarizer returned empty text, concatenating instead");
                concatenate(fragments)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "summarizer failed, concatenating instead");
                concatenate(fragments)
            }
            Err(_) => {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "summarizer timed out, concatenating instead"
                );
                concatenate(fragments)
            }
        }
    }

    // ── persistence ──────────────────────────────────────────────────────────

    /// Write the store to disk if anything changed since the last flush.
    /// Returns whether a write happened.
    ///
    /// On failure the engine stays dirty so the next flush retries.
    pub async fn flush(&self) -> Result<bool, MemoryError> {
        let Some(file) = self.inner.persistence.clone() else {
            return Ok(false);
        };
        let _guard = self.inner.flush_lock.lock().await;
        if !self.inner.dirty.swap(false, Ordering::AcqRel) {
            return Ok(false);
        }

        let encoded = {
            let store = self.inner.store.read().await;
            SnapshotFile::encode(&store)
        };
        let result = match encoded {
            Ok(bytes) => tokio::task::spawn_blocking(move || file.write_bytes(&bytes))
                .await
                .map_err(join_error)
                .and_then(|r| r),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            self.inner.dirty.store(true, Ordering::Release);
            return Err(e);
        }
        Ok(true)
    }

    async fn after_mutation(&self) -> Result<(), MemoryError> {
        if self.inner.persistence.is_none() {
            return Ok(());
        }
        self.inner.dirty.store(true, Ordering::Release);
        if self.inner.config.flush_interval().is_none() {
            self.flush().await?;
        }
        Ok(())
    }

    // ── introspection ────────────────────────────────────────────────────────

    pub async fn stats(&self) -> MemoryStats {
        let store = self.inner.store.read().await;
        MemoryStats {
            entries: store.len(),
            capacity: self.inner.config.capacity,
            dimension: store.dimension(),
            total_access_count: store.total_access_count(),
            dirty: self.inner.dirty.load(Ordering::Acquire),
        }
    }

    /// A copy of the whole store as of now.
    pub async fn snapshot(&self) -> MemoryRecordStore {
        self.inner.store.read().await.clone()
    }

    // ── lifecycle ────────────────────────────────────────────────────────────

    async fn start_background(&self) {
        let flush_every = self
            .inner
            .persistence
            .as_ref()
            .and(self.inner.config.flush_interval());
        let maintain_every = self.inner.config.maintenance_interval();
        if flush_every.is_none() && maintain_every.is_none() {
            return;
        }

        let (stop, stop_rx) = watch::channel(false);
        let weak = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(run_background(weak, stop_rx, flush_every, maintain_every));
        *self.inner.background.lock().await = Some(BackgroundTask { stop, handle });
    }

    /// Stop background work and flush. Safe to call more than once.
    pub async fn shutdown(&self) -> Result<(), MemoryError> {
        let task = self.inner.background.lock().await.take();
        if let Some(task) = task {
            let _ = task.stop.send(true);
            if let Err(e) = task.handle.await {
                warn!(error = %e, "background task ended abnormally");
            }
        }
        let flushed = self.flush().await?;
        info!(flushed, "memory engine shut down");
        Ok(())
    }
}

fn ticker(every: Option<Duration>) -> Option<Interval> {
    every.map(|d| {
        let mut interval = tokio::time::interval_at(Instant::now() + d, d);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    })
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(i) => {
            i.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Periodic flush and maintenance. Holds only a weak reference so a
/// dropped engine ends the task at its next tick.
async fn run_background(
    weak: Weak<EngineInner>,
    mut stop: watch::Receiver<bool>,
    flush_every: Option<Duration>,
    maintain_every: Option<Duration>,
) {
    let mut flush_tick = ticker(flush_every);
    let mut maintain_tick = ticker(maintain_every);
    loop {
        tokio::select! {
            _ = stop.changed() => break,
            _ = tick(&mut flush_tick) => {
                let Some(inner) = weak.upgrade() else { break };
                if let Err(e) = (MemoryEngine { inner }).flush().await {
                    warn!(error = %e, "background flush failed");
                }
            }
            _ = tick(&mut maintain_tick) => {
                let Some(inner) = weak.upgrade() else { break };
                if let Err(e) = (MemoryEngine { inner }).consolidate().await {
                    warn!(error = %e, "scheduled consolidation failed");
                }
            }
        }
    }
    debug!("background task stopped");
}
