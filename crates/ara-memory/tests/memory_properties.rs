//! End-to-end behaviour of the memory engine against deterministic fake
//! embedding providers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ara_memory::{
    EmbeddingError, EmbeddingProvider, MemoryConfig, MemoryEngine, MemoryRecordStore,
    persistence::SnapshotFile,
};
use ara_types::{MemoryError, Metadata, Role};
use async_trait::async_trait;

// ─────────────────────────────────────────────────────────────────────────────
// Fakes
// ─────────────────────────────────────────────────────────────────────────────

/// Explicit vectors for known texts; anything else hashes to a
/// pseudo-random 8-d vector.
#[derive(Default)]
struct FakeEmbedder {
    fixed: HashMap<String, Vec<f32>>,
}

impl FakeEmbedder {
    fn with(mut self, text: &str, v: &[f32]) -> Self {
        self.fixed.insert(text.to_string(), v.to_vec());
        self
    }
}

fn hashed_vector(text: &str, dim: usize) -> Vec<f32> {
    let mut state: u64 = 0xcbf2_9ce4_8422_2325;
    for b in text.bytes() {
        state ^= b as u64;
        state = state.wrapping_mul(0x0100_0000_01b3);
    }
    (0..dim)
        .map(|_| {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            ((state >> 33) as f32 / u32::MAX as f32) - 0.25
        })
        .collect()
}

#[async_trait]
impl EmbeddingProvider for FakeEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self
            .fixed
            .get(text)
            .cloned()
            .unwrap_or_else(|| hashed_vector(text, 8)))
    }
}

/// Never answers.
struct StalledEmbedder;

#[async_trait]
impl EmbeddingProvider for StalledEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(vec![1.0; 8])
    }
}

fn config() -> MemoryConfig {
    MemoryConfig {
        flush_interval: 0,
        maintenance_interval: 0,
        ..Default::default()
    }
}

async fn open(config: MemoryConfig, provider: impl EmbeddingProvider + 'static) -> MemoryEngine {
    MemoryEngine::builder(config, Arc::new(provider))
        .open()
        .await
        .unwrap()
}

// ─────────────────────────────────────────────────────────────────────────────
// Properties
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn every_entry_is_its_own_best_match() {
    let engine = open(config(), FakeEmbedder::default()).await;
    for i in 0..25 {
        engine
            .remember(&format!("fact number {i}"), Metadata::new())
            .await
            .unwrap();
    }
    let snapshot = engine.snapshot().await;
    for entry in snapshot.all() {
        let hits = engine.recall_with_embedding(&entry.embedding, 1).await.unwrap();
        assert_eq!(hits[0].id, entry.id, "entry {} not reflexive", entry.id);
        assert!((hits[0].similarity - 1.0).abs() < 1e-5);
    }
}

#[tokio::test]
async fn persisted_store_reloads_identically() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("memory.json");

    let engine = MemoryEngine::builder(config(), Arc::new(FakeEmbedder::default()))
        .state_path(&path)
        .open()
        .await
        .unwrap();
    engine
        .remember("I live in Porto", Metadata::new().with_role(Role::User))
        .await
        .unwrap();
    engine
        .remember(
            "Porto is lovely",
            Metadata::new()
                .with_role(Role::Assistant)
                .with_tag("mood", "warm")
                .with_importance(0.9),
        )
        .await
        .unwrap();
    engine.recall("where do I live", 1).await.unwrap();
    engine.shutdown().await.unwrap();
    let before = engine.snapshot().await;

    let reopened = MemoryEngine::builder(config(), Arc::new(FakeEmbedder::default()))
        .state_path(&path)
        .open()
        .await
        .unwrap();
    assert_eq!(reopened.snapshot().await, before);

    // Ids keep counting from where the previous process stopped.
    let id = reopened.remember("new fact", Metadata::new()).await.unwrap();
    assert_eq!(id.0, before.next_id());
}

#[test]
fn snapshot_file_round_trips_any_store() {
    let dir = tempfile::tempdir().unwrap();
    let file = SnapshotFile::new(dir.path().join("s.json"));
    let empty = MemoryRecordStore::new();
    file.save(&empty).unwrap();
    assert_eq!(file.load().unwrap(), empty);

    let mut store = MemoryRecordStore::new();
    let now = chrono::Utc::now();
    for i in 0..10 {
        store
            .insert(
                format!("m{i}"),
                hashed_vector(&i.to_string(), 16),
                Metadata::new().with_tag("i", i as i64),
                now,
            )
            .unwrap();
    }
    file.save(&store).unwrap();
    assert_eq!(file.load().unwrap(), store);
}

#[tokio::test]
async fn store_never_exceeds_capacity() {
    let engine = open(
        MemoryConfig {
            capacity: 5,
            ..config()
        },
        FakeEmbedder::default(),
    )
    .await;
    for i in 0..40 {
        engine
            .remember(&format!("remembered item {i}"), Metadata::new())
            .await
            .unwrap();
        assert!(engine.stats().await.entries <= 5);
    }
}

#[tokio::test]
async fn recall_touches_exactly_the_returned_entries() {
    let engine = open(config(), FakeEmbedder::default()).await;
    for i in 0..6 {
        engine
            .remember(&format!("note {i}"), Metadata::new())
            .await
            .unwrap();
    }
    let before = engine.snapshot().await;
    let hits = engine.recall("note 3", 2).await.unwrap();
    assert_eq!(hits.len(), 2);
    let after = engine.snapshot().await;

    for entry in before.all() {
        let now = after.get(entry.id).unwrap();
        if hits.iter().any(|h| h.id == entry.id) {
            assert_eq!(now.access_count, entry.access_count + 1);
            assert!(now.last_accessed_at >= entry.last_accessed_at);
        } else {
            assert_eq!(now, entry);
        }
    }
}

#[tokio::test]
async fn consolidation_keeps_access_mass() {
    let engine = open(config(), FakeEmbedder::default()).await;
    for i in 0..12 {
        engine
            .remember(&format!("item {i}"), Metadata::new())
            .await
            .unwrap();
    }
    for q in ["item 1", "item 5", "item 5", "item 9"] {
        engine.recall(q, 3).await.unwrap();
    }
    let before = engine.stats().await;
    engine.consolidate().await.unwrap();
    let after = engine.stats().await;
    assert!(after.entries <= before.entries);
    assert!(after.total_access_count >= before.total_access_count);
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenarios
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn empty_store_recall_is_empty() {
    let engine = open(config(), FakeEmbedder::default()).await;
    assert!(engine.recall("anything", 5).await.unwrap().is_empty());
}

#[tokio::test]
async fn three_near_duplicates_merge_into_one() {
    let provider = FakeEmbedder::default()
        .with("I like jazz", &[1.0, 0.0, 0.0])
        .with("I really like jazz", &[0.999, 0.01, 0.0])
        .with("jazz is my favourite", &[0.998, 0.0, 0.01])
        .with("my dog is Rex", &[0.0, 0.0, 1.0])
        .with("jazz", &[1.0, 0.0, 0.0]);
    let engine = open(
        MemoryConfig {
            consolidation_threshold: 0.01,
            ..config()
        },
        provider,
    )
    .await;
    engine.remember("I like jazz", Metadata::new()).await.unwrap();
    engine.remember("I really like jazz", Metadata::new()).await.unwrap();
    engine.remember("jazz is my favourite", Metadata::new()).await.unwrap();
    let dog = engine.remember("my dog is Rex", Metadata::new()).await.unwrap();
    engine.recall("jazz", 3).await.unwrap();
    engine.recall("jazz", 2).await.unwrap();

    let before = engine.snapshot().await;
    let jazz_mass: u64 = before
        .all()
        .filter(|e| e.id != dog)
        .map(|e| e.access_count)
        .sum();

    let report = engine.consolidate().await.unwrap();
    assert_eq!(report.merged_groups, 1);
    assert_eq!(report.entries_merged, 3);

    let after = engine.snapshot().await;
    assert_eq!(after.len(), 2);
    let merged = after.all().find(|e| e.id != dog).unwrap();
    assert_eq!(merged.access_count, jazz_mass);
    assert!(merged.id.0 > 4, "merged entry must carry a fresh id");
    assert_eq!(after.get(dog).unwrap(), before.get(dog).unwrap());
}

#[tokio::test(start_paused = true)]
async fn stalled_provider_fails_remember_without_inserting() {
    let engine = open(
        MemoryConfig {
            embed_timeout: 50,
            embed_retry_backoff: 10,
            ..config()
        },
        StalledEmbedder,
    )
    .await;
    let err = engine.remember("hello", Metadata::new()).await.unwrap_err();
    assert!(matches!(err, MemoryError::EmbeddingUnavailable(_)));
    assert!(err.is_retryable());
    assert_eq!(engine.stats().await.entries, 0);
}

#[tokio::test]
async fn wrong_dimension_query_fails_and_leaves_store_alone() {
    let provider = FakeEmbedder::default()
        .with("stored", &[1.0, 0.0, 0.0])
        .with("flat query", &[1.0, 0.0]);
    let engine = open(config(), provider).await;
    engine.remember("stored", Metadata::new()).await.unwrap();
    let before = engine.snapshot().await;

    let err = engine.recall("flat query", 3).await.unwrap_err();
    assert!(matches!(
        err,
        MemoryError::DimensionMismatch {
            expected: 3,
            actual: 2
        }
    ));
    assert_eq!(engine.snapshot().await, before);
}
