//! `ara-memory` – Ara's long-term conversational memory.
//!
//! Stores what was said as embedding-backed fragments and brings the
//! relevant ones back when a new turn arrives. Relevance blends cosine
//! similarity with recency and importance; the store stays bounded by
//! merging near-duplicates and evicting low-value entries, and survives
//! restarts through atomic JSON snapshots.
//!
//! # Modules
//!
//! - [`store`] – [`MemoryRecordStore`][store::MemoryRecordStore]: exclusive
//!   owner of every entry; insert, touch, remove, replace.
//! - [`index`] – [`SimilarityIndex`][index::SimilarityIndex] and the
//!   brute-force [`ExhaustiveIndex`][index::ExhaustiveIndex].
//! - [`ranker`] – similarity × recency × importance scoring.
//! - [`consolidation`] – near-duplicate merging, eviction and the
//!   [`Summarizer`][consolidation::Summarizer] port.
//! - [`persistence`] – [`SnapshotFile`][persistence::SnapshotFile]: atomic
//!   save, validated load.
//! - [`embedding`] – the [`EmbeddingProvider`][embedding::EmbeddingProvider]
//!   port with timeout and single retry.
//! - [`context`] – prompt rendering and transcript windowing.
//! - [`engine`] – [`MemoryEngine`][engine::MemoryEngine]: the facade.
//! - [`config`] – [`MemoryConfig`][config::MemoryConfig].

pub mod config;
pub mod consolidation;
pub mod context;
pub mod embedding;
pub mod engine;
pub mod entry;
pub mod index;
pub mod persistence;
pub mod ranker;
pub mod store;

pub use config::MemoryConfig;
pub use consolidation::{ConsolidationReport, Summarizer, SummarizerError};
pub use embedding::{EmbeddingError, EmbeddingProvider};
pub use engine::{EngineBuilder, MemoryEngine, MemoryStats, OnCorrupt, SeedDocument};
pub use entry::MemoryEntry;
pub use store::MemoryRecordStore;
