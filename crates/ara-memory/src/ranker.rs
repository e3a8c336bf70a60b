//! Retrieval Ranker.
//!
//! Blends raw similarity with recency and importance so that an old,
//! trivial memory that happens to be textually close does not crowd out a
//! fresh or important one:
//!
//! ```text
//! score = w_s · similarity + w_r · recency_decay(now − last_accessed_at) + w_i · importance
//! recency_decay(Δt) = 0.5 ^ (Δt / half_life)
//! ```
//!
//! `w_r` is the remainder `1 − w_s − w_i`. The similarity-free part of the
//! score is the *retention score*, which eviction uses to decide what to
//! discard.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use ara_memory::ranker::RankingWeights;
//!
//! let w = RankingWeights {
//!     similarity: 0.6,
//!     recency: 0.25,
//!     importance: 0.15,
//!     half_life: Duration::from_secs(3600),
//! };
//! // One half-life ago the recency term has halved.
//! assert!((w.recency_decay(Duration::from_secs(3600).as_secs_f64()) - 0.5).abs() < 1e-9);
//! ```

use std::cmp::Ordering;
use std::time::Duration;

use ara_types::{MemoryError, RecalledMemory};
use chrono::{DateTime, Utc};

use crate::config::MemoryConfig;
use crate::entry::MemoryEntry;
use crate::index::Candidate;
use crate::store::MemoryRecordStore;

// ─────────────────────────────────────────────────────────────────────────────
// RankingWeights
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankingWeights {
    pub similarity: f32,
    pub recency: f32,
    pub importance: f32,
    pub half_life: Duration,
}

impl RankingWeights {
    pub fn from_config(config: &MemoryConfig) -> Self {
        Self {
            similarity: config.similarity_weight,
            recency: config.recency_weight(),
            importance: config.importance_weight,
            half_life: config.recency_half_life(),
        }
    }

    /// `0.5^(elapsed / half_life)`; `1.0` when no time (or negative time,
    /// after a clock step) has passed.
    pub fn recency_decay(&self, elapsed_secs: f64) -> f64 {
        let half_life = self.half_life.as_secs_f64();
        if elapsed_secs <= 0.0 || half_life <= 0.0 {
            return 1.0;
        }
        0.5f64.powf(elapsed_secs / half_life)
    }

    /// Recency plus importance, without the similarity term.
    pub fn retention_score(&self, entry: &MemoryEntry, now: DateTime<Utc>) -> f32 {
        let elapsed = (now - entry.last_accessed_at).num_milliseconds() as f64 / 1000.0;
        self.recency * self.recency_decay(elapsed) as f32 + self.importance * entry.importance
    }

    pub fn final_score(&self, similarity: f32, entry: &MemoryEntry, now: DateTime<Utc>) -> f32 {
        self.similarity * similarity + self.retention_score(entry, now)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Ranker
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Ranker {
    weights: RankingWeights,
}

impl Ranker {
    pub fn new(weights: RankingWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &RankingWeights {
        &self.weights
    }

    /// Order `candidates` by final score and return the top `k`.
    ///
    /// Only the returned entries are touched. Candidates that disappeared
    /// from the store since the search are skipped. Fewer than `k`
    /// candidates yields all of them. Ties are broken by similarity, then by
    /// ascending id.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidArgument`] when `k` is zero.
    pub fn rank(
        &self,
        store: &mut MemoryRecordStore,
        candidates: &[Candidate],
        k: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<RecalledMemory>, MemoryError> {
        if k == 0 {
            return Err(MemoryError::InvalidArgument("k must be at least 1".into()));
        }

        let mut scored: Vec<(Candidate, f32)> = candidates
            .iter()
            .filter_map(|c| {
                let entry = store.get(c.id).ok()?;
                Some((*c, self.weights.final_score(c.similarity, entry, now)))
            })
            .collect();

        scored.sort_by(|(a, sa), (b, sb)| {
            sb.partial_cmp(sa)
                .unwrap_or(Ordering::Equal)
                .then(b.similarity.partial_cmp(&a.similarity).unwrap_or(Ordering::Equal))
                .then(a.id.cmp(&b.id))
        });
        scored.truncate(k);

        let mut out = Vec::with_capacity(scored.len());
        for (candidate, score) in scored {
            store.touch(candidate.id, now);
            let entry = store.get(candidate.id)?;
            out.push(entry.to_recalled(candidate.similarity, score));
        }
        Ok(out)
    }
}
