//! [`MemoryConfig`] – tunables for the memory engine.
//!
//! Every field has a default so a partial `[memory]` table (or none at all)
//! deserialises cleanly. Call [`MemoryConfig::validate`] before handing the
//! config to the engine; [`MemoryEngine`][crate::engine::MemoryEngine]
//! refuses to open with an invalid one.
//!
//! | option | default | valid range |
//! |---|---|---|
//! | `capacity` | 10 000 | ≥ 1 |
//! | `similarity_weight` | 0.6 | `[0, 1]` |
//! | `importance_weight` | 0.15 | `[0, 1]`, sum with `similarity_weight` ≤ 1 |
//! | `recency_half_life` (s) | 604 800 | > 0 |
//! | `consolidation_threshold` (cosine distance) | 0.05 | `[0, 1]` |
//! | `flush_interval` (s, 0 = flush on every mutation) | 5 | ≤ 3600 |
//! | `eviction_margin` | 0.05 | `[0, 0.5)` |
//! | `candidate_multiplier` | 4 | ≥ 1 |
//! | `default_importance` | 0.5 | `[0, 1]` |
//! | `embed_timeout` (ms) | 10 000 | ≥ 1 |
//! | `embed_retry_backoff` (ms) | 250 | ≤ 60 000 |
//! | `summarize_timeout` (ms) | 30 000 | ≥ 1 |
//! | `maintenance_interval` (s, 0 = disabled) | 3 600 | any |
//!
//! The recency weight is not configured directly: it is whatever remains of
//! 1.0 after the similarity and importance weights.

use std::time::Duration;

use ara_types::MemoryError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Maximum number of entries kept after any `remember` returns.
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    #[serde(default = "default_similarity_weight")]
    pub similarity_weight: f32,

    #[serde(default = "default_importance_weight")]
    pub importance_weight: f32,

    /// Seconds after which the recency term has halved.
    #[serde(default = "default_recency_half_life")]
    pub recency_half_life: u64,

    /// Maximum cosine distance (`1 - similarity`) between two entries for
    /// them to be merged.
    #[serde(default = "default_consolidation_threshold")]
    pub consolidation_threshold: f32,

    /// Seconds between background flushes. `0` persists synchronously after
    /// every mutation; otherwise this is the recovery-point objective.
    #[serde(default = "default_flush_interval")]
    pub flush_interval: u64,

    /// Fraction of `capacity` freed below the bound when eviction runs.
    #[serde(default = "default_eviction_margin")]
    pub eviction_margin: f32,

    /// Similarity candidates fetched per requested result before ranking.
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,

    #[serde(default = "default_importance")]
    pub default_importance: f32,

    /// Milliseconds a single embedding call may take.
    #[serde(default = "default_embed_timeout")]
    pub embed_timeout: u64,

    /// Milliseconds to wait before the single retry of a failed embedding.
    #[serde(default = "default_embed_retry_backoff")]
    pub embed_retry_backoff: u64,

    /// Milliseconds a summarization call may take before falling back to
    /// concatenation.
    #[serde(default = "default_summarize_timeout")]
    pub summarize_timeout: u64,

    /// Seconds between scheduled consolidation passes.
    #[serde(default = "default_maintenance_interval")]
    pub maintenance_interval: u64,
}

fn default_capacity() -> usize {
    10_000
}
fn default_similarity_weight() -> f32 {
    0.6
}
fn default_importance_weight() -> f32 {
    0.15
}
fn default_recency_half_life() -> u64 {
    7 * 24 * 60 * 60
}
fn default_consolidation_threshold() -> f32 {
    0.05
}
fn default_flush_interval() -> u64 {
    5
}
fn default_eviction_margin() -> f32 {
    0.05
}
fn default_candidate_multiplier() -> usize {
    4
}
fn default_importance() -> f32 {
    0.5
}
fn default_embed_timeout() -> u64 {
    10_000
}
fn default_embed_retry_backoff() -> u64 {
    250
}
fn default_summarize_timeout() -> u64 {
    30_000
}
fn default_maintenance_interval() -> u64 {
    60 * 60
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            similarity_weight: default_similarity_weight(),
            importance_weight: default_importance_weight(),
            recency_half_life: default_recency_half_life(),
            consolidation_threshold: default_consolidation_threshold(),
            flush_interval: default_flush_interval(),
            eviction_margin: default_eviction_margin(),
            candidate_multiplier: default_candidate_multiplier(),
            default_importance: default_importance(),
            embed_timeout: default_embed_timeout(),
            embed_retry_backoff: default_embed_retry_backoff(),
            summarize_timeout: default_summarize_timeout(),
            maintenance_interval: default_maintenance_interval(),
        }
    }
}

impl MemoryConfig {
    /// Check every option against its documented range.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidConfig`] naming the first offending
    /// option.
    pub fn validate(&self) -> Result<(), MemoryError> {
        if self.capacity == 0 {
            return Err(invalid("capacity must be at least 1"));
        }
        check_unit("similarity_weight", self.similarity_weight)?;
        check_unit("importance_weight", self.importance_weight)?;
        if self.similarity_weight + self.importance_weight > 1.0 + f32::EPSILON {
            return Err(invalid(
                "similarity_weight + importance_weight must not exceed 1.0",
            ));
        }
        if self.recency_half_life == 0 {
            return Err(invalid("recency_half_life must be greater than 0"));
        }
        check_unit("consolidation_threshold", self.consolidation_threshold)?;
        if self.flush_interval > 3600 {
            return Err(invalid("flush_interval must be at most 3600 seconds"));
        }
        if !self.eviction_margin.is_finite() || !(0.0..0.5).contains(&self.eviction_margin) {
            return Err(invalid("eviction_margin must be in [0, 0.5)"));
        }
        if self.candidate_multiplier == 0 {
            return Err(invalid("candidate_multiplier must be at least 1"));
        }
        check_unit("default_importance", self.default_importance)?;
        if self.embed_timeout == 0 {
            return Err(invalid("embed_timeout must be at least 1 ms"));
        }
        if self.embed_retry_backoff > 60_000 {
            return Err(invalid("embed_retry_backoff must be at most 60000 ms"));
        }
        if self.summarize_timeout == 0 {
            return Err(invalid("summarize_timeout must be at least 1 ms"));
        }
        Ok(())
    }

    /// Weight of the recency term: the remainder of 1.0.
    pub fn recency_weight(&self) -> f32 {
        (1.0 - self.similarity_weight - self.importance_weight).max(0.0)
    }

    pub fn recency_half_life(&self) -> Duration {
        Duration::from_secs(self.recency_half_life)
    }

    /// `None` when every mutation is flushed synchronously.
    pub fn flush_interval(&self) -> Option<Duration> {
        (self.flush_interval > 0).then(|| Duration::from_secs(self.flush_interval))
    }

    pub fn maintenance_interval(&self) -> Option<Duration> {
        (self.maintenance_interval > 0).then(|| Duration::from_secs(self.maintenance_interval))
    }

    pub fn embed_timeout(&self) -> Duration {
        Duration::from_millis(self.embed_timeout)
    }

    pub fn embed_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.embed_retry_backoff)
    }

    pub fn summarize_timeout(&self) -> Duration {
        Duration::from_millis(self.summarize_timeout)
    }
}

fn invalid(msg: &str) -> MemoryError {
    MemoryError::InvalidConfig(msg.to_string())
}

fn check_unit(name: &str, value: f32) -> Result<(), MemoryError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(MemoryError::InvalidConfig(format!(
            "{name} must be in [0, 1], got {value}"
        )))
    }
}
