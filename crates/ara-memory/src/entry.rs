//! [`MemoryEntry`] and the vector arithmetic shared by the index, the
//! ranker and consolidation.
//!
//! Stored embeddings are always unit length: the record store normalises
//! every vector on insert, so cosine similarity between two stored entries
//! reduces to a dot product.

use ara_types::{MemoryError, MemoryId, Metadata, RecalledMemory};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// MemoryEntry
// ─────────────────────────────────────────────────────────────────────────────

/// A single stored memory fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Never reused, even after the entry is merged away or evicted.
    pub id: MemoryId,
    /// The original text.
    pub content: String,
    /// Unit-length embedding of `content`.
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
    /// Equal to `created_at` until the entry is first returned by a recall.
    pub last_accessed_at: DateTime<Utc>,
    /// Number of recalls that returned this entry.
    pub access_count: u64,
    /// Weight in `[0, 1]`.
    pub importance: f32,
    pub metadata: Metadata,
}

impl MemoryEntry {
    /// Bridge-facing view of this entry, without the embedding.
    pub fn to_recalled(&self, similarity: f32, score: f32) -> RecalledMemory {
        RecalledMemory {
            id: self.id,
            content: self.content.clone(),
            metadata: self.metadata.clone(),
            score,
            similarity,
            importance: self.importance,
            access_count: self.access_count,
            created_at: self.created_at,
            last_accessed_at: self.last_accessed_at,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Vector helpers
// ─────────────────────────────────────────────────────────────────────────────

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Compute the cosine similarity between two equal-length vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` if either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot(a, b) / (norm_a * norm_b)
    }
}

/// Scale `v` to unit length. Returns `None` for a zero vector.
pub fn normalize(v: &[f32]) -> Option<Vec<f32>> {
    let norm = l2_norm(v);
    if norm == 0.0 || !norm.is_finite() {
        return None;
    }
    Some(v.iter().map(|x| x / norm).collect())
}

/// Mean of `vectors`, re-normalised to unit length.
///
/// Returns `None` when `vectors` is empty, the lengths disagree, or the
/// mean collapses to the zero vector.
pub fn centroid<'a, I>(vectors: I) -> Option<Vec<f32>>
where
    I: IntoIterator<Item = &'a [f32]>,
{
    let mut sum: Option<Vec<f32>> = None;
    for v in vectors {
        match sum.as_mut() {
            None => sum = Some(v.to_vec()),
            Some(acc) => {
                if acc.len() != v.len() {
                    return None;
                }
                for (a, x) in acc.iter_mut().zip(v) {
                    *a += x;
                }
            }
        }
    }
    // Normalising the sum gives the same direction as normalising the mean.
    normalize(&sum?)
}

/// Reject vectors that cannot be stored: empty, non-finite or zero-norm.
pub fn validate_embedding(v: &[f32]) -> Result<(), MemoryError> {
    if v.is_empty() {
        return Err(MemoryError::InvalidEmbedding("embedding is empty".into()));
    }
    if v.iter().any(|x| !x.is_finite()) {
        return Err(MemoryError::InvalidEmbedding(
            "embedding contains NaN or infinite components".into(),
        ));
    }
    if l2_norm(v) == 0.0 {
        return Err(MemoryError::InvalidEmbedding(
            "embedding has zero norm".into(),
        ));
    }
    Ok(())
}
