//! Similarity Index.
//!
//! Given a query vector, returns the ids of the `n` stored entries most
//! similar to it by cosine similarity. The index holds no data of its own:
//! it reads whatever [`MemoryRecordStore`] it is handed, so it can never
//! return an id that is absent from that store.
//!
//! The engine calls [`SimilarityIndex::search`] while holding the store's
//! read guard, which makes every search observe one consistent snapshot.
//!
//! [`ExhaustiveIndex`] scans every entry. Stored vectors are unit length,
//! so each comparison is a single dot product against the normalised query.
//! An approximate index can replace it behind the same trait.

use std::cmp::Ordering;

use ara_types::{MemoryError, MemoryId};

use crate::entry::{dot, normalize};
use crate::store::MemoryRecordStore;

/// A search hit before ranking.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub id: MemoryId,
    /// Cosine similarity to the query, in `[-1, 1]`.
    pub similarity: f32,
}

pub trait SimilarityIndex: Send + Sync {
    /// Up to `n` candidates, most similar first, ties broken by ascending id.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::DimensionMismatch`] if the store is non-empty
    /// and `query` has a different length.
    fn search(
        &self,
        store: &MemoryRecordStore,
        query: &[f32],
        n: usize,
    ) -> Result<Vec<Candidate>, MemoryError>;
}

/// Brute-force cosine scan over every stored entry.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExhaustiveIndex;

impl SimilarityIndex for ExhaustiveIndex {
    fn search(
        &self,
        store: &MemoryRecordStore,
        query: &[f32],
        n: usize,
    ) -> Result<Vec<Candidate>, MemoryError> {
        if store.is_empty() || n == 0 {
            return Ok(Vec::new());
        }
        if let Some(expected) = store.dimension()
            && expected != query.len()
        {
            return Err(MemoryError::DimensionMismatch {
                expected,
                actual: query.len(),
            });
        }

        // A zero query is similar to nothing; every candidate scores 0.
        let query = normalize(query);
        let mut hits: Vec<Candidate> = store
            .all()
            .map(|e| Candidate {
                id: e.id,
                similarity: query.as_deref().map_or(0.0, |q| dot(q, &e.embedding)),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });
        hits.truncate(n);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ara_types::Metadata;
    use chrono::Utc;

    fn store_of(vectors: &[&[f32]]) -> MemoryRecordStore {
        let mut store = MemoryRecordStore::new();
        let now = Utc::now();
        for (i, v) in vectors.iter().enumerate() {
            store
                .insert(format!("m{i}"), v.to_vec(), Metadata::new(), now)
                .unwrap();
        }
        store
    }

    #[test]
    fn empty_store_returns_nothing() {
        let store = MemoryRecordStore::new();
        let hits = ExhaustiveIndex.search(&store, &[1.0, 0.0], 5).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn stored_vector_is_its_own_best_match() {
        let store = store_of(&[&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0], &[0.5, 0.5, 0.7]]);
        for entry in store.all() {
            let hits = ExhaustiveIndex.search(&store, &entry.embedding, 1).unwrap();
            assert_eq!(hits[0].id, entry.id);
            assert!((hits[0].similarity - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn results_are_sorted_and_truncated() {
        let store = store_of(&[&[0.0, 1.0], &[1.0, 0.1], &[1.0, 0.0]]);
        let hits = ExhaustiveIndex.search(&store, &[1.0, 0.0], 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, MemoryId(3));
        assert_eq!(hits[1].id, MemoryId(2));
        assert!(hits[0].similarity >= hits[1].similarity);
    }

    #[test]
    fn ties_break_by_ascending_id() {
        let store = store_of(&[&[1.0, 0.0], &[2.0, 0.0]]);
        let hits = ExhaustiveIndex.search(&store, &[1.0, 0.0], 2).unwrap();
        assert_eq!(hits[0].id, MemoryId(1));
        assert_eq!(hits[1].id, MemoryId(2));
    }

    #[test]
    fn query_is_normalised() {
        let store = store_of(&[&[1.0, 0.0]]);
        let hits = ExhaustiveIndex.search(&store, &[10.0, 0.0], 1).unwrap();
        assert!((hits[0].similarity - 1.0).abs() < 1e-5);
    }

    #[test]
    fn zero_query_scores_zero() {
        let store = store_of(&[&[1.0, 0.0]]);
        let hits = ExhaustiveIndex.search(&store, &[0.0, 0.0], 1).unwrap();
        assert_eq!(hits[0].similarity, 0.0);
    }

    #[test]
    fn wrong_dimension_query_fails() {
        let store = store_of(&[&[1.0, 0.0, 0.0]]);
        let err = ExhaustiveIndex.search(&store, &[1.0, 0.0], 1).unwrap_err();
        assert!(matches!(
            err,
            MemoryError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
    }
}
