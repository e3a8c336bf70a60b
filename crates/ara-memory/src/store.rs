//! Memory Record Store.
//!
//! [`MemoryRecordStore`] exclusively owns every [`MemoryEntry`]. It is a
//! plain, single-threaded data structure; the engine wraps it in a
//! read-write lock so mutations (`insert`, `touch`, `remove`, `replace`)
//! are serialised and reads (`all`, `get`) only ever see a whole store.
//!
//! # Invariants
//!
//! * Every stored vector has the store's dimensionality. The first insert
//!   into an empty store fixes it.
//! * Ids come from a counter that only moves forward, so they are unique
//!   over the store's whole lifetime.
//! * Iteration order is id order, which is also insertion order.

use std::collections::BTreeMap;

use ara_types::{MemoryError, MemoryId, Metadata, Role};
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::entry::{MemoryEntry, l2_norm, normalize, validate_embedding};

/// Importance assigned when neither the caller nor the config supplies one.
pub const DEFAULT_IMPORTANCE: f32 = 0.5;

/// How far a loaded vector's norm may drift from 1.0.
const UNIT_NORM_TOLERANCE: f32 = 1e-3;

#[derive(Debug, Clone)]
pub struct MemoryRecordStore {
    dimension: Option<usize>,
    next_id: u64,
    entries: BTreeMap<MemoryId, MemoryEntry>,
    default_importance: f32,
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Two stores are equal when their persisted state is equal; the default
/// importance is runtime configuration and is not compared.
impl PartialEq for MemoryRecordStore {
    fn eq(&self, other: &Self) -> bool {
        self.dimension == other.dimension
            && self.next_id == other.next_id
            && self.entries == other.entries
    }
}

impl MemoryRecordStore {
    /// Create an empty store. The dimensionality is fixed by the first insert.
    pub fn new() -> Self {
        Self {
            dimension: None,
            next_id: 1,
            entries: BTreeMap::new(),
            default_importance: DEFAULT_IMPORTANCE,
        }
    }

    /// Rebuild a store from persisted parts, checking every invariant.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::CorruptState`] on a zero id counter, duplicate
    /// ids, ids that the counter has not handed out yet, vectors that are of
    /// the wrong length or not unit length, or importances outside `[0, 1]`.
    pub fn from_parts(
        dimension: Option<usize>,
        next_id: u64,
        entries: Vec<MemoryEntry>,
    ) -> Result<Self, MemoryError> {
        if dimension.is_none() && !entries.is_empty() {
            return Err(MemoryError::CorruptState(
                "entries present but no dimensionality recorded".into(),
            ));
        }
        if dimension == Some(0) {
            return Err(MemoryError::CorruptState("dimensionality of 0".into()));
        }
        if next_id == 0 {
            return Err(MemoryError::CorruptState("id counter of 0".into()));
        }
        let mut map = BTreeMap::new();
        for entry in entries {
            if entry.id.0 == 0 || entry.id.0 >= next_id {
                return Err(MemoryError::CorruptState(format!(
                    "entry {} is outside the allocated id range (next id {next_id})",
                    entry.id
                )));
            }
            if Some(entry.embedding.len()) != dimension {
                return Err(MemoryError::CorruptState(format!(
                    "entry {} has a {}-d vector, store is {}-d",
                    entry.id,
                    entry.embedding.len(),
                    dimension.unwrap_or(0)
                )));
            }
            validate_embedding(&entry.embedding)
                .map_err(|e| MemoryError::CorruptState(format!("entry {}: {e}", entry.id)))?;
            let norm = l2_norm(&entry.embedding);
            if (norm - 1.0).abs() > UNIT_NORM_TOLERANCE {
                return Err(MemoryError::CorruptState(format!(
                    "entry {} vector is not unit length (norm {norm})",
                    entry.id
                )));
            }
            check_importance(entry.importance)
                .map_err(|e| MemoryError::CorruptState(format!("entry {}: {e}", entry.id)))?;
            let id = entry.id;
            if map.insert(id, entry).is_some() {
                return Err(MemoryError::CorruptState(format!("duplicate id {id}")));
            }
        }
        Ok(Self {
            dimension,
            next_id,
            entries: map,
            default_importance: DEFAULT_IMPORTANCE,
        })
    }

    /// Importance used when an insert's metadata carries none.
    pub fn set_default_importance(&mut self, importance: f32) {
        self.default_importance = importance;
    }

    // ── Mutations ────────────────────────────────────────────────────────────

    /// Reserve the next id without inserting anything.
    pub fn allocate_id(&mut self) -> MemoryId {
        let id = MemoryId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Store a new entry and return its id.
    ///
    /// The embedding is normalised to unit length. `importance` is taken
    /// from `metadata` when present, otherwise the default applies.
    ///
    /// # Errors
    ///
    /// * [`MemoryError::InvalidEmbedding`] if the vector is empty,
    ///   non-finite, zero-norm, or its length differs from the store's
    ///   dimensionality while the store is non-empty.
    /// * [`MemoryError::InvalidArgument`] if the importance is outside
    ///   `[0, 1]`.
    pub fn insert(
        &mut self,
        content: String,
        embedding: Vec<f32>,
        mut metadata: Metadata,
        now: DateTime<Utc>,
    ) -> Result<MemoryId, MemoryError> {
        validate_embedding(&embedding)?;
        if let Some(expected) = self.dimension
            && !self.entries.is_empty()
            && expected != embedding.len()
        {
            return Err(MemoryError::InvalidEmbedding(format!(
                "store holds {expected}-d vectors, got {}-d",
                embedding.len()
            )));
        }
        let importance = metadata.importance.take().unwrap_or(self.default_importance);
        check_importance(importance)?;
        let embedding = normalize(&embedding)
            .ok_or_else(|| MemoryError::InvalidEmbedding("embedding has zero norm".into()))?;

        self.dimension = Some(embedding.len());
        let id = self.allocate_id();
        self.entries.insert(
            id,
            MemoryEntry {
                id,
                content,
                embedding,
                created_at: now,
                last_accessed_at: now,
                access_count: 0,
                importance,
                metadata,
            },
        );
        debug!(%id, entries = self.entries.len(), "inserted memory");
        Ok(id)
    }

    /// Record a retrieval of `id`.
    ///
    /// Missing ids are a no-op (the entry may have been evicted between
    /// search and ranking); the return value tells whether anything was
    /// updated.
    pub fn touch(&mut self, id: MemoryId, now: DateTime<Utc>) -> bool {
        match self.entries.get_mut(&id) {
            Some(entry) => {
                entry.access_count += 1;
                entry.last_accessed_at = now;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: MemoryId) -> Option<MemoryEntry> {
        self.entries.remove(&id)
    }

    /// Remove `id` and store `entry` in its place, returning the old entry.
    ///
    /// `entry.id` must come from [`allocate_id`][Self::allocate_id] and must
    /// not be in use.
    ///
    /// # Errors
    ///
    /// * [`MemoryError::NotFound`] if `id` is absent.
    /// * [`MemoryError::Internal`] if `entry.id` was never allocated or is
    ///   already stored.
    /// * [`MemoryError::InvalidEmbedding`] if the replacement vector has the
    ///   wrong length or is not unit length.
    pub fn replace(&mut self, id: MemoryId, entry: MemoryEntry) -> Result<MemoryEntry, MemoryError> {
        if !self.entries.contains_key(&id) {
            return Err(MemoryError::NotFound(id));
        }
        if entry.id.0 == 0 || entry.id.0 >= self.next_id {
            return Err(MemoryError::Internal(format!(
                "replacement id {} was never allocated",
                entry.id
            )));
        }
        if entry.id != id && self.entries.contains_key(&entry.id) {
            return Err(MemoryError::Internal(format!(
                "replacement id {} is already in use",
                entry.id
            )));
        }
        validate_embedding(&entry.embedding)?;
        if Some(entry.embedding.len()) != self.dimension {
            return Err(MemoryError::InvalidEmbedding(format!(
                "replacement has a {}-d vector, store is {}-d",
                entry.embedding.len(),
                self.dimension.unwrap_or(0)
            )));
        }
        check_importance(entry.importance)?;

        let old = self.entries.remove(&id).ok_or(MemoryError::NotFound(id))?;
        self.entries.insert(entry.id, entry);
        Ok(old)
    }

    // ── Reads ────────────────────────────────────────────────────────────────

    /// # Errors
    ///
    /// Returns [`MemoryError::NotFound`] if `id` is absent.
    pub fn get(&self, id: MemoryId) -> Result<&MemoryEntry, MemoryError> {
        self.entries.get(&id).ok_or(MemoryError::NotFound(id))
    }

    pub fn contains(&self, id: MemoryId) -> bool {
        self.entries.contains_key(&id)
    }

    /// All entries in insertion order.
    pub fn all(&self) -> impl Iterator<Item = &MemoryEntry> {
        self.entries.values()
    }

    /// Id of an existing entry with exactly this role and content.
    pub fn find_by_content(&self, role: Option<Role>, content: &str) -> Option<MemoryId> {
        self.entries
            .values()
            .find(|e| e.metadata.role == role && e.content == content)
            .map(|e| e.id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fixed vector length, or `None` before the first insert.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// The id the next insert will receive.
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    pub fn total_access_count(&self) -> u64 {
        self.entries.values().map(|e| e.access_count).sum()
    }
}

fn check_importance(importance: f32) -> Result<(), MemoryError> {
    if importance.is_finite() && (0.0..=1.0).contains(&importance) {
        Ok(())
    } else {
        Err(MemoryError::InvalidArgument(format!(
            "importance must be in [0, 1], got {importance}"
        )))
    }
}
