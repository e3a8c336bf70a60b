use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Identifier of a stored memory.
///
/// Ids are assigned from a per-store counter that only ever moves forward
/// (it is persisted with the store), so an id is never handed out twice –
/// not even after the entry it named was merged away or evicted.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(transparent)]
pub struct MemoryId(pub u64);

impl std::fmt::Display for MemoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Who (or what) produced a memory fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Something the user said.
    User,
    /// Something the assistant said.
    Assistant,
    /// A window of several consecutive turns indexed as one fragment.
    ContextChunk,
    /// A read-only reference document seeded at startup.
    Knowledge,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::ContextChunk => "context_chunk",
            Role::Knowledge => "knowledge",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "context_chunk" | "chunk" => Ok(Role::ContextChunk),
            "knowledge" => Ok(Role::Knowledge),
            _ => Err(format!("Unknown role: {}", s)),
        }
    }
}

/// A single value in the extensible part of [`Metadata`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum MetadataValue {
    Flag(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl From<bool> for MetadataValue {
    fn from(v: bool) -> Self {
        MetadataValue::Flag(v)
    }
}

impl From<i64> for MetadataValue {
    fn from(v: i64) -> Self {
        MetadataValue::Integer(v)
    }
}

impl From<f64> for MetadataValue {
    fn from(v: f64) -> Self {
        MetadataValue::Float(v)
    }
}

impl From<&str> for MetadataValue {
    fn from(v: &str) -> Self {
        MetadataValue::Text(v.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(v: String) -> Self {
        MetadataValue::Text(v)
    }
}

/// Typed metadata attached to a memory.
///
/// `role` and `importance` are the well-known keys; everything else lives in
/// `tags`. `importance` is only an input hint: the store moves it into the
/// entry's own importance field on insert, so persisted metadata never
/// carries it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub importance: Option<f32>,
    #[serde(default)]
    pub tags: BTreeMap<String, MetadataValue>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    pub fn with_importance(mut self, importance: f32) -> Self {
        self.importance = Some(importance);
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn tag(&self, key: &str) -> Option<&MetadataValue> {
        self.tags.get(key)
    }
}

/// One line of a conversation, as written by the legacy turn log
/// (`[{"role": "user", "text": "..."}]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

/// A memory as handed to the conversational bridge.
///
/// Carries content, metadata and scoring detail but never the embedding,
/// so callers stay independent of the vector representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RecalledMemory {
    pub id: MemoryId,
    pub content: String,
    pub metadata: Metadata,
    /// Blended ranking score (similarity, recency and importance).
    pub score: f32,
    /// Raw cosine similarity to the query.
    pub similarity: f32,
    pub importance: f32,
    /// Access count *after* this retrieval was recorded.
    pub access_count: u64,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}

/// Error taxonomy of the memory subsystem.
#[derive(Error, Debug)]
pub enum MemoryError {
    /// Caller misuse; never retried.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Memory not found: {0}")]
    NotFound(MemoryId),

    /// A query vector does not match the store's dimensionality.
    #[error("Dimension mismatch: store holds {expected}-d vectors, got {actual}-d")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A vector offered for insertion violates the data contract.
    #[error("Invalid embedding: {0}")]
    InvalidEmbedding(String),

    /// The embedding provider failed or timed out, including its one retry.
    #[error("Embedding provider unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("Corrupt persisted state: {0}")]
    CorruptState(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An internal invariant was violated; the operation was aborted.
    #[error("Internal invariant violated: {0}")]
    Internal(String),
}

impl MemoryError {
    /// Whether retrying the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MemoryError::EmbeddingUnavailable(_) | MemoryError::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_serializes_snake_case() {
        let json = serde_json::to_string(&Role::ContextChunk).unwrap();
        assert_eq!(json, "\"context_chunk\"");
        let back: Role = serde_json::from_str("\"assistant\"").unwrap();
        assert_eq!(back, Role::Assistant);
    }

    #[test]
    fn role_parsing() {
        assert_eq!("User".parse::<Role>().unwrap(), Role::User);
        assert_eq!("chunk".parse::<Role>().unwrap(), Role::ContextChunk);
        assert!("narrator".parse::<Role>().is_err());
    }

    #[test]
    fn metadata_value_untagged_keeps_variant() {
        let meta = Metadata::new()
            .with_tag("source", "voice")
            .with_tag("turn", 3i64)
            .with_tag("confidence", 0.75f64)
            .with_tag("pinned", true);
        let json = serde_json::to_string(&meta).unwrap();
        let back: Metadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, meta);
        assert_eq!(back.tag("turn"), Some(&MetadataValue::Integer(3)));
        assert_eq!(back.tag("pinned"), Some(&MetadataValue::Flag(true)));
    }

    #[test]
    fn metadata_omits_unset_well_known_keys() {
        let json = serde_json::to_string(&Metadata::new()).unwrap();
        assert!(!json.contains("role"));
        assert!(!json.contains("importance"));
    }

    #[test]
    fn legacy_turn_log_parses() {
        let raw = r#"[{"role": "user", "text": "hi"}, {"role": "assistant", "text": "hello"}]"#;
        let turns: Vec<ConversationTurn> = serde_json::from_str(raw).unwrap();
        assert_eq!(turns[0], ConversationTurn::user("hi"));
        assert_eq!(turns[1], ConversationTurn::assistant("hello"));
    }

    #[test]
    fn memory_id_display() {
        assert_eq!(MemoryId(42).to_string(), "#42");
    }

    #[test]
    fn memory_error_display_and_retryability() {
        let err = MemoryError::DimensionMismatch {
            expected: 3,
            actual: 2,
        };
        assert!(err.to_string().contains("3-d"));
        assert!(!err.is_retryable());

        let err = MemoryError::EmbeddingUnavailable("timeout".into());
        assert!(err.is_retryable());
        assert!(err.to_string().contains("timeout"));
    }
}
