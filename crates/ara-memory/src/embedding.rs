//! Embedding Provider port.
//!
//! The engine never computes embeddings itself. It calls an injected
//! [`EmbeddingProvider`], bounds every call with a timeout, and retries a
//! retryable failure exactly once after a fixed backoff. Anything still
//! failing surfaces as [`MemoryError::EmbeddingUnavailable`].

use std::time::Duration;

use ara_types::MemoryError;
use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use crate::config::MemoryConfig;

/// Failure reported by a provider. Providers that cannot tell the two
/// kinds apart should report [`EmbeddingError::Retryable`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EmbeddingError {
    /// Transient: timeouts, rate limiting, server errors.
    #[error("transient embedding failure: {0}")]
    Retryable(String),
    /// Permanent: bad request, authentication, malformed response.
    #[error("embedding failure: {0}")]
    Fatal(String),
}

/// Turns text into a fixed-length vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Upper bound on a single provider call.
    pub timeout: Duration,
    /// Pause before the one retry.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &MemoryConfig) -> Self {
        Self {
            timeout: config.embed_timeout(),
            backoff: config.embed_retry_backoff(),
        }
    }
}

async fn attempt(
    provider: &dyn EmbeddingProvider,
    text: &str,
    timeout: Duration,
) -> Result<Vec<f32>, EmbeddingError> {
    match tokio::time::timeout(timeout, provider.embed(text)).await {
        Ok(result) => result,
        Err(_) => Err(EmbeddingError::Retryable(format!(
            "timed out after {} ms",
            timeout.as_millis()
        ))),
    }
}

/// Embed `text`, retrying once on a retryable failure.
///
/// # Errors
///
/// Returns [`MemoryError::EmbeddingUnavailable`] on a fatal failure or when
/// the retry also fails.
pub async fn embed_with_retry(
    provider: &dyn EmbeddingProvider,
    text: &str,
    policy: &RetryPolicy,
) -> Result<Vec<f32>, MemoryError> {
    match attempt(provider, text, policy.timeout).await {
        Ok(v) => return Ok(v),
        Err(EmbeddingError::Fatal(msg)) => return Err(MemoryError::EmbeddingUnavailable(msg)),
        Err(EmbeddingError::Retryable(msg)) => {
            warn!(
                error = %msg,
                backoff_ms = policy.backoff.as_millis() as u64,
                "embedding failed, retrying once"
            );
        }
    }
    tokio::time::sleep(policy.backoff).await;
    attempt(provider, text, policy.timeout)
        .await
        .map_err(|e| MemoryError::EmbeddingUnavailable(e.to_string()))
}
