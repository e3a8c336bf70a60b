//! [`HttpEmbeddingProvider`] – OpenAI-compatible embeddings over HTTP.
//!
//! Posts to `{base_url}/v1/embeddings`, which both OpenAI and
//! [Ollama](https://ollama.com) (`http://localhost:11434`) serve.
//!
//! Failures are classified for the engine's retry policy:
//!
//! | failure | kind |
//! |---|---|
//! | timeout, connection refused/reset | retryable |
//! | malformed URL, other transport errors | fatal |
//! | HTTP 429, HTTP 5xx | retryable |
//! | other HTTP 4xx (bad key, unknown model) | fatal |
//! | unparseable or empty response | fatal |
//!
//! ```rust,no_run
//! use ara_runtime::embedding_client::HttpEmbeddingProvider;
//!
//! let provider = HttpEmbeddingProvider::new("http://localhost:11434", "nomic-embed-text")
//!     .unwrap();
//! ```

use std::time::Duration;

use ara_memory::{EmbeddingError, EmbeddingProvider};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum EmbeddingClientError {
    /// Transport-level failure: DNS, connect, timeout, body read.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// The server answered with a non-success status.
    #[error("Embedding API error ({status}): {message}")]
    Status { status: u16, message: String },
    #[error("Unexpected response format: {0}")]
    BadResponse(String),
}

impl EmbeddingClientError {
    pub fn is_retryable(&self) -> bool {
        match self {
            EmbeddingClientError::Http(e) => e.is_timeout() || e.is_connect(),
            EmbeddingClientError::Status { status, .. } => *status == 429 || *status >= 500,
            EmbeddingClientError::BadResponse(_) => false,
        }
    }
}

impl From<EmbeddingClientError> for EmbeddingError {
    fn from(e: EmbeddingClientError) -> Self {
        if e.is_retryable() {
            EmbeddingError::Retryable(e.to_string())
        } else {
            EmbeddingError::Fatal(e.to_string())
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire shapes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: [&'a str; 1],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Extract the first embedding from a `/v1/embeddings` response body.
fn parse_embedding(body: &str) -> Result<Vec<f32>, EmbeddingClientError> {
    let response: EmbeddingResponse = serde_json::from_str(body)
        .map_err(|e| EmbeddingClientError::BadResponse(format!("invalid JSON: {e}")))?;
    response
        .data
        .into_iter()
        .min_by_key(|d| d.index)
        .map(|d| d.embedding)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| EmbeddingClientError::BadResponse("no embedding in response".into()))
}

/// Human-readable reason from an error body, falling back to the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorResponse>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.chars().take(200).collect())
}

// ─────────────────────────────────────────────────────────────────────────────
// HttpEmbeddingProvider
// ─────────────────────────────────────────────────────────────────────────────

pub struct HttpEmbeddingProvider {
    base_url: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpEmbeddingProvider {
    /// Client for `base_url` (without the `/v1` suffix) and `model`, with a
    /// 30 s request timeout.
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, EmbeddingClientError> {
        Self::with_timeout(base_url, model, Duration::from_secs(30))
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, EmbeddingClientError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: None,
            client,
        })
    }

    /// Send `Authorization: Bearer <key>` with every request.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.api_key = (!key.is_empty()).then_some(key);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/embeddings", self.base_url)
    }

    pub async fn request(&self, text: &str) -> Result<Vec<f32>, EmbeddingClientError> {
        let body = EmbeddingRequest {
            model: &self.model,
            input: [text],
        };
        let mut request = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(EmbeddingClientError::Status {
                status: status.as_u16(),
                message: error_message(&text),
            });
        }
        let embedding = parse_embedding(&text)?;
        debug!(model = %self.model, dimension = embedding.len(), "embedding received");
        Ok(embedding)
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.request(text).await?)
    }
}
