//! `ara-runtime` – adapters that plug external services into the memory
//! engine.
//!
//! # Modules
//!
//! - [`embedding_client`] – [`HttpEmbeddingProvider`][embedding_client::HttpEmbeddingProvider]:
//!   an [`EmbeddingProvider`][ara_memory::EmbeddingProvider] backed by any
//!   OpenAI-compatible `/v1/embeddings` endpoint, with failures classified
//!   as retryable or fatal.
//! - [`summarizer`] – [`ChatSummarizer`][summarizer::ChatSummarizer]:
//!   a [`Summarizer`][ara_memory::Summarizer] that merges near-duplicate
//!   memories through `/v1/chat/completions`, forcing structured output with
//!   a JSON Schema `response_format`.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]:
//!   installs the global `tracing` subscriber with an optional OTLP span
//!   exporter. Set `OTEL_EXPORTER_OTLP_ENDPOINT` to enable export.

pub mod embedding_client;
pub mod summarizer;
pub mod telemetry;

pub use embedding_client::{EmbeddingClientError, HttpEmbeddingProvider};
pub use summarizer::{ChatClientError, ChatSummarizer, Summary};
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
