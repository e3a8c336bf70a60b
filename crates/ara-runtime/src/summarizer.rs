//! [`ChatSummarizer`] – condenses merged memories with a chat model.
//!
//! Talks to an OpenAI-compatible `/v1/chat/completions` endpoint and forces
//! structured output by injecting the JSON Schema of [`Summary`] into
//! `response_format`. Any failure is reported as a [`SummarizerError`]; the
//! engine then falls back to plain concatenation.

use std::time::Duration;

use ara_memory::{Summarizer, SummarizerError};
use async_trait::async_trait;
use schemars::{JsonSchema, schema_for};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

const SYSTEM_PROMPT: &str = "\
You maintain the long-term memory of a personal voice assistant.
You receive several fragments that say nearly the same thing.
Merge them into ONE short statement that keeps every concrete fact
(names, places, dates, preferences). Do not add anything new.
Reply with JSON matching the provided schema.";

#[derive(Error, Debug)]
pub enum ChatClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Unexpected response format: {0}")]
    BadResponse(String),
}

impl From<ChatClientError> for SummarizerError {
    fn from(e: ChatClientError) -> Self {
        match e {
            ChatClientError::Http(e) => SummarizerError::Unavailable(e.to_string()),
            ChatClientError::BadResponse(msg) => SummarizerError::BadOutput(msg),
        }
    }
}

/// Structured reply the model must produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Summary {
    /// The merged statement.
    pub text: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire shapes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct JsonSchemaFormat {
    name: &'static str,
    schema: serde_json::Value,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
    json_schema: JsonSchemaFormat,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

fn build_request<'a>(model: &'a str, fragments: &[String]) -> ChatRequest<'a> {
    let listing = fragments
        .iter()
        .map(|f| format!("- {}", f.replace('\n', " ")))
        .collect::<Vec<_>>()
        .join("\n");
    let schema = serde_json::to_value(schema_for!(Summary)).unwrap_or(serde_json::Value::Null);
    ChatRequest {
        model,
        messages: vec![
            ChatMessage {
                role: "system".into(),
                content: SYSTEM_PROMPT.into(),
            },
            ChatMessage {
                role: "user".into(),
                content: format!("Fragments:\n{listing}"),
            },
        ],
        stream: false,
        temperature: 0.0,
        response_format: ResponseFormat {
            kind: "json_schema",
            json_schema: JsonSchemaFormat {
                name: "memory_summary",
                schema,
            },
        },
    }
}

/// Pull the summary text out of a chat-completions response body.
fn parse_summary(response: ChatResponse) -> Result<String, ChatClientError> {
    let content = response
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content)
        .ok_or_else(|| ChatClientError::BadResponse("empty choices array".into()))?;
    let summary: Summary = serde_json::from_str(content.trim())
        .map_err(|e| ChatClientError::BadResponse(format!("reply is not a Summary: {e}")))?;
    let text = summary.text.trim();
    if text.is_empty() {
        return Err(ChatClientError::BadResponse("summary text is empty".into()));
    }
    Ok(text.to_string())
}

// ─────────────────────────────────────────────────────────────────────────────
// ChatSummarizer
// ─────────────────────────────────────────────────────────────────────────────

pub struct ChatSummarizer {
    base_url: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl ChatSummarizer {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ChatClientError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: None,
            client,
        })
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.api_key = (!key.is_empty()).then_some(key);
        self
    }

    pub async fn complete(&self, fragments: &[String]) -> Result<String, ChatClientError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let mut request = self
            .client
            .post(&url)
            .json(&build_request(&self.model, fragments));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response: ChatResponse = request
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let text = parse_summary(response)?;
        debug!(fragments = fragments.len(), chars = text.len(), "fragments summarized");
        Ok(text)
    }
}

#[async_trait]
impl Summarizer for ChatSummarizer {
    async fn summarize(&self, fragments: &[String]) -> Result<String, SummarizerError> {
        Ok(self.complete(fragments).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(content: &str) -> ChatResponse {
        ChatResponse {
            choices: vec![Choice {
                message: ChatMessage {
                    role: "assistant".into(),
                    content: content.into(),
                },
            }],
        }
    }

    #[test]
    fn summary_schema_is_injected() {
        let req = build_request("llama3", &["a".into(), "b".into()]);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["response_format"]["type"], "json_schema");
        assert_eq!(json["response_format"]["json_schema"]["name"], "memory_summary");
        let schema = json["response_format"]["json_schema"]["schema"].to_string();
        assert!(schema.contains("\"text\""));
    }

    #[test]
    fn fragments_are_listed_one_per_line() {
        let req = build_request("llama3", &["likes tea".into(), "drinks\ntea".into()]);
        assert_eq!(req.messages[1].content, "Fragments:\n- likes tea\n- drinks tea");
        assert_eq!(req.messages[0].role, "system");
    }

    #[test]
    fn structured_reply_is_parsed() {
        let text = parse_summary(reply(r#"{"text": " Likes green tea. "}"#)).unwrap();
        assert_eq!(text, "Likes green tea.");
    }

    #[test]
    fn free_text_reply_is_bad_output() {
        let err = parse_summary(reply("Sure! Here is a summary")).unwrap_err();
        assert!(matches!(
            SummarizerError::from(err),
            SummarizerError::BadOutput(_)
        ));
    }

    #[test]
    fn empty_choices_is_bad_output() {
        let err = parse_summary(ChatResponse { choices: vec![] }).unwrap_err();
        assert!(matches!(err, ChatClientError::BadResponse(_)));
    }

    #[test]
    fn blank_summary_is_rejected() {
        assert!(parse_summary(reply(r#"{"text": "  "}"#)).is_err());
    }
}
