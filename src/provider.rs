//! Outbound seam to the model service
//!
//! Every round issues one streaming completion call parameterized by the
//! full accumulated history plus the complete tool catalog. That call goes
//! through the [`CompletionBackend`] trait, the engine's only knowledge of
//! the model service, so tests drive the iteration loop with scripted
//! fragment sequences and production uses [`HttpBackend`], which speaks
//! OpenAI-compatible streaming chat completions:
//!
//! ```text
//! POST {base_url}/chat/completions   (stream: true)
//!     │
//!     ▼  SSE events ("data: {json}")
//! CompletionChunk ──▶ Fragment ──▶ DeltaAccumulator (see crate::delta)
//! ```
//!
//! Transient failures of the *initial* request (connection refused, 429,
//! 5xx) are retried with backoff; a stream already delivering fragments is
//! never retried, because partial output has been forwarded downstream by
//! then.

use crate::delta::{Fragment, ToolDelta};
use crate::retry::RetryConfig;
use crate::types::{ApiMessage, CompletionChunk, CompletionPayload};
use crate::{Error, Result};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::stream::{Stream, StreamExt};
use std::pin::Pin;
use std::time::Duration;

/// End-of-stream sentinel used by OpenAI-compatible servers
const UPSTREAM_DONE: &str = "[DONE]";

/// A pinned, boxed stream of model-response fragments
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<Fragment>> + Send>>;

/// Parameters of one round's completion call
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ApiMessage>,
    /// Catalog entries for every registered tool; offered every round
    pub tools: Vec<serde_json::Value>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

/// The engine's view of the model service.
///
/// One method: stream one turn. Implementations must deliver fragments in
/// upstream order and surface transport failures as stream items rather
/// than panicking.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn stream_turn(&self, request: CompletionRequest) -> Result<FragmentStream>;
}

/// Production backend: OpenAI-compatible chat completions over HTTP.
pub struct HttpBackend {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    retry: RetryConfig,
}

impl HttpBackend {
    /// Build the backend with a reusable HTTP client.
    ///
    /// The timeout covers the whole request, including streaming; size it
    /// for the longest completion you expect, not just connection setup.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout_secs: u64,
        retry: RetryConfig,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|err| Error::config(format!("Failed to build HTTP client: {}", err)))?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
            retry,
        })
    }

    async fn open_stream(&self, payload: &CompletionPayload) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(payload)
            .send()
            .await
            .map_err(Error::Http)?;

        // Catch auth failures, rate limits, and bad models before treating
        // the body as a stream. The body goes to the logs via Error::Api;
        // only the sanitized form ever reaches a client.
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|err| {
                log::warn!("failed to read error response body: {}", err);
                String::new()
            });
            return Err(Error::api(status.as_u16(), body));
        }

        Ok(response)
    }
}

#[async_trait]
impl CompletionBackend for HttpBackend {
    async fn stream_turn(&self, request: CompletionRequest) -> Result<FragmentStream> {
        let payload = CompletionPayload {
            model: request.model,
            messages: request.messages,
            stream: true,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            tools: if request.tools.is_empty() {
                None
            } else {
                Some(request.tools)
            },
        };

        let response = self
            .retry
            .run("completion request", || self.open_stream(&payload))
            .await?;

        let fragments = response
            .bytes_stream()
            .eventsource()
            .map(|event| match event {
                Ok(event) => {
                    if event.data == UPSTREAM_DONE {
                        return Vec::new();
                    }
                    match serde_json::from_str::<CompletionChunk>(&event.data) {
                        Ok(chunk) => chunk_fragments(chunk).into_iter().map(Ok).collect(),
                        Err(err) => vec![Err(Error::stream(format!(
                            "failed to parse completion chunk: {}",
                            err
                        )))],
                    }
                }
                Err(err) => vec![Err(Error::stream(err.to_string()))],
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(fragments))
    }
}

/// Flatten one upstream chunk into ordered fragments.
pub(crate) fn chunk_fragments(chunk: CompletionChunk) -> Vec<Fragment> {
    let mut fragments = Vec::new();

    for choice in chunk.choices {
        if let Some(content) = choice.delta.content {
            if !content.is_empty() {
                fragments.push(Fragment::Text(content));
            }
        }

        if let Some(deltas) = choice.delta.tool_calls {
            for delta in deltas {
                let (name, arguments) = match delta.function {
                    Some(function) => (function.name, function.arguments.unwrap_or_default()),
                    None => (None, String::new()),
                };
                fragments.push(Fragment::ToolDelta(ToolDelta {
                    index: delta.index,
                    id: delta.id,
                    name,
                    arguments,
                }));
            }
        }

        // finish_reason is the explicit end-of-turn signal, whatever its value
        if choice.finish_reason.is_some() {
            fragments.push(Fragment::EndOfTurn);
        }
    }

    fragments
}
