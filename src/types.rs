//! Core types for the chatwire engine

use serde::{Deserialize, Serialize};

/// Message role in the conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    /// Wire-format name of the role (the serde representation, borrowed)
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// One structured tool invocation reconstructed from the model's response.
///
/// The positional index the model uses to interleave invocation fragments is
/// an accumulation detail and lives only inside the delta accumulator; by the
/// time a `ToolInvocation` exists, its argument text has been parsed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

impl ToolInvocation {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// A message in one request's in-memory history.
///
/// `tool_calls` is only populated on assistant messages that requested tools;
/// `tool_call_id` links a tool message back to the invocation it answers.
/// History is owned by one request and discarded with it; nothing here is
/// persisted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolInvocation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: Some(text.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Some(text.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: Some(text.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Assistant message recording the (possibly truncated) tool calls of a
    /// round. `content` may be empty when the model emitted no text before
    /// calling tools.
    pub fn assistant_with_calls(content: Option<String>, tool_calls: Vec<ToolInvocation>) -> Self {
        Self {
            role: Role::Assistant,
            content,
            tool_calls,
            tool_call_id: None,
        }
    }

    /// Tool-result message answering the invocation with the given id.
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    /// Convert to the OpenAI-compatible request representation.
    pub(crate) fn to_api(&self) -> ApiMessage {
        let tool_calls = if self.tool_calls.is_empty() {
            None
        } else {
            Some(
                self.tool_calls
                    .iter()
                    .map(|call| ApiToolCall {
                        id: call.id.clone(),
                        call_type: "function".to_string(),
                        function: ApiFunction {
                            name: call.name.clone(),
                            arguments: call.arguments.to_string(),
                        },
                    })
                    .collect(),
            )
        };

        // The completions API requires content on assistant messages even
        // when only tool_calls are present.
        let content = match (&self.content, &tool_calls) {
            (Some(text), _) => Some(text.clone()),
            (None, Some(_)) => Some(String::new()),
            (None, None) => None,
        };

        ApiMessage {
            role: self.role.as_str().to_string(),
            content,
            tool_calls,
            tool_call_id: self.tool_call_id.clone(),
        }
    }
}

/// One inbound request to the engine.
///
/// Carries the model identifier (falling back to the engine's configured
/// default when absent), the ordered message list, and optional routing
/// metadata. The engine never mutates the caller's copy; messages are moved
/// into the request's private history.
#[derive(Debug, Clone)]
pub struct EngineRequest {
    pub model: Option<String>,
    pub messages: Vec<Message>,
    pub conversation: Option<String>,
}

impl EngineRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            model: None,
            messages,
            conversation: None,
        }
    }

    /// Override the engine's default model for this request
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Attach a conversation id; when present, a `status` event carrying it
    /// is emitted before any content.
    pub fn with_conversation(mut self, conversation: impl Into<String>) -> Self {
        self.conversation = Some(conversation.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Upstream wire format (OpenAI-compatible chat completions)
// ---------------------------------------------------------------------------

/// Request-side message format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

/// Request-side tool call format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: ApiFunction,
}

/// Request-side function call format (arguments as raw JSON text)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiFunction {
    pub name: String,
    pub arguments: String,
}

/// Streaming completion request payload
#[derive(Debug, Clone, Serialize)]
pub struct CompletionPayload {
    pub model: String,
    pub messages: Vec<ApiMessage>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<serde_json::Value>>,
}

/// One streaming chunk from the completions endpoint.
///
/// Everything except `choices` (ids, timestamps, model echo) is irrelevant to
/// the engine and left to serde to discard.
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

/// One choice in a streaming chunk
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: ChunkDelta,
    pub finish_reason: Option<String>,
}

/// Incremental delta within a choice
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkDelta {
    pub content: Option<String>,
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

/// Incremental tool call delta, tagged with the positional index that groups
/// fragments of the same invocation
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallDelta {
    pub index: u32,
    pub id: Option<String>,
    pub function: Option<FunctionDelta>,
}

/// Incremental function delta
#[derive(Debug, Clone, Deserialize)]
pub struct FunctionDelta {
    pub name: Option<String>,
    pub arguments: Option<String>,
}
