//! # chatwire
//!
//! A streaming-first, tool-augmented completion engine for OpenAI-compatible
//! model servers (LM Studio, Ollama, llama.cpp, vLLM).
//!
//! ## Overview
//!
//! chatwire owns the hardest part of a model-backed chat service: the
//! lifetime of **one streamed response to one request**, during which the
//! model may autonomously invoke external tools any number of times. The
//! engine reconstructs structured tool invocations from arbitrarily
//! fragmented streaming output, drives a bounded ask-model → run-tools →
//! feed-results-back loop, refuses duplicate and over-budget calls, and
//! frames everything into a single self-delimiting byte stream that the
//! bundled decoder can reassemble no matter how the transport chunks it.
//!
//! Everything around that (persistence, auth, rendering, the tools
//! themselves) stays outside, behind narrow seams.
//!
//! ## Key Features
//!
//! - **Streaming-first**: text reaches the client the moment the model
//!   produces it, tool or no tool
//! - **Bounded agent loop**: hard caps on rounds and per-round calls; the
//!   model can't spin forever
//! - **Call guard**: per-request ledgers refuse duplicate and over-budget
//!   invocations with explanatory synthetic results
//! - **Chunk-safe wire protocol**: encoder and decoder share one frame
//!   grammar; a frame can split anywhere, including inside its terminator
//! - **Live tool progress**: handlers report progress mid-flight and
//!   clients see it as it happens
//! - **Cancellation**: interrupt a request at any point and still get a
//!   clean terminal frame
//! - **Retry logic**: exponential backoff with jitter for transient
//!   upstream failures
//!
//! ## Engine side
//!
//! ```rust,no_run
//! use chatwire::{tool, Engine, EngineOptions, EngineRequest, Message, encode_frame};
//! use futures::StreamExt;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> chatwire::Result<()> {
//!     let search = tool("search", "Search the document index")
//!         .param("query", "string")
//!         .build(|args, progress| async move {
//!             progress.update("running", "scanning index");
//!             Ok(json!({"hits": ["intro.md"], "query": args["query"]}))
//!         });
//!
//!     let engine = Engine::new(
//!         EngineOptions::builder()
//!             .model("qwen2.5-32b-instruct")
//!             .base_url("http://localhost:1234/v1")
//!             .tool(search)
//!             .tool_budget("search", 4)
//!             .build()?,
//!     )?;
//!
//!     let mut turn = engine.start(EngineRequest::new(vec![Message::user(
//!         "What does the documentation say about streaming?",
//!     )]));
//!
//!     // A server would flush each frame to its transport as produced.
//!     while let Some(event) = turn.next().await {
//!         print!("{}", encode_frame(&event));
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Client side
//!
//! ```rust
//! use chatwire::{FrameDecoder, WireEvent};
//!
//! let mut decoder = FrameDecoder::new();
//! let mut display = String::new();
//!
//! // chunks arrive from the transport with arbitrary sizes and boundaries
//! for chunk in [&b"data: {\"type\":\"content\",\"text\":\"Hel"[..],
//!               b"lo\"}\n\ndata: [DONE]\n\n"] {
//!     for event in decoder.feed(chunk) {
//!         match event {
//!             WireEvent::Content { text } => display.push_str(&text),
//!             WireEvent::Done => break,
//!             _ => {}
//!         }
//!     }
//! }
//! assert_eq!(display, "Hello");
//! ```
//!
//! ## Architecture
//!
//! ```text
//! EngineRequest ──▶ Engine (iteration controller)
//!                     │  round loop, bounded
//!                     ├─▶ CompletionBackend ──▶ model server (SSE)
//!                     │        │ fragments
//!                     ├─▶ DeltaAccumulator ──▶ tool invocations
//!                     ├─▶ CallGuard ──▶ permit / refuse
//!                     ├─▶ ToolRegistry ──▶ handlers (+ progress)
//!                     ▼
//!                  WireEvent stream ──encode_frame──▶ bytes
//!                                                      │ any chunking
//!                  events ◀──FrameDecoder──────────────┘
//! ```
//!
//! Module responsibilities:
//!
//! - **engine**: the round state machine, per-request driver, and engine
//!   configuration (provider shortcuts, environment overrides)
//! - **delta**: fragment accumulation into complete tool invocations
//! - **guard**: duplicate/budget ledgers
//! - **tools**: tool definitions, capability registry, dispatch, progress
//! - **wire** / **decode**: the shared frame grammar, each side
//! - **provider**: the outbound model-service seam
//! - **types**: messages, invocations, requests, upstream wire structs
//! - **context** / **retry** / **error**: the supporting cast

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================
// These modules are private (internal implementation details) unless
// explicitly re-exported through `pub use` statements below.

/// Context-window estimation and inbound-history truncation.
mod context;

/// Client-side frame decoder with chunk-boundary-safe carry-over.
mod decode;

/// Delta accumulation: fragments in, finalized tool invocations out.
mod delta;

/// The iteration controller: engine, options, per-request driver, Turn.
mod engine;

/// Error enum, Result alias, and wire-safe message sanitization.
mod error;

/// Per-request call guard: duplicate and budget ledgers.
mod guard;

/// Outbound model-service seam: backend trait and HTTP implementation.
mod provider;

/// Tool definitions, capability registry, dispatch, and progress reporting.
mod tools;

/// Data model and upstream API wire types.
mod types;

/// Wire event model and frame encoder.
mod wire;

// ============================================================================
// PUBLIC EXPORTS
// ============================================================================

/// Retry utilities with exponential backoff and jitter.
/// Public as a module so callers can reuse the policy for their own
/// transient operations.
pub mod retry;

// --- Engine ---

pub use engine::{
    DEFAULT_MAX_CALLS_PER_ROUND, DEFAULT_MAX_ROUNDS, Engine, EngineOptions, EngineOptionsBuilder,
    Provider, ROUND_LIMIT_NOTICE, Turn,
};

// --- Wire protocol ---

pub use decode::FrameDecoder;
pub use wire::{FRAME_MARKER, FRAME_TERMINATOR, TERMINAL_SENTINEL, WireEvent, encode_frame, encode_frames};

// --- Streaming / accumulation ---

pub use delta::{DeltaAccumulator, Fragment, ToolDelta, TurnOutput};
pub use provider::{CompletionBackend, CompletionRequest, FragmentStream, HttpBackend};

// --- Call guard ---

pub use guard::{CallGuard, DUPLICATE_LIMIT, Verdict};

// --- Tool System ---

pub use tools::{
    Progress, ProgressUpdate, Tool, ToolBuilder, ToolHandler, ToolOutcome, ToolRegistry, tool,
};

// --- Core Types ---

pub use types::{EngineRequest, Message, Role, ToolInvocation};

// --- Upstream API wire types (for custom CompletionBackend implementations) ---

pub use types::{
    ApiFunction, ApiMessage, ApiToolCall, ChunkChoice, ChunkDelta, CompletionChunk,
    CompletionPayload, FunctionDelta, ToolCallDelta,
};

// --- Context Management ---

pub use context::{estimate_tokens, is_approaching_limit, truncate_messages};

// --- Error Handling ---

pub use error::{Error, Result};

// ============================================================================
// CONVENIENCE PRELUDE
// ============================================================================

/// Convenience module containing the most commonly used types and functions.
/// Import with `use chatwire::prelude::*;` for typical engine or client code.
pub mod prelude {
    pub use crate::{
        Engine, EngineOptions, EngineRequest, Error, FrameDecoder, Message, Progress, Result,
        Role, Tool, ToolInvocation, ToolOutcome, WireEvent, encode_frame, tool,
    };
}
