//! Outward event model and frame encoder
//!
//! Every observable effect of a request (streamed text, tool activity,
//! errors, termination) leaves the engine as a [`WireEvent`]. Events are
//! serialized one per *frame* so the receiving side can reassemble them no
//! matter how the transport splits the byte stream:
//!
//! ```text
//! data: {"type":"content","text":"Hello"}
//!
//! data: {"type":"tool_call","id":"call_1","name":"search","arguments":{"q":"rust"}}
//!
//! data: [DONE]
//!
//! ```
//!
//! A frame is the fixed marker, a JSON payload, and a terminating blank
//! line. The terminal frame carries the bare `[DONE]` sentinel instead of a
//! payload and is always the last frame of a stream. The decoder
//! ([`crate::FrameDecoder`]) shares this grammar through the constants
//! below; the two sides must never drift apart.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Marker that opens every frame
pub const FRAME_MARKER: &str = "data: ";

/// Blank line closing every frame
pub const FRAME_TERMINATOR: &str = "\n\n";

/// Payload of the distinguished terminal frame
pub const TERMINAL_SENTINEL: &str = "[DONE]";

/// One outward event of a streamed request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireEvent {
    /// Context-routing metadata; at most one per stream, before any content,
    /// and only when the request carried non-trivial routing data
    Status {
        #[serde(skip_serializing_if = "Option::is_none")]
        conversation: Option<String>,
        model: String,
    },
    /// Incremental text, forwarded in arrival order
    Content { text: String },
    /// The model requested a tool invocation
    ToolCall {
        id: String,
        name: String,
        arguments: Value,
    },
    /// A running tool reported progress
    ToolProgress {
        name: String,
        status: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<Value>,
    },
    /// A tool invocation resolved (really or synthetically)
    ToolResult {
        id: String,
        name: String,
        result: String,
    },
    /// Terminal failure, sanitized; followed only by `done`
    Error { message: String },
    /// End of stream; encoded as the terminal frame
    Done,
}

/// Serialize one event as a self-delimited frame.
///
/// [`WireEvent::Done`] becomes the terminal sentinel frame; everything else
/// is a JSON payload frame.
pub fn encode_frame(event: &WireEvent) -> String {
    match event {
        WireEvent::Done => format!("{FRAME_MARKER}{TERMINAL_SENTINEL}{FRAME_TERMINATOR}"),
        other => {
            // Serializing an in-memory event cannot realistically fail; if it
            // ever does, send a well-formed error frame instead of corrupting
            // the stream.
            let payload = serde_json::to_string(other).unwrap_or_else(|err| {
                log::error!("failed to serialize wire event: {}", err);
                "{\"type\":\"error\",\"message\":\"internal serialization failure\"}".to_string()
            });
            format!("{FRAME_MARKER}{payload}{FRAME_TERMINATOR}")
        }
    }
}

/// Encode a whole event list into one byte-stream-ready string.
/// Mostly useful in tests and fixtures; servers encode frame by frame.
pub fn encode_frames(events: &[WireEvent]) -> String {
    events.iter().map(encode_frame).collect()
}
