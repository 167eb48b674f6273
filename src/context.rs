//! Context-window utilities for inbound history management
//!
//! The engine never trims history mid-request (history is append-only for
//! the lifetime of a request), but the *inbound* message list of a long
//! conversation can exceed the model's context window. These helpers let the
//! engine (or a caller doing its own management) estimate and truncate
//! before the first round.
//!
//! # Examples
//!
//! ```rust
//! use chatwire::{estimate_tokens, truncate_messages, Message};
//!
//! let messages = vec![Message::system("Be brief"), Message::user("Hello")];
//! let tokens = estimate_tokens(&messages);
//!
//! if tokens > 28000 {
//!     let truncated = truncate_messages(&messages, 10, true);
//!     // Use truncated messages...
//! }
//! ```

use crate::types::{Message, Role};

/// Estimate token count for a message list
///
/// Uses character-based approximation (1 token ≈ 4 characters).
///
/// # Note
///
/// This is an APPROXIMATION. Actual token counts vary by model family:
/// expect ~70-85% accuracy and include a 10-20% safety margin when checking
/// limits. For exact counts, use tokenizer bindings (not included to keep
/// dependencies minimal).
pub fn estimate_tokens(messages: &[Message]) -> usize {
    if messages.is_empty() {
        return 0;
    }

    let mut total_chars = 0;

    for message in messages {
        // Role formatting overhead, ~2 tokens
        total_chars += 8;

        if let Some(content) = &message.content {
            total_chars += content.len();
        }

        // Tool calls and their ids add significant overhead
        for call in &message.tool_calls {
            total_chars += call.id.len();
            total_chars += call.name.len();
            total_chars += call.arguments.to_string().len();
        }

        if let Some(id) = &message.tool_call_id {
            total_chars += id.len();
        }
    }

    // Conversation-level overhead, ~2-4 tokens
    total_chars += 16;

    // 4 chars ≈ 1 token, round up for safety
    (total_chars + 3) / 4
}

/// Truncate message history, keeping recent messages
///
/// Always preserves the system prompt (if present and `preserve_system` is
/// set) and keeps the most recent `keep` messages. This is a simple
/// truncation. It does NOT attempt to keep tool-call/tool-result pairs
/// together, so apply it at natural breakpoints (before a request starts),
/// never between an invocation and its result.
///
/// Returns a new Vec; the original is unchanged.
pub fn truncate_messages(messages: &[Message], keep: usize, preserve_system: bool) -> Vec<Message> {
    if messages.is_empty() {
        return Vec::new();
    }

    if messages.len() <= keep {
        return messages.to_vec();
    }

    let has_system = preserve_system && messages[0].role == Role::System;

    if has_system {
        // Keep system + last N messages
        let mut result = vec![messages[0].clone()];
        if keep > 0 && messages.len() > 1 {
            let start = messages.len().saturating_sub(keep);
            result.extend_from_slice(&messages[start..]);
        }
        result
    } else {
        // Just keep last N messages
        if keep > 0 {
            let start = messages.len().saturating_sub(keep);
            messages[start..].to_vec()
        } else {
            Vec::new()
        }
    }
}

/// Check if history is approaching a token limit
///
/// Convenience function combining estimation with a threshold check:
/// returns `true` if estimated tokens exceed `limit * margin`.
pub fn is_approaching_limit(messages: &[Message], limit: usize, margin: f32) -> bool {
    let estimated = estimate_tokens(messages);
    let threshold = (limit as f32 * margin) as usize;
    estimated > threshold
}
