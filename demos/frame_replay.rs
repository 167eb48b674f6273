//! Frame Replay Demo
//!
//! No server required: builds a canned frame stream (the bytes a chatwire
//! server would send for a short tool-using request, including one corrupt
//! frame) and replays it through the FrameDecoder at several chunk sizes to
//! show that the reconstructed event list never changes.
//!
//! Usage:
//!   cargo run --example frame_replay

use chatwire::{FrameDecoder, WireEvent, encode_frames};
use serde_json::json;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let events = vec![
        WireEvent::Status {
            conversation: Some("replay-demo".to_string()),
            model: "qwen3:8b".to_string(),
        },
        WireEvent::Content {
            text: "Let me look that up. ".to_string(),
        },
        WireEvent::ToolCall {
            id: "call_1".to_string(),
            name: "search_docs".to_string(),
            arguments: json!({"query": "framing"}),
        },
        WireEvent::ToolProgress {
            name: "search_docs".to_string(),
            status: "running".to_string(),
            message: "scanning index".to_string(),
            details: None,
        },
        WireEvent::ToolResult {
            id: "call_1".to_string(),
            name: "search_docs".to_string(),
            result: r#"{"results":["docs/wire.md"]}"#.to_string(),
        },
        WireEvent::Content {
            text: "frames are delimited by a blank line ✓".to_string(),
        },
        WireEvent::Done,
    ];

    // A corrupt frame in the middle; the decoder must skip it and keep going.
    let mut bytes = encode_frames(&events[..3]).into_bytes();
    bytes.extend_from_slice(b"data: {\"type\":\"content\",\"text\":}\n\n");
    bytes.extend_from_slice(encode_frames(&events[3..]).as_bytes());

    println!("replaying {} bytes of frames (one corrupted on purpose)", bytes.len());
    println!();

    for chunk_size in [1usize, 3, 17, 4096] {
        let mut decoder = FrameDecoder::new();
        let mut decoded = Vec::new();
        for chunk in bytes.chunks(chunk_size) {
            decoded.extend(decoder.feed(chunk));
        }
        decoded.extend(decoder.finish());

        let text: String = decoded
            .iter()
            .filter_map(|event| match event {
                WireEvent::Content { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();

        println!(
            "chunk size {:>4}: {} events, text: {:?}",
            chunk_size,
            decoded.len(),
            text
        );
        assert_eq!(decoded, events, "chunking must not change the event list");
    }

    println!();
    println!("identical event list at every chunk size; carry-over works.");
    Ok(())
}
