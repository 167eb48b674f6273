//! Integration tests for the frame grammar: encoder and decoder against
//! fixed byte sequences, the round-trip law, and chunk-splitting properties.

use chatwire::{FrameDecoder, WireEvent, encode_frame, encode_frames};
use serde_json::json;

/// A representative event list touching every variant
fn fixture_events() -> Vec<WireEvent> {
    vec![
        WireEvent::Status {
            conversation: Some("conv_9".to_string()),
            model: "test-model".to_string(),
        },
        WireEvent::Content {
            text: "Let me check... déjà vu ✓".to_string(),
        },
        WireEvent::ToolCall {
            id: "call_1".to_string(),
            name: "search".to_string(),
            arguments: json!({"query": "naïve λ-calculus", "limit": 3}),
        },
        WireEvent::ToolProgress {
            name: "search".to_string(),
            status: "running".to_string(),
            message: "scanning 12 shards".to_string(),
            details: Some(json!({"shard": 4})),
        },
        WireEvent::ToolResult {
            id: "call_1".to_string(),
            name: "search".to_string(),
            result: r#"{"hits":["a","b"]}"#.to_string(),
        },
        WireEvent::Content {
            text: "Found it.".to_string(),
        },
        WireEvent::Error {
            message: "The model server is rate limiting requests.".to_string(),
        },
        WireEvent::Done,
    ]
}

fn decode_all(decoder: &mut FrameDecoder, chunks: &[&[u8]]) -> Vec<WireEvent> {
    let mut events = Vec::new();
    for chunk in chunks {
        events.extend(decoder.feed(chunk));
    }
    events.extend(decoder.finish());
    events
}

#[test]
fn round_trip_reproduces_events_field_for_field() {
    let events = fixture_events();
    let bytes = encode_frames(&events);

    let mut decoder = FrameDecoder::new();
    let decoded = decode_all(&mut decoder, &[bytes.as_bytes()]);

    assert_eq!(decoded, events);
}

#[test]
fn every_byte_offset_split_decodes_identically() {
    let events = fixture_events();
    let bytes = encode_frames(&events);
    let raw = bytes.as_bytes();

    for split in 0..=raw.len() {
        let mut decoder = FrameDecoder::new();
        let decoded = decode_all(&mut decoder, &[&raw[..split], &raw[split..]]);
        assert_eq!(decoded, events, "two-way split at byte {}", split);
    }
}

#[test]
fn fixed_size_chunkings_decode_identically() {
    let events = fixture_events();
    let bytes = encode_frames(&events);
    let raw = bytes.as_bytes();

    for size in [1, 2, 3, 5, 7, 16, 64] {
        let chunks: Vec<&[u8]> = raw.chunks(size).collect();
        let mut decoder = FrameDecoder::new();
        let decoded = decode_all(&mut decoder, &chunks);
        assert_eq!(decoded, events, "chunk size {}", size);
    }
}

#[test]
fn boundary_between_adjacent_frame_terminators() {
    // Scenario: the chunk boundary falls exactly between the two newline
    // bytes terminating a frame, with the next frame right behind.
    let events = vec![
        WireEvent::Content {
            text: "a".to_string(),
        },
        WireEvent::Content {
            text: "b".to_string(),
        },
        WireEvent::Done,
    ];
    let bytes = encode_frames(&events);
    let split = bytes.find("\n\n").unwrap() + 1; // between '\n' and '\n'

    let mut decoder = FrameDecoder::new();
    let decoded = decode_all(
        &mut decoder,
        &[&bytes.as_bytes()[..split], &bytes.as_bytes()[split..]],
    );

    assert_eq!(decoded, events);
}

#[test]
fn decoder_reads_hand_written_bytes() {
    // Independent of the encoder: the grammar pinned down as literal bytes.
    let raw = b"data: {\"type\":\"content\",\"text\":\"Hi\"}\n\n\
                data: {\"type\":\"tool_call\",\"id\":\"c1\",\"name\":\"search\",\"arguments\":{}}\n\n\
                data: [DONE]\n\n";

    let mut decoder = FrameDecoder::new();
    let events = decoder.feed(raw);

    assert_eq!(
        events,
        vec![
            WireEvent::Content {
                text: "Hi".to_string()
            },
            WireEvent::ToolCall {
                id: "c1".to_string(),
                name: "search".to_string(),
                arguments: json!({}),
            },
            WireEvent::Done,
        ]
    );
}

#[test]
fn encoder_produces_expected_literal_bytes() {
    let frame = encode_frame(&WireEvent::Content {
        text: "Hi".to_string(),
    });
    assert_eq!(frame, "data: {\"type\":\"content\",\"text\":\"Hi\"}\n\n");
    assert_eq!(encode_frame(&WireEvent::Done), "data: [DONE]\n\n");
}

#[test]
fn corrupt_frame_does_not_lose_the_rest() {
    let good_tail = encode_frames(&[
        WireEvent::Content {
            text: "kept".to_string(),
        },
        WireEvent::Done,
    ]);
    let bytes = format!("data: {{\"type\":\"content\",\"text\":}}\n\n{}", good_tail);

    let mut decoder = FrameDecoder::new();
    let events = decoder.feed(bytes.as_bytes());

    assert_eq!(
        events,
        vec![
            WireEvent::Content {
                text: "kept".to_string()
            },
            WireEvent::Done,
        ]
    );
}

#[test]
fn exactly_one_done_even_with_trailing_noise() {
    let bytes = format!(
        "{}data: [DONE]\n\ndata: {{\"type\":\"content\",\"text\":\"ghost\"}}\n\n",
        encode_frames(&[WireEvent::Content {
            text: "real".to_string()
        }])
    );

    let mut decoder = FrameDecoder::new();
    let mut events = decoder.feed(bytes.as_bytes());
    events.extend(decoder.feed(b"data: [DONE]\n\n"));
    events.extend(decoder.finish());

    let done_count = events
        .iter()
        .filter(|e| matches!(e, WireEvent::Done))
        .count();
    assert_eq!(done_count, 1);
    assert_eq!(events.last(), Some(&WireEvent::Done));
    assert!(!events.iter().any(
        |e| matches!(e, WireEvent::Content { text } if text == "ghost")
    ));
}

#[test]
fn truncated_stream_flushes_carry_over() {
    // Stream cut off before the final terminator
    let raw = b"data: {\"type\":\"content\",\"text\":\"tail\"}";

    let mut decoder = FrameDecoder::new();
    assert!(decoder.feed(raw).is_empty());

    let flushed = decoder.finish();
    assert_eq!(
        flushed,
        vec![WireEvent::Content {
            text: "tail".to_string()
        }]
    );
}
