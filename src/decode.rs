//! Client-side frame decoder
//!
//! The transport delivers bytes in arbitrarily sized, arbitrarily aligned
//! chunks: one frame may span several chunks, one chunk may hold several
//! frames or half of one, and a chunk boundary can even fall between the two
//! bytes of a frame terminator. [`FrameDecoder`] reconstructs the event
//! sequence regardless:
//!
//! ```text
//! bytes ──feed()──▶ carry-over buffer ──split on "\n\n"──▶ complete segments
//!                        ▲                                      │
//!                        └── trailing partial segment ◀─────────┘
//! ```
//!
//! Each complete segment is scanned line by line; lines without the frame
//! marker are skipped (comments, keep-alives), the `[DONE]` sentinel yields
//! [`WireEvent::Done`] and stops decoding, and anything else is parsed as an
//! event payload. A malformed payload is logged and skipped, because one
//! corrupt frame must not lose the rest of the response.
//!
//! The carry-over is kept as raw bytes, not text, so a chunk boundary inside
//! a multi-byte UTF-8 character cannot corrupt the payload: segments are
//! converted to text only once they are complete.
//!
//! # Examples
//!
//! ```rust
//! use chatwire::{FrameDecoder, WireEvent};
//!
//! let mut decoder = FrameDecoder::new();
//! let mut display = String::new();
//!
//! for chunk in [&b"data: {\"type\":\"content\",\"te"[..], b"xt\":\"Hi\"}\n\ndata: [DONE]\n\n"] {
//!     for event in decoder.feed(chunk) {
//!         if let WireEvent::Content { text } = event {
//!             display.push_str(&text);
//!         }
//!     }
//! }
//!
//! assert_eq!(display, "Hi");
//! assert!(decoder.is_finished());
//! ```

use crate::wire::{FRAME_MARKER, FRAME_TERMINATOR, TERMINAL_SENTINEL, WireEvent};

/// Incremental decoder for the frame grammar produced by
/// [`encode_frame`](crate::encode_frame)
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Bytes received but not yet terminated by a blank line
    carry: Vec<u8>,
    /// Set once the terminal sentinel has been seen
    finished: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the terminal frame has been decoded. Further input is ignored.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Consume one transport chunk, returning every event completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<WireEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }

        self.carry.extend_from_slice(chunk);

        // Peel complete segments off the front, keeping the trailing
        // (possibly incomplete) segment as the new carry-over.
        while let Some(end) = find_terminator(&self.carry) {
            let segment = String::from_utf8_lossy(&self.carry[..end]).into_owned();
            self.carry.drain(..end + FRAME_TERMINATOR.len());

            if self.decode_segment(&segment, &mut events) {
                // Terminal sentinel: drop whatever trailed it.
                self.carry.clear();
                break;
            }
        }

        events
    }

    /// Signal end of input, flushing any remaining carry-over.
    ///
    /// A well-formed stream ends with the terminal frame and leaves nothing
    /// to flush; this exists so a stream cut off mid-frame still surfaces
    /// every decodable event.
    pub fn finish(&mut self) -> Vec<WireEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }

        let rest = std::mem::take(&mut self.carry);
        if !rest.is_empty() {
            let segment = String::from_utf8_lossy(&rest).into_owned();
            self.decode_segment(&segment, &mut events);
        }
        events
    }

    /// Decode one complete segment. Returns true on the terminal sentinel.
    fn decode_segment(&mut self, segment: &str, events: &mut Vec<WireEvent>) -> bool {
        for line in segment.lines() {
            let Some(payload) = line.strip_prefix(FRAME_MARKER) else {
                // Not a frame line; the grammar allows other lines to pass
                // through the transport (keep-alives, comments).
                continue;
            };

            if payload == TERMINAL_SENTINEL {
                events.push(WireEvent::Done);
                self.finished = true;
                return true;
            }

            match serde_json::from_str::<WireEvent>(payload) {
                Ok(event) => events.push(event),
                Err(err) => {
                    log::warn!("skipping malformed frame ({}): {:?}", err, payload);
                }
            }
        }
        false
    }
}

/// First position of the frame terminator in `bytes`, if complete
fn find_terminator(bytes: &[u8]) -> Option<usize> {
    let terminator = FRAME_TERMINATOR.as_bytes();
    bytes
        .windows(terminator.len())
        .position(|window| window == terminator)
}
