//! Delta accumulation: rebuilding tool invocations from streamed fragments
//!
//! The model's response arrives as an ordered sequence of fragments. Each
//! fragment is either free text or belongs to exactly one in-progress tool
//! invocation, identified by a positional index. A single invocation is
//! typically spread over many fragments, and its JSON argument text may be
//! split at any position, even mid-string:
//!
//! ```text
//! Fragment 1: ToolDelta { index: 0, id: "call_abc", name: "get_weather" }
//! Fragment 2: ToolDelta { index: 0, arguments: "{\"loc" }
//! Fragment 3: ToolDelta { index: 0, arguments: "ation" }
//! Fragment 4: ToolDelta { index: 0, arguments: "\":\"Paris\"}" }
//! Fragment 5: EndOfTurn
//! ```
//!
//! [`DeltaAccumulator`] is an explicit finite-state object folded over that
//! sequence with [`DeltaAccumulator::apply`]. At most one invocation is open
//! at a time; a fragment bearing a different index finalizes the open one and
//! opens the next, and the end-of-turn signal finalizes whatever is still
//! open. Indices are treated as monotonic within a round and never reused.
//!
//! Text is buffered here only for the round's history record. Callers
//! forward text fragments downstream as they arrive, before folding them in,
//! so display latency does not depend on accumulation.
//!
//! Argument text is parsed once, at finalization. Malformed JSON degrades to
//! an empty argument object with a logged warning; it never aborts the round.

use crate::types::ToolInvocation;

/// One incremental piece of a streamed model response
#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    /// Free text to forward as-is
    Text(String),
    /// A piece of an in-progress tool invocation
    ToolDelta(ToolDelta),
    /// The model finished its turn
    EndOfTurn,
}

/// A fragment of one tool invocation, grouped by positional index
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolDelta {
    pub index: u32,
    /// Usually present only on the first fragment of an invocation
    pub id: Option<String>,
    /// Usually present only on the first fragment of an invocation
    pub name: Option<String>,
    /// Argument text to append; may split JSON at any byte
    pub arguments: String,
}

/// Everything one model turn produced once the fragment sequence ends
#[derive(Debug, Clone, Default)]
pub struct TurnOutput {
    /// In-order concatenation of all text fragments
    pub text: String,
    /// Finalized invocations, in the order their indices first appeared
    pub invocations: Vec<ToolInvocation>,
}

/// Stateful fold over one round's fragment sequence.
///
/// State is deliberately small: the running text buffer, the single open
/// invocation (if any), the invocations finalized so far, and whether the
/// turn has ended. `finish()` consumes the accumulator: one accumulator per
/// round, never reused.
#[derive(Debug)]
pub struct DeltaAccumulator {
    round: u32,
    text: String,
    open: Option<OpenInvocation>,
    finalized: Vec<ToolInvocation>,
    ended: bool,
}

/// The invocation currently being assembled
#[derive(Debug)]
struct OpenInvocation {
    index: u32,
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

impl DeltaAccumulator {
    /// Create an accumulator for the given round. The round number only
    /// feeds synthetic invocation ids, keeping them unique across rounds.
    pub fn new(round: u32) -> Self {
        Self {
            round,
            text: String::new(),
            open: None,
            finalized: Vec::new(),
            ended: false,
        }
    }

    /// Fold one fragment into the accumulator state.
    ///
    /// Fragments arriving after the end-of-turn signal are dropped with a
    /// debug log; a well-behaved upstream never sends them.
    pub fn apply(&mut self, fragment: Fragment) {
        if self.ended {
            log::debug!("dropping fragment after end of turn: {:?}", fragment);
            return;
        }

        match fragment {
            Fragment::Text(text) => self.text.push_str(&text),
            Fragment::ToolDelta(delta) => self.apply_tool_delta(delta),
            Fragment::EndOfTurn => {
                self.finalize_open();
                self.ended = true;
            }
        }
    }

    /// Whether the end-of-turn signal has been observed
    pub fn turn_ended(&self) -> bool {
        self.ended
    }

    /// Close out the turn, finalizing any still-open invocation.
    ///
    /// A fragment stream that ends without an explicit end-of-turn signal is
    /// treated as ended; the transport closing is the only signal we get.
    pub fn finish(mut self) -> TurnOutput {
        self.finalize_open();
        TurnOutput {
            text: self.text,
            invocations: self.finalized,
        }
    }

    fn apply_tool_delta(&mut self, delta: ToolDelta) {
        let continues_open = self
            .open
            .as_ref()
            .is_some_and(|open| open.index == delta.index);

        if continues_open {
            if let Some(open) = self.open.as_mut() {
                if let Some(id) = delta.id {
                    open.id = Some(id);
                }
                if let Some(name) = delta.name {
                    open.name = Some(name);
                }
                open.arguments.push_str(&delta.arguments);
            }
        } else {
            // New index: the previous invocation is complete by contract
            // (indices are monotonic within a round).
            self.finalize_open();
            self.open = Some(OpenInvocation {
                index: delta.index,
                id: delta.id,
                name: delta.name,
                arguments: delta.arguments,
            });
        }
    }

    fn finalize_open(&mut self) {
        let Some(open) = self.open.take() else {
            return;
        };

        // An invocation that never received a name cannot be dispatched or
        // recorded against the catalog; drop it rather than fail the round.
        let Some(name) = open.name else {
            log::warn!(
                "dropping unnamed tool invocation at index {} (no name fragment received)",
                open.index
            );
            return;
        };

        let id = open
            .id
            .unwrap_or_else(|| format!("call_{}_{}", self.round, open.index));

        let arguments = if open.arguments.trim().is_empty() {
            serde_json::json!({})
        } else {
            match serde_json::from_str(&open.arguments) {
                Ok(value) => value,
                Err(err) => {
                    log::warn!(
                        "malformed arguments for tool '{}' ({}); substituting empty object",
                        name,
                        err
                    );
                    serde_json::json!({})
                }
            }
        };

        self.finalized.push(ToolInvocation::new(id, name, arguments));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(index: u32, id: Option<&str>, name: Option<&str>, arguments: &str) -> Fragment {
        Fragment::ToolDelta(ToolDelta {
            index,
            id: id.map(String::from),
            name: name.map(String::from),
            arguments: arguments.to_string(),
        })
    }

    #[test]
    fn test_text_only_turn() {
        let mut acc = DeltaAccumulator::new(1);
        acc.apply(Fragment::Text("Hello ".to_string()));
        acc.apply(Fragment::Text("world".to_string()));
        acc.apply(Fragment::EndOfTurn);

        let turn = acc.finish();
        assert_eq!(turn.text, "Hello world");
        assert!(turn.invocations.is_empty());
    }

    #[test]
    fn test_single_invocation_split_arguments() {
        let mut acc = DeltaAccumulator::new(1);
        acc.apply(delta(0, Some("call_abc"), Some("get_weather"), ""));
        acc.apply(delta(0, None, None, "{\"loc"));
        acc.apply(delta(0, None, None, "ation"));
        acc.apply(delta(0, None, None, "\":\"Paris\"}"));
        acc.apply(Fragment::EndOfTurn);

        let turn = acc.finish();
        assert_eq!(turn.invocations.len(), 1);
        let call = &turn.invocations[0];
        assert_eq!(call.id, "call_abc");
        assert_eq!(call.name, "get_weather");
        assert_eq!(call.arguments["location"], "Paris");
    }

    #[test]
    fn test_index_change_finalizes_previous() {
        let mut acc = DeltaAccumulator::new(1);
        acc.apply(delta(0, Some("call_1"), Some("search"), "{\"q\":\"a\"}"));
        acc.apply(delta(1, Some("call_2"), Some("search"), "{\"q\":"));
        acc.apply(delta(1, None, None, "\"b\"}"));
        acc.apply(Fragment::EndOfTurn);

        let turn = acc.finish();
        assert_eq!(turn.invocations.len(), 2);
        assert_eq!(turn.invocations[0].id, "call_1");
        assert_eq!(turn.invocations[0].arguments["q"], "a");
        assert_eq!(turn.invocations[1].id, "call_2");
        assert_eq!(turn.invocations[1].arguments["q"], "b");
    }

    #[test]
    fn test_text_interleaved_with_invocations() {
        let mut acc = DeltaAccumulator::new(1);
        acc.apply(Fragment::Text("Let me check.".to_string()));
        acc.apply(delta(0, Some("call_1"), Some("search"), "{}"));
        acc.apply(Fragment::EndOfTurn);

        let turn = acc.finish();
        assert_eq!(turn.text, "Let me check.");
        assert_eq!(turn.invocations.len(), 1);
    }

    #[test]
    fn test_synthetic_id_when_upstream_omits_one() {
        let mut acc = DeltaAccumulator::new(3);
        acc.apply(delta(0, None, Some("search"), "{}"));
        acc.apply(Fragment::EndOfTurn);

        let turn = acc.finish();
        assert_eq!(turn.invocations[0].id, "call_3_0");
    }

    #[test]
    fn test_malformed_arguments_become_empty_object() {
        let mut acc = DeltaAccumulator::new(1);
        acc.apply(delta(0, Some("call_1"), Some("search"), "{\"q\": tru"));
        acc.apply(Fragment::EndOfTurn);

        let turn = acc.finish();
        assert_eq!(turn.invocations.len(), 1);
        assert_eq!(turn.invocations[0].arguments, serde_json::json!({}));
    }

    #[test]
    fn test_empty_arguments_become_empty_object() {
        let mut acc = DeltaAccumulator::new(1);
        acc.apply(delta(0, Some("call_1"), Some("noop"), ""));
        acc.apply(Fragment::EndOfTurn);

        let turn = acc.finish();
        assert_eq!(turn.invocations[0].arguments, serde_json::json!({}));
    }

    #[test]
    fn test_unnamed_invocation_dropped() {
        let mut acc = DeltaAccumulator::new(1);
        acc.apply(delta(0, Some("call_1"), None, "{}"));
        acc.apply(Fragment::EndOfTurn);

        let turn = acc.finish();
        assert!(turn.invocations.is_empty());
    }

    #[test]
    fn test_finish_without_end_of_turn_finalizes_open() {
        let mut acc = DeltaAccumulator::new(1);
        acc.apply(delta(0, Some("call_1"), Some("search"), "{\"q\":\"a\"}"));
        // stream dropped before a finish signal arrived

        let turn = acc.finish();
        assert_eq!(turn.invocations.len(), 1);
        assert_eq!(turn.invocations[0].arguments["q"], "a");
    }

    #[test]
    fn test_fragments_after_end_of_turn_ignored() {
        let mut acc = DeltaAccumulator::new(1);
        acc.apply(Fragment::Text("done".to_string()));
        acc.apply(Fragment::EndOfTurn);
        acc.apply(Fragment::Text("stray".to_string()));
        acc.apply(delta(0, Some("late"), Some("search"), "{}"));

        let turn = acc.finish();
        assert_eq!(turn.text, "done");
        assert!(turn.invocations.is_empty());
    }

    #[test]
    fn test_many_invocations_in_order() {
        let mut acc = DeltaAccumulator::new(1);
        for i in 0..4u32 {
            acc.apply(delta(
                i,
                None,
                Some(&format!("tool_{}", i)),
                &format!("{{\"n\":{}}}", i),
            ));
        }
        acc.apply(Fragment::EndOfTurn);

        let turn = acc.finish();
        assert_eq!(turn.invocations.len(), 4);
        for (i, call) in turn.invocations.iter().enumerate() {
            assert_eq!(call.name, format!("tool_{}", i));
            assert_eq!(call.arguments["n"], i as u64);
        }
    }
}
