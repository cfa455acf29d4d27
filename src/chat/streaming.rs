// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Streaming turn aggregation
//!
//! Accumulates the decoded events of one streaming call: tool-call
//! fragments split across deltas, plain text, and reasoning content.
//! Separated from I/O so the state machine is testable on its own.

use crate::chat::decoder::{BlockDelta, StopReason, TurnEvent};

/// The input of a tool call as it moves through aggregation
#[derive(Debug, Clone, PartialEq)]
pub enum ToolInput {
    /// The block is still open and receiving input fragments
    Pending,
    /// The block closed without any input text
    Empty,
    /// The concatenated input parsed as JSON
    Parsed(serde_json::Value),
    /// The concatenated input was not valid JSON; fails this call only
    Malformed { raw: String, error: String },
}

/// A finalized tool call in aggregation order
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub tool_use_id: String,
    pub name: String,
    pub input: ToolInput,
}

/// Accumulator for one tool call while its block is streaming
#[derive(Debug)]
struct ToolCallFragment {
    tool_use_id: String,
    name: String,
    partial_input: String,
    input: ToolInput,
}

/// Everything aggregated over one streamed turn
#[derive(Debug)]
pub struct FinishedTurn {
    /// Tool calls in the order their blocks started
    pub calls: Vec<ToolCall>,
    /// Concatenated plain text
    pub text: String,
    /// Concatenated reasoning text
    pub thinking_text: String,
    /// Reasoning signature, empty if none was streamed
    pub thinking_signature: String,
    /// Stop reason, if a message stop was observed
    pub stop_reason: Option<StopReason>,
}

/// Turn-scoped aggregation state machine.
///
/// Invariant: the "current" fragment is always the most recently appended
/// entry; only one fragment receives delta text at a time, matching the
/// protocol's single-active-block streaming discipline.
#[derive(Debug, Default)]
pub struct TurnAggregator {
    calls: Vec<ToolCallFragment>,
    text: String,
    thinking_text: String,
    thinking_signature: String,
    stop_reason: Option<StopReason>,
}

impl TurnAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one decoded event into the aggregator
    pub fn observe(&mut self, event: &TurnEvent) {
        match event {
            TurnEvent::BlockStart(data) => {
                if let Some(tool_use) = data.start.as_ref().and_then(|s| s.tool_use.as_ref()) {
                    tracing::info!(tool = %tool_use.name, id = %tool_use.tool_use_id, "tool use detected");
                    self.calls.push(ToolCallFragment {
                        tool_use_id: tool_use.tool_use_id.clone(),
                        name: tool_use.name.clone(),
                        partial_input: String::new(),
                        input: ToolInput::Pending,
                    });
                }
            }
            TurnEvent::BlockDelta(data) => self.observe_delta(&data.delta),
            TurnEvent::BlockStop(_) => self.finalize_open_fragment(),
            TurnEvent::MessageStop(data) => self.stop_reason = Some(data.stop_reason),
            _ => {}
        }
    }

    fn observe_delta(&mut self, delta: &BlockDelta) {
        if let Some(text) = &delta.text {
            self.text.push_str(text);
        }
        if let Some(tool_use) = &delta.tool_use {
            match self.calls.last_mut() {
                Some(fragment) if fragment.input == ToolInput::Pending => {
                    fragment.partial_input.push_str(&tool_use.input);
                }
                _ => tracing::warn!("tool input delta with no open tool-use block, dropping"),
            }
        }
        if let Some(reasoning) = &delta.reasoning_content {
            if let Some(text) = &reasoning.text {
                self.thinking_text.push_str(text);
            }
            if let Some(signature) = &reasoning.signature {
                self.thinking_signature = signature.clone();
            }
        }
    }

    /// Finalize the open fragment, if any. Runs exactly once per tool-use
    /// block, at its matching block-stop.
    fn finalize_open_fragment(&mut self) {
        let Some(fragment) = self.calls.last_mut() else {
            return;
        };
        if fragment.input != ToolInput::Pending {
            // The stop closes a text or reasoning block
            return;
        }

        let raw = std::mem::take(&mut fragment.partial_input);
        if raw.is_empty() {
            fragment.input = ToolInput::Empty;
            return;
        }
        match serde_json::from_str::<serde_json::Value>(&raw) {
            Ok(value) => fragment.input = ToolInput::Parsed(value),
            Err(e) => {
                tracing::warn!(tool = %fragment.name, "tool input is not valid JSON: {e}");
                fragment.input = ToolInput::Malformed {
                    raw,
                    error: e.to_string(),
                };
            }
        }
    }

    /// Whether any tool call was aggregated this turn
    pub fn has_tool_calls(&self) -> bool {
        !self.calls.is_empty()
    }

    /// Stop reason observed so far
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    /// Consume the aggregator and return the turn's finalized content
    pub fn finish(self) -> FinishedTurn {
        let calls = self
            .calls
            .into_iter()
            .map(|fragment| {
                let input = match fragment.input {
                    // A fragment still pending at message stop never saw its
                    // block-stop; treat it like an empty input.
                    ToolInput::Pending => {
                        tracing::warn!(tool = %fragment.name, "tool-use block never closed");
                        ToolInput::Empty
                    }
                    other => other,
                };
                ToolCall {
                    tool_use_id: fragment.tool_use_id,
                    name: fragment.name,
                    input,
                }
            })
            .collect();

        FinishedTurn {
            calls,
            text: self.text,
            thinking_text: self.thinking_text,
            thinking_signature: self.thinking_signature,
            stop_reason: self.stop_reason,
        }
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use crate::chat::decoder::decode_envelope;
    use crate::llm::mock_provider::envelopes;
    use proptest::prelude::*;

    fn arb_json_object() -> impl Strategy<Value = serde_json::Value> {
        proptest::collection::btree_map("[a-z]{1,8}", any::<i64>(), 1..6).prop_map(|map| {
            serde_json::Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, serde_json::Value::from(v)))
                    .collect(),
            )
        })
    }

    proptest! {
        // Aggregated input equals the full parse for any chunking of the
        // serialized argument object.
        #[test]
        fn prop_chunked_input_round_trips(
            object in arb_json_object(),
            chunk_len in 1usize..16,
        ) {
            let json = serde_json::to_string(&object).unwrap();
            let chunks: Vec<&str> = json
                .as_bytes()
                .chunks(chunk_len)
                .map(|c| std::str::from_utf8(c).unwrap())
                .collect();

            let mut agg = TurnAggregator::new();
            for envelope in envelopes::tool_turn("t1", "test___x", &chunks) {
                agg.observe(&decode_envelope(&envelope).unwrap());
            }

            let turn = agg.finish();
            prop_assert_eq!(&turn.calls[0].input, &ToolInput::Parsed(object));
        }
    }
}
