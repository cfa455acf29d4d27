// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Streaming event decoder
//!
//! Normalizes opaque per-event envelopes from the transport into typed
//! [`TurnEvent`]s. Decoding is a single serde pass; the decoder never
//! retries, buffers across calls, or interprets semantics.

use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ParleyError, Result};
use crate::llm::provider::RawEnvelope;
use crate::tools::dispatcher::ToolResultPayload;

/// Why the model stopped streaming
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Natural end of message
    EndTurn,
    /// Hit max tokens
    MaxTokens,
    /// Stop sequence hit
    StopSequence,
    /// Wants to use a tool
    ToolUse,
}

/// A normalized event on the caller-facing stream.
///
/// Serializes to the stable wire shape `{"type": ..., "data": {...}}`.
/// The first four kinds are produced by the decoder; `stopped` and `error`
/// are produced by the turn loop.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum TurnEvent {
    BlockStart(BlockStartData),
    BlockDelta(BlockDeltaData),
    BlockStop(BlockStopData),
    MessageStop(MessageStopData),
    Stopped(StoppedData),
    Error(ErrorData),
}

/// Payload of a `block_start` event
#[derive(Debug, Clone, Serialize, PartialEq, Default)]
pub struct BlockStartData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<BlockStart>,
}

/// Descriptor carried by a `block_start` event
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BlockStart {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_use: Option<ToolUseStart>,
}

/// A new tool call begins: id and name, input still empty
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolUseStart {
    pub tool_use_id: String,
    pub name: String,
}

/// Payload of a `block_delta` event
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BlockDeltaData {
    pub delta: BlockDelta,
}

/// Incremental content within the currently-open block
#[derive(Debug, Clone, Serialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct BlockDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_use: Option<ToolUseDelta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<ReasoningDelta>,
}

/// A raw JSON fragment to append to the open tool call's input
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolUseDelta {
    pub input: String,
}

/// Incremental reasoning content
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ReasoningDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// Payload of a `block_stop` event
#[derive(Debug, Clone, Serialize, PartialEq, Default)]
pub struct BlockStopData {}

/// Payload of a `message_stop` event
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageStopData {
    pub stop_reason: StopReason,

    /// Interleaved call/result pairs, present after a tool turn
    #[serde(rename = "tool_results", skip_serializing_if = "Option::is_none")]
    pub tool_results: Option<Vec<ToolExchange>>,
}

/// Payload of a `stopped` event
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StoppedData {
    pub message: String,
}

/// Payload of an `error` event
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ErrorData {
    pub error: String,
}

/// One entry of the interleaved `tool_results` list
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum ToolExchange {
    Call(ToolCallSummary),
    Result(ToolResultPayload),
}

/// Serializable view of an aggregated tool call
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallSummary {
    pub tool_use_id: String,
    pub name: String,
    pub input: serde_json::Value,
}

impl TurnEvent {
    /// Build a `stopped` event
    pub fn stopped(message: impl Into<String>) -> Self {
        TurnEvent::Stopped(StoppedData {
            message: message.into(),
        })
    }

    /// Build an `error` event
    pub fn error(message: impl Into<String>) -> Self {
        TurnEvent::Error(ErrorData {
            error: message.into(),
        })
    }

    /// Get the message-stop payload if this is a `message_stop` event
    pub fn as_message_stop(&self) -> Option<&MessageStopData> {
        match self {
            TurnEvent::MessageStop(data) => Some(data),
            _ => None,
        }
    }
}

// Raw envelope shapes, deserialized exactly once at this boundary.

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
enum RawBody {
    ContentBlockStart(RawBlockStart),
    ContentBlockDelta(RawBlockDelta),
    ContentBlockStop(RawBlockStop),
    MessageStop(RawMessageStop),
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct RawBlockStart {
    start: Option<RawStart>,
    #[allow(dead_code)]
    content_block_index: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct RawStart {
    tool_use: Option<ToolUseStart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBlockDelta {
    delta: RawDelta,
    #[serde(default)]
    #[allow(dead_code)]
    content_block_index: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct RawDelta {
    text: Option<String>,
    tool_use: Option<ToolUseDelta>,
    reasoning_content: Option<ReasoningDelta>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct RawBlockStop {
    #[allow(dead_code)]
    content_block_index: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMessageStop {
    stop_reason: StopReason,
}

/// Decode one raw envelope into exactly one normalized event.
pub fn decode_envelope(envelope: &RawEnvelope) -> Result<TurnEvent> {
    let body: RawBody = serde_json::from_value(envelope.0.clone()).map_err(|e| {
        ParleyError::Api(ApiError::InvalidResponse(format!(
            "unrecognized stream envelope: {e}"
        )))
    })?;

    Ok(match body {
        RawBody::ContentBlockStart(raw) => TurnEvent::BlockStart(BlockStartData {
            start: raw.start.map(|s| BlockStart {
                tool_use: s.tool_use,
            }),
        }),
        RawBody::ContentBlockDelta(raw) => TurnEvent::BlockDelta(BlockDeltaData {
            delta: BlockDelta {
                text: raw.delta.text,
                tool_use: raw.delta.tool_use,
                reasoning_content: raw.delta.reasoning_content,
            },
        }),
        RawBody::ContentBlockStop(_) => TurnEvent::BlockStop(BlockStopData {}),
        RawBody::MessageStop(raw) => TurnEvent::MessageStop(MessageStopData {
            stop_reason: raw.stop_reason,
            tool_results: None,
        }),
    })
}
