// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Conversation state building
//!
//! Folds a finished tool turn back into history and bounds payload growth
//! with an image-retention pass.

use crate::chat::streaming::{FinishedTurn, ToolInput};
use crate::llm::message::{ContentBlock, Message, ToolResultContent};
use crate::tools::dispatcher::ToolResultEncodings;

/// Normalize a tool input for the model round-trip.
///
/// The wire format forbids non-JSON input, so empty and malformed inputs
/// become an empty object.
pub fn round_trip_input(input: &ToolInput) -> serde_json::Value {
    match input {
        ToolInput::Parsed(value) => value.clone(),
        _ => serde_json::json!({}),
    }
}

/// Build the assistant message for a finished tool turn.
///
/// Block order: the reasoning block (only if a signature was captured this
/// turn), all tool-use blocks in aggregation order, then any trailing free
/// text.
pub fn build_assistant_message(turn: &FinishedTurn) -> Message {
    let mut blocks = Vec::new();

    if !turn.thinking_signature.is_empty() {
        blocks.push(ContentBlock::Reasoning {
            text: turn.thinking_text.clone(),
            signature: turn.thinking_signature.clone(),
        });
    }

    for call in &turn.calls {
        blocks.push(ContentBlock::ToolUse {
            id: call.tool_use_id.clone(),
            name: call.name.clone(),
            input: round_trip_input(&call.input),
        });
    }

    if !turn.text.trim().is_empty() {
        blocks.push(ContentBlock::Text {
            text: turn.text.clone(),
        });
    }

    Message::assistant_blocks(blocks)
}

/// Build the user message carrying one tool result per call, in the order
/// the calls were aggregated. Uses the provider encoding (raw image bytes).
pub fn build_tool_result_message(results: &[ToolResultEncodings]) -> Message {
    let blocks = results
        .iter()
        .map(|encodings| ContentBlock::ToolResult {
            tool_use_id: encodings.provider.tool_use_id.clone(),
            content: encodings.provider.content.clone(),
            status: encodings.provider.status,
        })
        .collect();

    Message::user_blocks(blocks)
}

/// Count image blocks across history, both bare image blocks and images
/// inside tool results.
pub fn count_images(messages: &[Message]) -> usize {
    messages
        .iter()
        .flat_map(|message| message.content.iter())
        .map(|block| match block {
            ContentBlock::Image(_) => 1,
            ContentBlock::ToolResult { content, .. } => content
                .iter()
                .filter(|item| matches!(item, ToolResultContent::Image(_)))
                .count(),
            _ => 0,
        })
        .sum()
}

/// Keep only the `keep` most recent images across history.
///
/// Older image blocks are removed first. When the overage is below
/// `min_removal_threshold` the pass is skipped, so a marginally
/// over-budget history is not rewritten on every turn. Returns the number
/// of images removed.
pub fn retain_recent_images(
    messages: &mut [Message],
    keep: usize,
    min_removal_threshold: usize,
) -> usize {
    let total = count_images(messages);
    if total <= keep {
        return 0;
    }
    let overage = total - keep;
    if overage < min_removal_threshold {
        return 0;
    }

    tracing::debug!(total, keep, removing = overage, "trimming images from history");
    let mut to_remove = overage;
    for message in messages.iter_mut() {
        if to_remove == 0 {
            break;
        }
        let mut kept = Vec::with_capacity(message.content.len());
        for block in message.content.drain(..) {
            match block {
                ContentBlock::Image(_) if to_remove > 0 => {
                    to_remove -= 1;
                }
                ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    status,
                } if to_remove > 0 => {
                    let mut inner = Vec::with_capacity(content.len());
                    for item in content {
                        match item {
                            ToolResultContent::Image(_) if to_remove > 0 => {
                                to_remove -= 1;
                            }
                            other => inner.push(other),
                        }
                    }
                    kept.push(ContentBlock::ToolResult {
                        tool_use_id,
                        content: inner,
                        status,
                    });
                }
                other => kept.push(other),
            }
        }
        message.content = kept;
    }

    overage
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::decoder::StopReason;
    use crate::chat::streaming::ToolCall;
    use crate::llm::message::{ImageBlock, ImageData, Role, ToolStatus};
    use crate::tools::dispatcher::ToolResultPayload;

    fn finished_turn(calls: Vec<ToolCall>, text: &str, signature: &str) -> FinishedTurn {
        FinishedTurn {
            calls,
            text: text.to_string(),
            thinking_text: if signature.is_empty() {
                String::new()
            } else {
                "thinking".to_string()
            },
            thinking_signature: signature.to_string(),
            stop_reason: Some(StopReason::ToolUse),
        }
    }

    fn call(id: &str, name: &str, input: ToolInput) -> ToolCall {
        ToolCall {
            tool_use_id: id.to_string(),
            name: name.to_string(),
            input,
        }
    }

    fn text_result(id: &str, text: &str, status: Option<ToolStatus>) -> ToolResultEncodings {
        let payload = ToolResultPayload {
            tool_use_id: id.to_string(),
            content: vec![ToolResultContent::Text {
                text: text.to_string(),
            }],
            status,
        };
        ToolResultEncodings {
            provider: payload.clone(),
            text_only: payload.clone(),
            serializable: payload,
        }
    }

    fn image_message(count: usize) -> Message {
        let blocks = (0..count)
            .map(|i| {
                ContentBlock::Image(ImageBlock {
                    format: "png".to_string(),
                    source: ImageData::Bytes(vec![i as u8]),
                })
            })
            .collect();
        Message::user_blocks(blocks)
    }

    // ===== Assistant message tests =====

    #[test]
    fn test_assistant_message_block_order() {
        let turn = finished_turn(
            vec![call(
                "t1",
                "weather___get_forecast",
                ToolInput::Parsed(serde_json::json!({"city": "NYC"})),
            )],
            "Checking the forecast.",
            "sig-1",
        );
        let message = build_assistant_message(&turn);

        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.content.len(), 3);
        assert!(matches!(message.content[0], ContentBlock::Reasoning { .. }));
        assert!(matches!(message.content[1], ContentBlock::ToolUse { .. }));
        assert!(matches!(message.content[2], ContentBlock::Text { .. }));
    }

    #[test]
    fn test_assistant_message_without_signature_drops_reasoning() {
        let turn = finished_turn(
            vec![call("t1", "test___x", ToolInput::Empty)],
            "some text",
            "",
        );
        let message = build_assistant_message(&turn);
        assert!(!message
            .content
            .iter()
            .any(|b| matches!(b, ContentBlock::Reasoning { .. })));
    }

    #[test]
    fn test_assistant_message_empty_input_normalized() {
        let turn = finished_turn(vec![call("t1", "test___x", ToolInput::Empty)], "", "");
        let message = build_assistant_message(&turn);
        match &message.content[0] {
            ContentBlock::ToolUse { input, .. } => {
                assert_eq!(*input, serde_json::json!({}));
            }
            other => panic!("Expected ToolUse, got {other:?}"),
        }
    }

    #[test]
    fn test_assistant_message_malformed_input_normalized() {
        let turn = finished_turn(
            vec![call(
                "t1",
                "test___x",
                ToolInput::Malformed {
                    raw: "{oops".to_string(),
                    error: "bad".to_string(),
                },
            )],
            "",
            "",
        );
        let message = build_assistant_message(&turn);
        match &message.content[0] {
            ContentBlock::ToolUse { input, .. } => {
                assert_eq!(*input, serde_json::json!({}));
            }
            other => panic!("Expected ToolUse, got {other:?}"),
        }
    }

    #[test]
    fn test_assistant_message_blank_text_skipped() {
        let turn = finished_turn(vec![call("t1", "test___x", ToolInput::Empty)], "  \n", "");
        let message = build_assistant_message(&turn);
        assert!(!message
            .content
            .iter()
            .any(|b| matches!(b, ContentBlock::Text { .. })));
    }

    // ===== Tool result message tests =====

    #[test]
    fn test_tool_result_message_order_and_status() {
        let results = vec![
            text_result("t1", "fine", None),
            text_result("t2", "boom", Some(ToolStatus::Error)),
        ];
        let message = build_tool_result_message(&results);

        assert_eq!(message.role, Role::User);
        assert_eq!(message.content.len(), 2);
        match (&message.content[0], &message.content[1]) {
            (
                ContentBlock::ToolResult {
                    tool_use_id: first,
                    status: first_status,
                    ..
                },
                ContentBlock::ToolResult {
                    tool_use_id: second,
                    status: second_status,
                    ..
                },
            ) => {
                assert_eq!(first, "t1");
                assert!(first_status.is_none());
                assert_eq!(second, "t2");
                assert_eq!(*second_status, Some(ToolStatus::Error));
            }
            other => panic!("Expected two ToolResult blocks, got {other:?}"),
        }
    }

    // ===== Image retention tests =====

    #[test]
    fn test_retain_recent_images_under_budget_is_noop() {
        let mut messages = vec![image_message(1)];
        assert_eq!(retain_recent_images(&mut messages, 2, 1), 0);
        assert_eq!(count_images(&messages), 1);
    }

    #[test]
    fn test_retain_recent_images_keeps_most_recent() {
        let mut messages = vec![image_message(2), image_message(2), image_message(1)];
        let removed = retain_recent_images(&mut messages, 2, 1);
        assert_eq!(removed, 3);
        assert_eq!(count_images(&messages), 2);
        // Oldest message is emptied first
        assert_eq!(count_images(&messages[..1]), 0);
        assert_eq!(count_images(&messages[2..]), 1);
    }

    #[test]
    fn test_retain_recent_images_exactly_n_remain() {
        for total in 3..8usize {
            let mut messages: Vec<Message> = (0..total).map(|_| image_message(1)).collect();
            retain_recent_images(&mut messages, 2, 1);
            assert_eq!(count_images(&messages), 2);
        }
    }

    #[test]
    fn test_retain_recent_images_threshold_skips_small_overage() {
        let mut messages = vec![image_message(3)];
        // Overage of 1 is below the threshold of 2: nothing is removed
        assert_eq!(retain_recent_images(&mut messages, 2, 2), 0);
        assert_eq!(count_images(&messages), 3);
    }

    #[test]
    fn test_retain_recent_images_inside_tool_results() {
        let image = ToolResultContent::Image(ImageBlock {
            format: "png".to_string(),
            source: ImageData::Bytes(vec![1]),
        });
        let tool_result = |id: &str| {
            Message::user_blocks(vec![ContentBlock::ToolResult {
                tool_use_id: id.to_string(),
                content: vec![
                    ToolResultContent::Text {
                        text: "shot".to_string(),
                    },
                    image.clone(),
                ],
                status: None,
            }])
        };
        let mut messages = vec![tool_result("t1"), tool_result("t2")];

        let removed = retain_recent_images(&mut messages, 1, 1);
        assert_eq!(removed, 1);
        assert_eq!(count_images(&messages), 1);
        // Text content of the trimmed result is preserved
        match &messages[0].content[0] {
            ContentBlock::ToolResult { content, .. } => {
                assert_eq!(content.len(), 1);
                assert!(matches!(content[0], ToolResultContent::Text { .. }));
            }
            other => panic!("Expected ToolResult, got {other:?}"),
        }
    }
}
