// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Concurrent tool dispatch
//!
//! Fans out all tool calls of one turn, waits for all of them, and
//! normalizes heterogeneous results. One tool's failure never aborts its
//! siblings; failures become error-status results.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::future::join_all;
use serde::Serialize;

use crate::chat::streaming::{ToolCall, ToolInput};
use crate::llm::message::{ImageBlock, ImageData, ToolResultContent, ToolStatus};
use crate::tools::{ToolContent, ToolOutput, ToolRegistry};

/// One encoding of a tool result
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultPayload {
    pub tool_use_id: String,
    pub content: Vec<ToolResultContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ToolStatus>,
}

/// The three parallel encodings produced per tool call.
///
/// The model round-trip needs raw image bytes, the caller-facing event must
/// be JSON-serializable (base64), and some consumers only want text. All
/// three are produced every time; this is a behavioral requirement, not an
/// artifact.
#[derive(Debug, Clone)]
pub struct ToolResultEncodings {
    /// Text plus raw-byte images, for the next model request
    pub provider: ToolResultPayload,
    /// Text only
    pub text_only: ToolResultPayload,
    /// Text plus base64 images, safe to serialize to callers
    pub serializable: ToolResultPayload,
}

/// Dispatch all calls of a turn concurrently, preserving call order.
pub async fn dispatch_tool_calls(
    registry: &ToolRegistry,
    calls: &[ToolCall],
) -> Vec<ToolResultEncodings> {
    let futures: Vec<_> = calls.iter().map(|call| dispatch_one(registry, call)).collect();
    join_all(futures).await
}

async fn dispatch_one(registry: &ToolRegistry, call: &ToolCall) -> ToolResultEncodings {
    let outcome = match invoke_backend(registry, call).await {
        Ok(output) => encode_output(&call.tool_use_id, &call.name, &output),
        Err(message) => Err(message),
    };

    match outcome {
        Ok(encodings) => encodings,
        Err(message) => {
            tracing::warn!(tool = %call.name, "{message}");
            error_encodings(&call.tool_use_id, message)
        }
    }
}

async fn invoke_backend(
    registry: &ToolRegistry,
    call: &ToolCall,
) -> std::result::Result<ToolOutput, String> {
    let args = match &call.input {
        ToolInput::Parsed(value) => value.clone(),
        ToolInput::Empty | ToolInput::Pending => serde_json::json!({}),
        ToolInput::Malformed { error, .. } => {
            return Err(format!(
                "{} tool call failed. error: input is not valid JSON: {error}",
                call.name
            ))
        }
    };

    let (server_id, tool_name) = registry.resolve(&call.name).ok_or_else(|| {
        format!(
            "{} tool call failed. error: no namespace mapping for tool name",
            call.name
        )
    })?;
    let backend = registry.backend(&server_id).ok_or_else(|| {
        format!(
            "{} tool call failed. error: no backend registered for server '{server_id}'",
            call.name
        )
    })?;

    tracing::info!(server = %server_id, tool = %tool_name, id = %call.tool_use_id, "invoking tool");
    backend
        .invoke(&tool_name, args)
        .await
        .map_err(|e| format!("{} tool call failed. error: {e}", call.name))
}

fn encode_output(
    tool_use_id: &str,
    call_name: &str,
    output: &ToolOutput,
) -> std::result::Result<ToolResultEncodings, String> {
    // Text chunks are joined in order into a single text block
    let text = output
        .content
        .iter()
        .filter_map(|chunk| match chunk {
            ToolContent::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n");
    let text_block = ToolResultContent::Text { text };

    let mut raw_images = Vec::new();
    let mut base64_images = Vec::new();
    for chunk in &output.content {
        if let ToolContent::Image { mime_type, data } = chunk {
            let format = mime_type
                .strip_prefix("image/")
                .unwrap_or(mime_type)
                .to_string();
            let bytes = BASE64.decode(data).map_err(|e| {
                format!("{call_name} tool call failed. error: invalid base64 image payload: {e}")
            })?;
            raw_images.push(ToolResultContent::Image(ImageBlock {
                format: format.clone(),
                source: ImageData::Bytes(bytes),
            }));
            base64_images.push(ToolResultContent::Image(ImageBlock {
                format,
                source: ImageData::Base64(data.clone()),
            }));
        }
    }

    let payload = |content: Vec<ToolResultContent>| ToolResultPayload {
        tool_use_id: tool_use_id.to_string(),
        content,
        status: None,
    };

    let mut provider_content = vec![text_block.clone()];
    provider_content.extend(raw_images);
    let mut serializable_content = vec![text_block.clone()];
    serializable_content.extend(base64_images);

    Ok(ToolResultEncodings {
        provider: payload(provider_content),
        text_only: payload(vec![text_block]),
        serializable: payload(serializable_content),
    })
}

fn error_encodings(tool_use_id: &str, message: String) -> ToolResultEncodings {
    let payload = ToolResultPayload {
        tool_use_id: tool_use_id.to_string(),
        content: vec![ToolResultContent::Text { text: message }],
        status: Some(ToolStatus::Error),
    };
    ToolResultEncodings {
        provider: payload.clone(),
        text_only: payload.clone(),
        serializable: payload,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolBackend;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;

    struct ScriptedBackend;

    #[async_trait]
    impl ToolBackend for ScriptedBackend {
        async fn invoke(
            &self,
            tool_name: &str,
            args: serde_json::Value,
        ) -> anyhow::Result<ToolOutput> {
            match tool_name {
                "echo" => Ok(ToolOutput::text(
                    args.get("msg").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                )),
                "slow_echo" => {
                    // Finishes last regardless of dispatch order
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(ToolOutput::text("slow"))
                }
                "chunks" => Ok(ToolOutput {
                    content: vec![
                        ToolContent::Text {
                            text: "one".to_string(),
                        },
                        ToolContent::Text {
                            text: "two".to_string(),
                        },
                    ],
                }),
                "screenshot" => Ok(ToolOutput {
                    content: vec![
                        ToolContent::Text {
                            text: "captured".to_string(),
                        },
                        ToolContent::Image {
                            mime_type: "image/png".to_string(),
                            data: BASE64.encode([1u8, 2, 3]),
                        },
                    ],
                }),
                "bad_image" => Ok(ToolOutput {
                    content: vec![ToolContent::Image {
                        mime_type: "image/png".to_string(),
                        data: "!!not-base64!!".to_string(),
                    }],
                }),
                "boom" => Err(anyhow::anyhow!("kaboom")),
                other => Err(anyhow::anyhow!("unknown tool: {other}")),
            }
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register_server("test", Arc::new(ScriptedBackend));
        registry
    }

    fn parsed_call(id: &str, name: &str, input: serde_json::Value) -> ToolCall {
        ToolCall {
            tool_use_id: id.to_string(),
            name: name.to_string(),
            input: ToolInput::Parsed(input),
        }
    }

    fn result_text(payload: &ToolResultPayload) -> &str {
        match &payload.content[0] {
            ToolResultContent::Text { text } => text,
            other => panic!("Expected leading text block, got {other:?}"),
        }
    }

    // ==================== Dispatch tests ====================

    #[tokio::test]
    async fn test_dispatch_success() {
        let registry = registry();
        let calls = vec![parsed_call(
            "t1",
            "test___echo",
            serde_json::json!({"msg": "hi"}),
        )];

        let results = dispatch_tool_calls(&registry, &calls).await;
        assert_eq!(results.len(), 1);
        assert!(results[0].provider.status.is_none());
        assert_eq!(result_text(&results[0].provider), "hi");
    }

    #[tokio::test]
    async fn test_dispatch_preserves_order_despite_completion_order() {
        let registry = registry();
        let calls = vec![
            parsed_call("t1", "test___slow_echo", serde_json::json!({})),
            parsed_call("t2", "test___echo", serde_json::json!({"msg": "fast"})),
        ];

        let results = dispatch_tool_calls(&registry, &calls).await;
        assert_eq!(results[0].provider.tool_use_id, "t1");
        assert_eq!(result_text(&results[0].provider), "slow");
        assert_eq!(results[1].provider.tool_use_id, "t2");
        assert_eq!(result_text(&results[1].provider), "fast");
    }

    #[tokio::test]
    async fn test_dispatch_failure_does_not_abort_sibling() {
        let registry = registry();
        let calls = vec![
            parsed_call("t1", "test___boom", serde_json::json!({})),
            parsed_call("t2", "test___echo", serde_json::json!({"msg": "ok"})),
        ];

        let results = dispatch_tool_calls(&registry, &calls).await;
        assert_eq!(results[0].provider.status, Some(ToolStatus::Error));
        assert!(result_text(&results[0].provider).contains("kaboom"));
        assert!(results[1].provider.status.is_none());
        assert_eq!(result_text(&results[1].provider), "ok");
    }

    #[tokio::test]
    async fn test_dispatch_unresolvable_name() {
        let registry = registry();
        let calls = vec![parsed_call("t1", "nodelimiter", serde_json::json!({}))];
        let results = dispatch_tool_calls(&registry, &calls).await;
        assert_eq!(results[0].provider.status, Some(ToolStatus::Error));
        assert!(result_text(&results[0].provider).contains("no namespace mapping"));
    }

    #[tokio::test]
    async fn test_dispatch_unknown_server() {
        let registry = registry();
        let calls = vec![parsed_call("t1", "ghost___echo", serde_json::json!({}))];
        let results = dispatch_tool_calls(&registry, &calls).await;
        assert_eq!(results[0].provider.status, Some(ToolStatus::Error));
        assert!(result_text(&results[0].provider).contains("no backend registered"));
    }

    #[tokio::test]
    async fn test_dispatch_malformed_input() {
        let registry = registry();
        let calls = vec![ToolCall {
            tool_use_id: "t1".to_string(),
            name: "test___echo".to_string(),
            input: ToolInput::Malformed {
                raw: "{oops".to_string(),
                error: "expected value".to_string(),
            },
        }];

        let results = dispatch_tool_calls(&registry, &calls).await;
        assert_eq!(results[0].provider.status, Some(ToolStatus::Error));
        assert!(result_text(&results[0].provider).contains("not valid JSON"));
    }

    #[tokio::test]
    async fn test_dispatch_empty_input_becomes_object() {
        let registry = registry();
        let calls = vec![ToolCall {
            tool_use_id: "t1".to_string(),
            name: "test___echo".to_string(),
            input: ToolInput::Empty,
        }];

        let results = dispatch_tool_calls(&registry, &calls).await;
        assert!(results[0].provider.status.is_none());
    }

    // ==================== Encoding tests ====================

    #[tokio::test]
    async fn test_text_chunks_joined_in_order() {
        let registry = registry();
        let calls = vec![parsed_call("t1", "test___chunks", serde_json::json!({}))];
        let results = dispatch_tool_calls(&registry, &calls).await;
        assert_eq!(result_text(&results[0].provider), "one\ntwo");
    }

    #[tokio::test]
    async fn test_three_encodings_for_image_result() {
        let registry = registry();
        let calls = vec![parsed_call("t1", "test___screenshot", serde_json::json!({}))];
        let results = dispatch_tool_calls(&registry, &calls).await;
        let encodings = &results[0];

        // Provider encoding carries raw bytes
        assert_eq!(encodings.provider.content.len(), 2);
        match &encodings.provider.content[1] {
            ToolResultContent::Image(image) => {
                assert_eq!(image.format, "png");
                assert_eq!(image.source, ImageData::Bytes(vec![1, 2, 3]));
            }
            other => panic!("Expected image, got {other:?}"),
        }

        // Text-only encoding drops the image
        assert_eq!(encodings.text_only.content.len(), 1);

        // Serializable encoding carries base64
        match &encodings.serializable.content[1] {
            ToolResultContent::Image(image) => {
                assert_eq!(image.source, ImageData::Base64(BASE64.encode([1u8, 2, 3])));
            }
            other => panic!("Expected image, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_base64_image_fails_that_call() {
        let registry = registry();
        let calls = vec![
            parsed_call("t1", "test___bad_image", serde_json::json!({})),
            parsed_call("t2", "test___echo", serde_json::json!({"msg": "ok"})),
        ];

        let results = dispatch_tool_calls(&registry, &calls).await;
        assert_eq!(results[0].provider.status, Some(ToolStatus::Error));
        assert!(results[1].provider.status.is_none());
    }

    #[test]
    fn test_error_encodings_identical_across_views() {
        let encodings = error_encodings("t1", "nope".to_string());
        assert_eq!(encodings.provider, encodings.text_only);
        assert_eq!(encodings.provider, encodings.serializable);
        assert_eq!(encodings.provider.status, Some(ToolStatus::Error));
    }

    #[test]
    fn test_payload_serialization_shape() {
        let payload = ToolResultPayload {
            tool_use_id: "t1".to_string(),
            content: vec![ToolResultContent::Text {
                text: "hi".to_string(),
            }],
            status: None,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["toolUseId"], "t1");
        assert!(json.get("status").is_none());
        assert_eq!(json["content"][0]["text"], "hi");
    }
}
