// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Message types for model interactions
//!
//! Defines the message and content-block structures that make up
//! conversation history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier for the message
    pub id: Uuid,

    /// Role of the message sender
    pub role: Role,

    /// Ordered content blocks of the message
    pub content: Vec<ContentBlock>,

    /// When the message was created
    pub timestamp: DateTime<Utc>,
}

/// Role of the message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// User message
    User,
    /// Assistant response
    Assistant,
}

/// A block of content within a message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Text content
    Text { text: String },

    /// Image content
    Image(ImageBlock),

    /// Attached document
    Document {
        name: String,
        format: String,
        bytes: Vec<u8>,
    },

    /// Tool use request from the assistant
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    /// Tool result returned to the model
    ToolResult {
        tool_use_id: String,
        content: Vec<ToolResultContent>,
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<ToolStatus>,
    },

    /// Reasoning content captured from a streamed turn
    Reasoning { text: String, signature: String },
}

/// A content item inside a tool result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolResultContent {
    /// Text content
    Text { text: String },
    /// Image content
    Image(ImageBlock),
}

/// An image payload with its encoding
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageBlock {
    /// Image format, e.g. "png" or "jpeg"
    pub format: String,
    /// Encoded payload
    pub source: ImageData,
}

/// The two encodings an image payload travels in.
///
/// The model round-trip carries raw bytes; events serialized to callers
/// carry base64. Both encodings exist on purpose (see the tool dispatcher).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ImageData {
    /// Raw image bytes
    Bytes(Vec<u8>),
    /// Base64-encoded image data
    Base64(String),
}

/// Outcome marker on a tool result; success is encoded as an absent status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Success,
    Error,
}

impl Message {
    fn with_blocks(role: Role, content: Vec<ContentBlock>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content,
            timestamp: Utc::now(),
        }
    }

    /// Create a new user message with text content
    pub fn user(text: impl Into<String>) -> Self {
        Self::with_blocks(Role::User, vec![ContentBlock::Text { text: text.into() }])
    }

    /// Create a new user message with content blocks
    pub fn user_blocks(content: Vec<ContentBlock>) -> Self {
        Self::with_blocks(Role::User, content)
    }

    /// Create a new assistant message with text content
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::with_blocks(
            Role::Assistant,
            vec![ContentBlock::Text { text: text.into() }],
        )
    }

    /// Create a new assistant message with content blocks
    pub fn assistant_blocks(content: Vec<ContentBlock>) -> Self {
        Self::with_blocks(Role::Assistant, content)
    }

    /// Get the first text block of the message, if any
    pub fn text(&self) -> Option<&str> {
        self.content.iter().find_map(|block| {
            if let ContentBlock::Text { text } = block {
                Some(text.as_str())
            } else {
                None
            }
        })
    }

    /// Get all tool use blocks from the message
    pub fn tool_uses(&self) -> Vec<&ContentBlock> {
        self.content
            .iter()
            .filter(|block| matches!(block, ContentBlock::ToolUse { .. }))
            .collect()
    }

    /// Check if the message requests any tool use
    pub fn has_tool_use(&self) -> bool {
        !self.tool_uses().is_empty()
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}
