// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Tool system for Parley
//!
//! Tool backends are external capabilities namespaced by the server that
//! provides them, so multiple backends can expose same-named tools without
//! collision. The registry owns the namespaced-name mapping; the dispatcher
//! fans calls out to backends.

pub mod dispatcher;

pub use dispatcher::{dispatch_tool_calls, ToolResultEncodings, ToolResultPayload};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Separator between the server namespace and the tool name
pub const NAMESPACE_DELIMITER: &str = "___";

/// Output returned by a tool backend
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Ordered content chunks
    pub content: Vec<ToolContent>,
}

/// One chunk of tool output
#[derive(Debug, Clone)]
pub enum ToolContent {
    /// Text content
    Text { text: String },
    /// Image content, base64-encoded with its mime type
    Image { mime_type: String, data: String },
}

impl ToolOutput {
    /// Build a text-only output
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
        }
    }
}

/// A connected tool server able to invoke its tools.
///
/// Connection lifecycle and capability listing live outside this crate;
/// backends may raise arbitrary errors.
#[async_trait]
pub trait ToolBackend: Send + Sync {
    /// Invoke a tool by its original (un-namespaced) name
    async fn invoke(&self, tool_name: &str, args: serde_json::Value) -> anyhow::Result<ToolOutput>;
}

/// Registry of tool backends and their namespaced tool names.
///
/// Owned explicitly and passed by reference into the turn loop; there is no
/// global name table.
#[derive(Default)]
pub struct ToolRegistry {
    backends: HashMap<String, Arc<dyn ToolBackend>>,
    forward: HashMap<String, String>,
    reverse: HashMap<String, String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend under a server namespace
    pub fn register_server(&mut self, server_id: impl Into<String>, backend: Arc<dyn ToolBackend>) {
        let server_id = server_id.into();
        tracing::debug!(server = %server_id, "tool backend registered");
        self.backends.insert(server_id, backend);
    }

    /// Register a tool and return its model-facing namespaced name
    pub fn register_tool(&mut self, server_id: &str, tool_name: &str) -> String {
        let key = format!("{server_id}{NAMESPACE_DELIMITER}{tool_name}");
        let model_name = Self::normalize_name(&key);
        self.forward.insert(key.clone(), model_name.clone());
        self.reverse.insert(model_name.clone(), key);
        model_name
    }

    /// Replace characters the model-facing name format does not allow
    pub fn normalize_name(name: &str) -> String {
        name.replace(['-', '/', ':'], "_")
    }

    /// Resolve a model-facing name back to `(server_id, tool_name)`.
    ///
    /// Unregistered names still resolve when they carry the standard
    /// delimiter, so a registry rebuilt mid-session keeps working.
    pub fn resolve(&self, model_name: &str) -> Option<(String, String)> {
        let key = self
            .reverse
            .get(model_name)
            .cloned()
            .or_else(|| model_name.contains(NAMESPACE_DELIMITER).then(|| model_name.to_string()))?;

        let mut parts = key.splitn(2, NAMESPACE_DELIMITER);
        match (parts.next(), parts.next()) {
            (Some(server), Some(tool)) if !server.is_empty() && !tool.is_empty() => {
                Some((server.to_string(), tool.to_string()))
            }
            _ => None,
        }
    }

    /// Get the backend for a server namespace
    pub fn backend(&self, server_id: &str) -> Option<Arc<dyn ToolBackend>> {
        self.backends.get(server_id).cloned()
    }
}
