// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Transport client trait and related types
//!
//! Defines the boundary to the remote model endpoint. The network transport
//! itself lives behind [`ModelClient`]; this crate only consumes the raw
//! envelope stream it produces.

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::error::Result;
use crate::llm::message::Message;

/// An opaque per-event envelope from the provider's stream.
///
/// The payload shape is the provider's own; it is decoded exactly once, by
/// the event decoder, and never re-inspected downstream.
#[derive(Debug, Clone)]
pub struct RawEnvelope(pub serde_json::Value);

/// Stream of raw envelopes produced by one streaming call
pub type EnvelopeStream = Pin<Box<dyn Stream<Item = Result<RawEnvelope>> + Send>>;

/// An authenticated handle to the remote model endpoint.
///
/// Implementations must surface throttling as
/// [`ApiError::RateLimited`](crate::error::ApiError::RateLimited) so the
/// retry policy can distinguish it from fatal transport errors.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Get the client name (e.g., "bedrock", "mock")
    fn name(&self) -> &str;

    /// Start a streaming call and return the raw envelope stream
    async fn stream_call(&self, request: StreamRequest) -> Result<EnvelopeStream>;
}

/// Request for one streaming call
#[derive(Debug, Clone)]
pub struct StreamRequest {
    /// Model to use
    pub model: String,

    /// Messages in the conversation
    pub messages: Vec<Message>,

    /// System prompt
    pub system: Option<String>,

    /// Maximum tokens in response
    pub max_tokens: u32,

    /// Sampling temperature
    pub temperature: f32,

    /// Tools available for the model to use
    pub tools: Vec<ToolSpec>,
}

impl StreamRequest {
    /// Create a new streaming request
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            system: None,
            max_tokens: 1024,
            temperature: 0.1,
            tools: vec![],
        }
    }

    /// Set the system prompt
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Set max tokens
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set available tools
    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }
}

/// Tool definition advertised to the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Namespaced tool name as presented to the model
    pub name: String,

    /// Tool description
    pub description: String,

    /// Input schema (JSON Schema)
    pub input_schema: serde_json::Value,
}
