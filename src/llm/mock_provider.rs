// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Mock model client for testing
//!
//! Provides a scripted implementation of the [`ModelClient`] trait that can
//! be used in tests without a real endpoint, plus envelope builders for
//! assembling raw streams.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{ApiError, ParleyError, Result};
use crate::llm::provider::{EnvelopeStream, ModelClient, RawEnvelope, StreamRequest};

/// One scripted outcome for a `stream_call`
#[derive(Debug)]
pub enum MockOutcome {
    /// Fail the call with a throttling error
    RateLimited,
    /// Fail the call with an arbitrary API error
    Fail(ApiError),
    /// Succeed and stream the given envelopes
    Stream(Vec<RawEnvelope>),
}

/// A scripted mock client.
///
/// Clones share the same script and counters, so a pool of clones behaves
/// like a pool of handles against one scripted endpoint.
#[derive(Clone)]
pub struct MockClient {
    name: String,
    script: Arc<Mutex<VecDeque<MockOutcome>>>,
    call_count: Arc<AtomicUsize>,
    recorded_requests: Arc<Mutex<Vec<StreamRequest>>>,
}

impl Default for MockClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockClient {
    /// Create a new mock client with an empty script
    pub fn new() -> Self {
        Self {
            name: "mock".to_string(),
            script: Arc::new(Mutex::new(VecDeque::new())),
            call_count: Arc::new(AtomicUsize::new(0)),
            recorded_requests: Arc::new(Mutex::new(vec![])),
        }
    }

    /// Create a mock client with a custom name
    pub fn with_name(name: impl Into<String>) -> Self {
        let mut client = Self::new();
        client.name = name.into();
        client
    }

    fn lock_script(&self) -> std::sync::MutexGuard<'_, VecDeque<MockOutcome>> {
        match self.script.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("Mock client script lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn lock_recorded(&self) -> std::sync::MutexGuard<'_, Vec<StreamRequest>> {
        match self.recorded_requests.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("Mock client request lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Queue an outcome for the next call
    pub fn with_outcome(self, outcome: MockOutcome) -> Self {
        self.lock_script().push_back(outcome);
        self
    }

    /// Queue a successful streamed turn with the given envelopes
    pub fn with_stream(self, envelopes: Vec<RawEnvelope>) -> Self {
        self.with_outcome(MockOutcome::Stream(envelopes))
    }

    /// Queue a plain text turn ending with `end_turn`
    pub fn with_text_turn(self, text: impl Into<String>) -> Self {
        self.with_stream(envelopes::text_turn(&text.into()))
    }

    /// Queue `n` throttling failures
    pub fn with_rate_limited(self, n: usize) -> Self {
        let mut client = self;
        for _ in 0..n {
            client = client.with_outcome(MockOutcome::RateLimited);
        }
        client
    }

    /// Get the number of times `stream_call` was invoked
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Get all recorded requests
    pub fn recorded_requests(&self) -> Vec<StreamRequest> {
        self.lock_recorded().clone()
    }

    /// Get the last request made
    pub fn last_request(&self) -> Option<StreamRequest> {
        self.lock_recorded().last().cloned()
    }
}

#[async_trait]
impl ModelClient for MockClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream_call(&self, request: StreamRequest) -> Result<EnvelopeStream> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.lock_recorded().push(request);

        let outcome = self.lock_script().pop_front();
        match outcome {
            None => Ok(boxed_stream(envelopes::text_turn("Mock response"))),
            Some(MockOutcome::RateLimited) => Err(ParleyError::Api(ApiError::RateLimited(1))),
            Some(MockOutcome::Fail(err)) => Err(ParleyError::Api(err)),
            Some(MockOutcome::Stream(envs)) => Ok(boxed_stream(envs)),
        }
    }
}

fn boxed_stream(envelopes: Vec<RawEnvelope>) -> EnvelopeStream {
    Box::pin(futures::stream::iter(envelopes.into_iter().map(Ok)))
}

/// Builders for raw envelopes in the provider's wire shape
pub mod envelopes {
    use super::RawEnvelope;
    use serde_json::json;

    /// Start of a plain content block
    pub fn block_start() -> RawEnvelope {
        RawEnvelope(json!({"contentBlockStart": {}}))
    }

    /// Start of a tool-use block
    pub fn block_start_tool(tool_use_id: &str, name: &str) -> RawEnvelope {
        RawEnvelope(json!({
            "contentBlockStart": {
                "start": {"toolUse": {"toolUseId": tool_use_id, "name": name}}
            }
        }))
    }

    /// Incremental text
    pub fn text_delta(text: &str) -> RawEnvelope {
        RawEnvelope(json!({"contentBlockDelta": {"delta": {"text": text}}}))
    }

    /// Incremental tool input JSON
    pub fn tool_input_delta(chunk: &str) -> RawEnvelope {
        RawEnvelope(json!({"contentBlockDelta": {"delta": {"toolUse": {"input": chunk}}}}))
    }

    /// Incremental reasoning text
    pub fn reasoning_text_delta(text: &str) -> RawEnvelope {
        RawEnvelope(json!({"contentBlockDelta": {"delta": {"reasoningContent": {"text": text}}}}))
    }

    /// Reasoning signature
    pub fn reasoning_signature_delta(signature: &str) -> RawEnvelope {
        RawEnvelope(json!({
            "contentBlockDelta": {"delta": {"reasoningContent": {"signature": signature}}}
        }))
    }

    /// End of the current content block
    pub fn block_stop() -> RawEnvelope {
        RawEnvelope(json!({"contentBlockStop": {}}))
    }

    /// End of the streamed message
    pub fn message_stop(stop_reason: &str) -> RawEnvelope {
        RawEnvelope(json!({"messageStop": {"stopReason": stop_reason}}))
    }

    /// A complete plain text turn
    pub fn text_turn(text: &str) -> Vec<RawEnvelope> {
        vec![
            block_start(),
            text_delta(text),
            block_stop(),
            message_stop("end_turn"),
        ]
    }

    /// A complete single-call tool turn with the input split into chunks
    pub fn tool_turn(tool_use_id: &str, name: &str, input_chunks: &[&str]) -> Vec<RawEnvelope> {
        let mut envs = vec![block_start_tool(tool_use_id, name)];
        for chunk in input_chunks {
            envs.push(tool_input_delta(chunk));
        }
        envs.push(block_stop());
        envs.push(message_stop("tool_use"));
        envs
    }
}
