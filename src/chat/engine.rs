// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Turn-loop controller
//!
//! Drives streaming turns against the endpoint: retries throttled calls by
//! rotating the client pool, forwards decoded events to the caller in real
//! time while feeding the aggregator, dispatches tool calls on tool-use
//! stops, folds results back into history, and repeats until a terminal
//! stop reason, cancellation, an error, or the turn budget.

use std::pin::Pin;
use std::sync::{Arc, Mutex};

use async_stream::stream;
use futures::{Stream, StreamExt};
use tokio::time::sleep;

use crate::chat::decoder::{
    decode_envelope, MessageStopData, StopReason, ToolCallSummary, ToolExchange, TurnEvent,
};
use crate::chat::history;
use crate::chat::session::SessionRegistry;
use crate::chat::streaming::{ToolCall, ToolInput, TurnAggregator};
use crate::config::ConversationConfig;
use crate::error::Result;
use crate::llm::message::Message;
use crate::llm::pool::ClientPool;
use crate::llm::provider::{ModelClient, StreamRequest, ToolSpec};
use crate::llm::retry::{RetryAction, RetryPolicy};
use crate::tools::{dispatch_tool_calls, ToolRegistry, ToolResultEncodings};

const STOPPED_BY_USER: &str = "Stream stopped by user request";
const TURN_BUDGET_EXHAUSTED: &str = "turn budget exhausted";

/// Caller-facing event stream for one query
pub type EventStream = Pin<Box<dyn Stream<Item = TurnEvent> + Send>>;

/// Parameters for one multi-turn query
#[derive(Debug, Clone)]
pub struct QueryRequest {
    /// New user query; appended to history when non-empty
    pub query: Option<String>,
    /// Seed conversation history
    pub history: Vec<Message>,
    /// System prompt
    pub system: Option<String>,
    /// Model to use
    pub model: String,
    /// Maximum tokens per model response
    pub max_tokens: u32,
    /// Sampling temperature
    pub temperature: f32,
    /// Maximum model round-trips
    pub max_turns: u32,
    /// Tools advertised to the model
    pub tools: Vec<ToolSpec>,
    /// Session id for the cancellation side-channel
    pub session_id: Option<String>,
    /// How many recent images to keep across history; None disables the pass
    pub keep_recent_images: Option<usize>,
    /// Minimum image overage before history is rewritten
    pub image_removal_threshold: usize,
}

impl QueryRequest {
    /// Create a request with default limits
    pub fn new(model: impl Into<String>) -> Self {
        Self::from_config(model, &ConversationConfig::default())
    }

    /// Create a request seeded from conversation settings
    pub fn from_config(model: impl Into<String>, config: &ConversationConfig) -> Self {
        Self {
            query: None,
            history: vec![],
            system: None,
            model: model.into(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            max_turns: config.max_turns,
            tools: vec![],
            session_id: None,
            keep_recent_images: (config.keep_recent_images > 0)
                .then_some(config.keep_recent_images),
            image_removal_threshold: config.image_removal_threshold,
        }
    }

    /// Set the user query
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// Set the seed history
    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    /// Set the system prompt
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Set the turn budget
    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    /// Set the advertised tools
    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }

    /// Attach a session id for cancellation
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Configure the image retention pass
    pub fn with_image_retention(mut self, keep: Option<usize>, threshold: usize) -> Self {
        self.keep_recent_images = keep;
        self.image_removal_threshold = threshold;
        self
    }
}

/// The streaming conversation engine
pub struct ChatEngine {
    pool: Arc<Mutex<ClientPool>>,
    registry: Arc<ToolRegistry>,
    sessions: SessionRegistry,
    retry_policy: RetryPolicy,
}

impl ChatEngine {
    /// Create an engine over a client pool and a tool registry
    pub fn new(pool: ClientPool, registry: ToolRegistry) -> Self {
        Self {
            pool: Arc::new(Mutex::new(pool)),
            registry: Arc::new(registry),
            sessions: SessionRegistry::new(),
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Override the retry policy
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Share an existing session registry
    pub fn with_sessions(mut self, sessions: SessionRegistry) -> Self {
        self.sessions = sessions;
        self
    }

    /// Handle to the session registry
    pub fn sessions(&self) -> SessionRegistry {
        self.sessions.clone()
    }

    /// Register a session id for cancellation
    pub fn register_session(&self, id: &str) {
        self.sessions.register(id);
    }

    /// Request cancellation of a session
    pub fn cancel_session(&self, id: &str) -> bool {
        self.sessions.cancel(id)
    }

    /// Remove a session id
    pub fn deregister_session(&self, id: &str) -> bool {
        self.sessions.deregister(id)
    }

    /// Run a multi-turn streaming query.
    ///
    /// The returned stream is the sole channel for content and error/stop
    /// signaling; it ends after one terminal event. A fresh call must be
    /// issued for a new turn sequence. The session id, if any, is
    /// deregistered when the stream finishes or is dropped.
    pub fn process_query_stream(&self, request: QueryRequest) -> EventStream {
        let pool = Arc::clone(&self.pool);
        let registry = Arc::clone(&self.registry);
        let sessions = self.sessions.clone();
        let policy = self.retry_policy.clone();

        Box::pin(stream! {
            let QueryRequest {
                query,
                history,
                system,
                model,
                max_tokens,
                temperature,
                max_turns,
                tools,
                session_id,
                keep_recent_images,
                image_removal_threshold,
            } = request;

            let _guard = session_id.clone().map(|id| sessions.guard(id));

            let mut messages = history;
            if let Some(query) = query {
                if !query.is_empty() {
                    messages.push(Message::user(query));
                }
            }

            let mut turn: u32 = 1;
            let mut terminal: Option<TurnEvent> = None;
            let mut finished = false;

            'turns: while turn <= max_turns {
                if cancelled(&sessions, session_id.as_deref()) {
                    terminal = Some(TurnEvent::stopped(STOPPED_BY_USER));
                    break 'turns;
                }

                let stream_request = StreamRequest {
                    model: model.clone(),
                    messages: messages.clone(),
                    system: system.clone(),
                    max_tokens,
                    temperature,
                    tools: tools.clone(),
                };

                let mut schedule = policy.schedule(pool_size(&pool));
                let mut envelope_stream = loop {
                    let client = match next_client(&pool) {
                        Ok(client) => client,
                        Err(e) => {
                            terminal = Some(TurnEvent::error(e.to_string()));
                            break 'turns;
                        }
                    };
                    match client.stream_call(stream_request.clone()).await {
                        Ok(stream) => break stream,
                        Err(e) => match schedule.next_action(&e) {
                            RetryAction::RetryNow => {
                                tracing::warn!(turn, "throttled, rotating to the next client");
                            }
                            RetryAction::Backoff(delay) => {
                                tracing::warn!(
                                    turn,
                                    delay_ms = delay.as_millis() as u64,
                                    "throttled, backing off before retry"
                                );
                                sleep(delay).await;
                            }
                            RetryAction::GiveUp => {
                                tracing::error!(turn, "streaming call failed: {e}");
                                terminal = Some(TurnEvent::error(e.to_string()));
                                break 'turns;
                            }
                        },
                    }
                };

                let mut aggregator = TurnAggregator::new();
                loop {
                    let Some(item) = envelope_stream.next().await else {
                        terminal =
                            Some(TurnEvent::error("stream ended without message_stop"));
                        break 'turns;
                    };
                    if cancelled(&sessions, session_id.as_deref()) {
                        terminal = Some(TurnEvent::stopped(STOPPED_BY_USER));
                        break 'turns;
                    }
                    let envelope = match item {
                        Ok(envelope) => envelope,
                        Err(e) => {
                            terminal = Some(TurnEvent::error(e.to_string()));
                            break 'turns;
                        }
                    };
                    let event = match decode_envelope(&envelope) {
                        Ok(event) => event,
                        Err(e) => {
                            terminal = Some(TurnEvent::error(e.to_string()));
                            break 'turns;
                        }
                    };
                    aggregator.observe(&event);

                    match event {
                        TurnEvent::MessageStop(data) => {
                            if data.stop_reason == StopReason::ToolUse
                                && aggregator.has_tool_calls()
                            {
                                let turn_content = aggregator.finish();
                                tracing::info!(
                                    turn,
                                    calls = turn_content.calls.len(),
                                    "dispatching tool calls"
                                );
                                let outcomes =
                                    dispatch_tool_calls(&registry, &turn_content.calls).await;
                                let tool_results =
                                    interleave_tool_results(&turn_content.calls, &outcomes);
                                yield TurnEvent::MessageStop(MessageStopData {
                                    stop_reason: data.stop_reason,
                                    tool_results: Some(tool_results),
                                });

                                messages.push(history::build_assistant_message(&turn_content));
                                messages.push(history::build_tool_result_message(&outcomes));
                                if let Some(keep) = keep_recent_images {
                                    history::retain_recent_images(
                                        &mut messages,
                                        keep,
                                        image_removal_threshold,
                                    );
                                }
                                tracing::info!(
                                    turn,
                                    messages = messages.len(),
                                    "tool results folded, starting next turn"
                                );
                                turn += 1;
                                continue 'turns;
                            } else {
                                tracing::debug!(turn, stop_reason = ?data.stop_reason, "turn complete");
                                yield TurnEvent::MessageStop(data);
                                finished = true;
                                break 'turns;
                            }
                        }
                        other => {
                            yield other;
                        }
                    }
                }
            }

            if !finished {
                match terminal {
                    Some(event) => yield event,
                    None => {
                        tracing::info!(max_turns, "turn budget exhausted");
                        yield TurnEvent::stopped(TURN_BUDGET_EXHAUSTED);
                    }
                }
            }
            // _guard drops here, deregistering the session on every exit path
        })
    }
}

fn cancelled(sessions: &SessionRegistry, session_id: Option<&str>) -> bool {
    session_id
        .map(|id| sessions.is_cancelled(id))
        .unwrap_or(false)
}

fn pool_size(pool: &Arc<Mutex<ClientPool>>) -> usize {
    lock_pool(pool).len()
}

fn next_client(pool: &Arc<Mutex<ClientPool>>) -> Result<Arc<dyn ModelClient>> {
    lock_pool(pool).next()
}

fn lock_pool(pool: &Arc<Mutex<ClientPool>>) -> std::sync::MutexGuard<'_, ClientPool> {
    match pool.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("Client pool lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

/// Build the `tool_results` list: interleaved call/result pairs using the
/// serializable result encoding.
fn interleave_tool_results(
    calls: &[ToolCall],
    outcomes: &[ToolResultEncodings],
) -> Vec<ToolExchange> {
    calls
        .iter()
        .zip(outcomes.iter())
        .flat_map(|(call, outcome)| {
            [
                ToolExchange::Call(ToolCallSummary {
                    tool_use_id: call.tool_use_id.clone(),
                    name: call.name.clone(),
                    input: summary_input(&call.input),
                }),
                ToolExchange::Result(outcome.serializable.clone()),
            ]
        })
        .collect()
}

fn summary_input(input: &ToolInput) -> serde_json::Value {
    match input {
        ToolInput::Parsed(value) => value.clone(),
        ToolInput::Malformed { raw, .. } => serde_json::Value::String(raw.clone()),
        ToolInput::Empty | ToolInput::Pending => serde_json::json!({}),
    }
}
