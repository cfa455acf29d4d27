// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Parley - streaming multi-turn conversation orchestration for tool-using
//! LLM agents.
//!
//! The core is the streaming turn loop: decode a provider's event stream
//! into typed block events, aggregate tool-invocation fragments split
//! across deltas, execute the requested tools concurrently, fold results
//! back into conversation state, and repeat until the model signals
//! completion or a turn/error limit is reached - cancellable mid-stream
//! and resilient to transient throttling.
//!
//! Architecture highlights:
//! - `chat`: event decoder, turn aggregator, state builder, session
//!   cancellation, and the turn-loop engine
//! - `llm`: message types, the transport client boundary, client pool,
//!   and retry policy
//! - `tools`: namespaced tool registry and the concurrent dispatcher
//! - `config`: TOML settings with serde defaults
//!
//! Transport clients and tool-server lifecycle management live outside this
//! crate, behind the `ModelClient` and `ToolBackend` traits.

pub mod chat;
pub mod config;
pub mod error;
pub mod llm;
pub mod tools;

pub use error::{ParleyError, Result};
