// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Round-robin client pool
//!
//! Rotates among pre-authenticated endpoint handles to spread load and to
//! give the retry path a fresh handle after throttling.

use std::sync::Arc;

use crate::error::{ParleyError, Result};
use crate::llm::provider::ModelClient;

/// Factory used to lazily construct an ad-hoc client when the pool is empty
pub type ClientFactory = Box<dyn Fn() -> Result<Arc<dyn ModelClient>> + Send + Sync>;

/// Rotating pool of endpoint handles.
///
/// Handles are shared read-only; rotation only changes which handle is
/// selected. Invariant: `0 <= index < clients.len()` whenever the pool is
/// non-empty.
pub struct ClientPool {
    clients: Vec<Arc<dyn ModelClient>>,
    index: usize,
    factory: Option<ClientFactory>,
    fallback: Option<Arc<dyn ModelClient>>,
}

impl ClientPool {
    /// Create a pool over a fixed set of handles
    pub fn new(clients: Vec<Arc<dyn ModelClient>>) -> Self {
        Self {
            clients,
            index: 0,
            factory: None,
            fallback: None,
        }
    }

    /// Set a factory used to build a single ad-hoc handle when the pool is
    /// empty. The factory is invoked at most once.
    pub fn with_fallback(mut self, factory: ClientFactory) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Select the next handle, round-robin with wrap-around.
    pub fn next(&mut self) -> Result<Arc<dyn ModelClient>> {
        if self.clients.is_empty() {
            if let Some(client) = &self.fallback {
                return Ok(client.clone());
            }
            let factory = self.factory.as_ref().ok_or_else(|| {
                ParleyError::Config("client pool is empty and no fallback factory is set".into())
            })?;
            let client = factory()?;
            tracing::debug!(client = client.name(), "client pool empty, built ad-hoc client");
            self.fallback = Some(client.clone());
            return Ok(client);
        }

        if self.index >= self.clients.len() {
            self.index = 0;
        }
        let client = self.clients[self.index].clone();
        tracing::debug!(index = self.index, client = client.name(), "selected pool client");
        self.index = (self.index + 1) % self.clients.len();
        Ok(client)
    }

    /// Number of pre-built handles in the pool
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether the pool has no pre-built handles
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
