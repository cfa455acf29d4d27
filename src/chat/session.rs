// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Session cancellation registry
//!
//! Keyed cancellation flags for in-flight streams. Cancellation is
//! cooperative: the turn loop polls its flag and exits cleanly; there is no
//! hard-cancel of an in-flight call.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Shared registry of active stream sessions.
///
/// Invariant: no session id outlives its turn loop — [`SessionGuard`]
/// removes the entry on drop, on every exit path.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<Mutex<HashMap<String, Arc<AtomicBool>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<AtomicBool>>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("Session registry lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Register a session id. Re-registering keeps the existing flag.
    pub fn register(&self, id: &str) {
        self.lock()
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(AtomicBool::new(false)));
        tracing::debug!(session = id, "session registered");
    }

    /// Request cancellation of a session. Returns false for unknown ids.
    pub fn cancel(&self, id: &str) -> bool {
        match self.lock().get(id) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                tracing::info!(session = id, "session cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Remove a session id. Returns false if it was not registered.
    pub fn deregister(&self, id: &str) -> bool {
        let removed = self.lock().remove(id).is_some();
        if removed {
            tracing::debug!(session = id, "session deregistered");
        }
        removed
    }

    /// Whether cancellation has been requested for this id
    pub fn is_cancelled(&self, id: &str) -> bool {
        self.lock()
            .get(id)
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Whether the id is currently registered
    pub fn is_registered(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    /// Register the id and return a guard that deregisters it on drop
    pub fn guard(&self, id: impl Into<String>) -> SessionGuard {
        let id = id.into();
        self.register(&id);
        SessionGuard {
            registry: self.clone(),
            id,
        }
    }
}

/// Deregisters its session id when dropped
pub struct SessionGuard {
    registry: SessionRegistry,
    id: String,
}

impl SessionGuard {
    /// The guarded session id
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.deregister(&self.id);
    }
}
