// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Endpoint abstraction layer
//!
//! Message types, the transport client trait, the client pool, the retry
//! policy, and a scripted mock client for tests.

pub mod message;
pub mod mock_provider;
pub mod pool;
pub mod provider;
pub mod retry;
