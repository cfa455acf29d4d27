// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Retry policy for streaming calls
//!
//! Throttling failures are retried by rotating the client pool first and
//! backing off with exponential delay once the pool has been exhausted.
//! The decision logic is a pure object so it can be tested without I/O.

use rand::Rng;
use std::time::Duration;

use crate::config::settings::ResilienceConfig;
use crate::error::ParleyError;

/// Exponential backoff with jitter and a capped exponent
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Base delay in milliseconds (exponentially increased)
    pub base_delay_ms: u64,
    /// Maximum delay in milliseconds
    pub max_delay_ms: u64,
    /// Jitter percentage (0.0 to 1.0)
    pub jitter: f64,
    /// Cap on the exponent, regardless of how many retries occur
    pub cap: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        let resilience = ResilienceConfig::default();
        Self {
            base_delay_ms: resilience.base_delay_ms,
            max_delay_ms: resilience.max_delay_ms,
            jitter: resilience.jitter,
            cap: resilience.backoff_cap,
        }
    }
}

impl BackoffConfig {
    /// Calculate the delay for a given attempt number
    pub fn delay(&self, attempt: u32) -> Duration {
        // Exponential backoff: base * 2^attempt, exponent capped
        let exponent = attempt.min(self.cap);
        let exponential_ms = self.base_delay_ms.saturating_mul(2u64.saturating_pow(exponent));
        let capped_ms = exponential_ms.min(self.max_delay_ms);

        // Add jitter
        let jitter_range = (capped_ms as f64 * self.jitter) as i64;
        let jitter_ms = if jitter_range > 0 {
            rand::rng().random_range(-jitter_range..=jitter_range)
        } else {
            0
        };

        let final_ms = (capped_ms as i64 + jitter_ms).max(0) as u64;
        Duration::from_millis(final_ms)
    }
}

/// Retry budget for one streaming call
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of backoff retries
    pub max_retries: u32,
    /// Delay configuration
    pub backoff: BackoffConfig,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&ResilienceConfig::default())
    }
}

impl From<&ResilienceConfig> for RetryPolicy {
    fn from(config: &ResilienceConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff: BackoffConfig {
                base_delay_ms: config.base_delay_ms,
                max_delay_ms: config.max_delay_ms,
                jitter: config.jitter,
                cap: config.backoff_cap,
            },
        }
    }
}

impl RetryPolicy {
    /// Start a schedule for one streaming call against a pool of the given size
    pub fn schedule(&self, pool_size: usize) -> RetrySchedule {
        RetrySchedule {
            policy: self.clone(),
            pool_size: pool_size.max(1),
            backoffs: 0,
            rotation: 0,
        }
    }
}

/// What the caller should do after a failed attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryAction {
    /// Retry immediately on the next pool handle
    RetryNow,
    /// Sleep, then retry on the next pool handle
    Backoff(Duration),
    /// Propagate the error
    GiveUp,
}

/// Mutable retry state for one streaming call.
///
/// Rate-limited failures first rotate through the remaining pool handles
/// with no delay; each time a full rotation is exhausted, one backoff is
/// spent. Any other error gives up immediately.
#[derive(Debug)]
pub struct RetrySchedule {
    policy: RetryPolicy,
    pool_size: usize,
    backoffs: u32,
    rotation: usize,
}

impl RetrySchedule {
    /// Decide how to handle a failed attempt
    pub fn next_action(&mut self, error: &ParleyError) -> RetryAction {
        if !error.is_rate_limited() {
            return RetryAction::GiveUp;
        }

        if self.rotation + 1 < self.pool_size {
            self.rotation += 1;
            return RetryAction::RetryNow;
        }

        if self.backoffs >= self.policy.max_retries {
            tracing::warn!(
                retries = self.backoffs,
                "retry budget exhausted, throttling persists"
            );
            return RetryAction::GiveUp;
        }

        let delay = self.policy.backoff.delay(self.backoffs);
        self.backoffs += 1;
        self.rotation = 0;
        RetryAction::Backoff(delay)
    }

    /// Number of backoffs spent so far
    pub fn backoffs(&self) -> u32 {
        self.backoffs
    }
}
