// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Settings management for Parley
//!
//! Handles loading settings from a TOML file. All fields have serde
//! defaults so a partial (or empty) settings file is always valid.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;

/// Main settings structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Retry and resilience settings for streaming calls
    #[serde(default)]
    pub resilience: ResilienceConfig,

    /// Conversation and turn-loop settings
    #[serde(default)]
    pub conversation: ConversationConfig,
}

/// Retry and backoff settings for streaming calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceConfig {
    /// Maximum number of backoff retries after the pool has been exhausted
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay in milliseconds for exponential backoff
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum delay in milliseconds (cap for backoff)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Jitter percentage (0.0 to 1.0) for randomizing delays
    #[serde(default = "default_jitter")]
    pub jitter: f64,

    /// Cap on the backoff exponent, independent of the retry count
    #[serde(default = "default_backoff_cap")]
    pub backoff_cap: u32,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
            backoff_cap: default_backoff_cap(),
        }
    }
}

/// Turn-loop and history settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Maximum model round-trips per query
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,

    /// Maximum tokens per model response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// How many recent images to keep across history; 0 disables the pass
    #[serde(default = "default_keep_recent_images")]
    pub keep_recent_images: usize,

    /// Minimum image overage before the retention pass rewrites history
    #[serde(default = "default_image_removal_threshold")]
    pub image_removal_threshold: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            keep_recent_images: default_keep_recent_images(),
            image_removal_threshold: default_image_removal_threshold(),
        }
    }
}

fn default_max_retries() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    16000
}

fn default_jitter() -> f64 {
    0.25
}

fn default_backoff_cap() -> u32 {
    2
}

fn default_max_turns() -> u32 {
    30
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_temperature() -> f32 {
    0.1
}

fn default_keep_recent_images() -> usize {
    1
}

fn default_image_removal_threshold() -> usize {
    1
}

impl Settings {
    /// Parse settings from a TOML string
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Load settings from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }
}
