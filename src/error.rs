// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Error types for Parley
//!
//! This module defines all error types used throughout the crate.

use thiserror::Error;

/// Main error type for Parley operations
#[derive(Error, Debug)]
pub enum ParleyError {
    /// API-related errors
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// Session registry errors
    #[error("Session error: {0}")]
    Session(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing errors
    #[error("TOML error: {0}")]
    Toml(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// API-specific error types raised by transport clients
#[derive(Error, Debug)]
pub enum ApiError {
    /// Authentication failed (invalid credentials)
    #[error("Authentication failed: invalid credentials")]
    AuthenticationFailed,

    /// Throttled by the remote endpoint
    #[error("Rate limited: retry after {0} seconds")]
    RateLimited(u32),

    /// Network connectivity error
    #[error("Network error: {0}")]
    Network(String),

    /// Invalid response from the endpoint
    #[error("Invalid API response: {0}")]
    InvalidResponse(String),

    /// The endpoint returned an error
    #[error("API error ({status}): {message}")]
    ServerError { status: u16, message: String },

    /// Timeout waiting for response
    #[error("Request timed out")]
    Timeout,

    /// Streaming error
    #[error("Streaming error: {0}")]
    StreamError(String),
}

/// Result type alias for Parley operations
pub type Result<T> = std::result::Result<T, ParleyError>;

impl ParleyError {
    /// Whether this error is a throttling response from the remote endpoint.
    ///
    /// Only rate limiting is eligible for retry; every other transport
    /// failure propagates immediately.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ParleyError::Api(ApiError::RateLimited(_)))
    }
}

impl From<toml::de::Error> for ParleyError {
    fn from(err: toml::de::Error) -> Self {
        ParleyError::Toml(err.to_string())
    }
}

impl From<toml::ser::Error> for ParleyError {
    fn from(err: toml::ser::Error) -> Self {
        ParleyError::Toml(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parley_error_session() {
        let err = ParleyError::Session("session expired".to_string());
        assert!(err.to_string().contains("Session error"));
        assert!(err.to_string().contains("session expired"));
    }

    #[test]
    fn test_parley_error_config() {
        let err = ParleyError::Config("bad config".to_string());
        assert!(err.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_parley_error_toml() {
        let err = ParleyError::Toml("parse error".to_string());
        assert!(err.to_string().contains("TOML error"));
    }

    #[test]
    fn test_parley_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ParleyError = io_err.into();
        assert!(err.to_string().contains("IO error"));
    }

    #[test]
    fn test_parley_error_from_api_error() {
        let api_err = ApiError::AuthenticationFailed;
        let err: ParleyError = api_err.into();
        assert!(err.to_string().contains("API error"));
    }

    #[test]
    fn test_api_error_rate_limited() {
        let err = ApiError::RateLimited(30);
        assert!(err.to_string().contains("Rate limited"));
        assert!(err.to_string().contains("30"));
    }

    #[test]
    fn test_api_error_server_error() {
        let err = ApiError::ServerError {
            status: 500,
            message: "internal server error".to_string(),
        };
        assert!(err.to_string().contains("500"));
        assert!(err.to_string().contains("internal server error"));
    }

    #[test]
    fn test_api_error_timeout() {
        let err = ApiError::Timeout;
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_is_rate_limited() {
        assert!(ParleyError::Api(ApiError::RateLimited(10)).is_rate_limited());
        assert!(!ParleyError::Api(ApiError::Timeout).is_rate_limited());
        assert!(!ParleyError::Api(ApiError::Network("down".to_string())).is_rate_limited());
        assert!(!ParleyError::Config("oops".to_string()).is_rate_limited());
    }

    #[test]
    fn test_result_type_alias() {
        fn test_fn() -> Result<i32> {
            Ok(42)
        }

        assert_eq!(test_fn().unwrap(), 42);
    }
}
