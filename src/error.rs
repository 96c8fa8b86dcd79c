//! Error types for imsearch-dl
//!
//! This module provides error handling for the library, including:
//! - The item-level taxonomy used inside the acquisition pipeline (network,
//!   timeout, decode, callback)
//! - Configuration errors that abort an operation before any task is dispatched
//! - HTTP status code mapping for the routing layer
//! - Structured error responses with machine-readable error codes

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use utoipa::ToSchema;

/// Result type alias for imsearch-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for imsearch-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "google_api_key")
        key: Option<String>,
    },

    /// No provider is registered under the requested identifier
    #[error("unknown query engine '{0}'")]
    UnknownProvider(String),

    /// The provider exists but was not enabled at startup (missing credentials)
    #[error("'{0}' engine disabled (check '/get_engine_list' first)")]
    EngineDisabled(String),

    /// No post-processing module is registered under the requested name
    #[error("unknown post-processing module '{0}'")]
    UnknownPostProcessModule(String),

    /// Network error (page fetch or item fetch)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The remote answered, but not with a success status
    #[error("HTTP {status} from {url}")]
    HttpStatus {
        /// The URL that was requested
        url: String,
        /// The status code returned
        status: u16,
    },

    /// A provider answered with a body that does not have the expected shape
    #[error("malformed response from {provider}: {reason}")]
    MalformedResponse {
        /// Provider identifier
        provider: String,
        /// What was wrong with the body
        reason: String,
    },

    /// A per-item or aggregate deadline elapsed
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Image bytes could not be decoded or re-encoded
    #[error("image decode error: {0}")]
    Decode(String),

    /// Post-processing callback failed
    #[error("post-processing callback failed: {0}")]
    Callback(String),

    /// Malformed request from the routing layer
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// API server error
    #[error("API server error: {0}")]
    ApiServerError(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a [`Error::Config`] tied to a configuration key
    pub fn config(message: impl Into<String>, key: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}

impl From<image::ImageError> for Error {
    fn from(e: image::ImageError) -> Self {
        Error::Decode(e.to_string())
    }
}

/// API error response format
///
/// # Example JSON Response
///
/// ```json
/// {
///   "error": {
///     "code": "engine_disabled",
///     "message": "'bing_api' engine disabled (check '/get_engine_list' first)",
///     "details": {
///       "engine": "bing_api"
///     }
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// The error details
    pub error: ErrorDetail,
}

/// Detailed error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "engine_disabled", "invalid_request")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    /// Create an "internal server error"
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("internal_error", message)
    }
}

/// Convert errors to HTTP status codes for API responses
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - rejected before dispatch
            Error::Config { .. } => 400,
            Error::UnknownProvider(_) => 400,
            Error::EngineDisabled(_) => 400,
            Error::UnknownPostProcessModule(_) => 400,
            Error::InvalidRequest(_) => 400,

            // 422 Unprocessable Entity - item content problems
            Error::Decode(_) => 422,
            Error::Callback(_) => 422,

            // 502 Bad Gateway - upstream failures
            Error::Network(_) => 502,
            Error::HttpStatus { .. } => 502,
            Error::MalformedResponse { .. } => 502,

            // 504 Gateway Timeout
            Error::Timeout(_) => 504,

            // 500 Internal Server Error
            Error::Io(_) => 500,
            Error::Serialization(_) => 500,
            Error::ApiServerError(_) => 500,
            Error::Other(_) => 500,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::UnknownProvider(_) => "unknown_engine",
            Error::EngineDisabled(_) => "engine_disabled",
            Error::UnknownPostProcessModule(_) => "unknown_postproc_module",
            Error::Network(_) => "network_error",
            Error::HttpStatus { .. } => "upstream_status",
            Error::MalformedResponse { .. } => "malformed_response",
            Error::Timeout(_) => "timeout",
            Error::Decode(_) => "decode_error",
            Error::Callback(_) => "callback_error",
            Error::InvalidRequest(_) => "invalid_request",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
            Error::ApiServerError(_) => "api_server_error",
            Error::Other(_) => "internal_error",
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let code = error.error_code().to_string();
        let message = error.to_string();

        let details = match &error {
            Error::Config { key: Some(key), .. } => Some(serde_json::json!({ "key": key })),
            Error::UnknownProvider(engine) | Error::EngineDisabled(engine) => {
                Some(serde_json::json!({ "engine": engine }))
            }
            Error::UnknownPostProcessModule(module) => {
                Some(serde_json::json!({ "module": module }))
            }
            Error::HttpStatus { url, status } => Some(serde_json::json!({
                "url": url,
                "status": status,
            })),
            Error::Timeout(d) => Some(serde_json::json!({ "timeout_secs": d.as_secs_f64() })),
            _ => None,
        };

        ApiError {
            error: ErrorDetail {
                code,
                message,
                details,
            },
        }
    }
}
