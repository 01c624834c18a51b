//! Error Handling Infrastructure
//!
//! This module defines all error types used throughout CloudOps.
//! All errors are structured and map to specific error codes for JSON output.
//!
//! # Error Categories
//! - `ConfigError` / `IncompleteProvider`: configuration problems, raised eagerly
//!   while a connection is being built
//! - `InvalidInput`: malformed query requests
//! - `QueryFailed`: query execution errors reported by the engine
//! - `EngineError`: engine- or adapter-specific errors
//! - `ConnectionClosed`: operation attempted on a closed connection
//!
//! Cache faults live in [`CacheError`]. They are absorbed inside the cache path
//! and never surface to a query caller.

use thiserror::Error;

/// Main error type for CloudOps operations
#[derive(Error, Debug, Clone)]
pub enum CloudOpsError {
    /// Configuration error (unknown provider, nothing configured, ...)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A provider has some but not all of its required fields
    #[error("Configuration error: provider '{provider}' is missing required fields: {}", missing.join(", "))]
    IncompleteProvider { provider: String, missing: Vec<String> },

    /// Invalid input or missing required parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Query execution failed
    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    /// Engine-specific error, passed through unchanged
    #[error("Engine error ({engine}): {detail}")]
    EngineError { engine: String, detail: String },

    /// The owning connection was closed
    #[error("Connection is closed")]
    ConnectionClosed,
}

impl CloudOpsError {
    /// Convert error to error code string for JSON output
    ///
    /// Error codes are stable and suitable for programmatic handling.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::ConfigError(_) | Self::IncompleteProvider { .. } => "CONFIG_ERROR",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::QueryFailed(_) => "QUERY_FAILED",
            Self::EngineError { .. } => "ENGINE_ERROR",
            Self::ConnectionClosed => "CONNECTION_CLOSED",
        }
    }

    /// Get human-readable error message
    ///
    /// Never contains credential values; configuration errors name fields, not values.
    #[must_use]
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Create a configuration error
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }

    /// Create an incomplete-provider error
    pub fn incomplete_provider(provider: impl Into<String>, missing: Vec<String>) -> Self {
        Self::IncompleteProvider { provider: provider.into(), missing }
    }

    /// Create an invalid input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Create a query failed error
    pub fn query_failed(message: impl Into<String>) -> Self {
        Self::QueryFailed(message.into())
    }

    /// Create an engine-specific error
    pub fn engine_error(engine: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::EngineError { engine: engine.into(), detail: detail.into() }
    }
}

/// Result type alias for CloudOps operations
pub type Result<T> = std::result::Result<T, CloudOpsError>;

/// Internal cache faults
///
/// Every variant degrades to a cache miss followed by direct execution.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The connection owning this cache handle was closed
    #[error("cache handle used after its connection was closed")]
    Closed,
}
