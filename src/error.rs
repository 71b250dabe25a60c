//! Error types for offthread
//!
//! This module provides the failure taxonomy for the library:
//! - Cancellation is a first-class outcome, distinct from failure
//! - Network failures are split by cause (connectivity, timeout, remote service, rate limit)
//! - Cache I/O failures are non-fatal at the cache layer and surface here only
//!   when an operation explicitly requires disk state

use thiserror::Error;

/// Result type alias for offthread operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for offthread
///
/// This is the primary error type used throughout the library. Each variant includes
/// contextual information to help diagnose issues.
#[derive(Debug, Error)]
pub enum Error {
    /// Operation was cancelled cooperatively
    ///
    /// Workers translate this into the `Cancelled` terminal status rather than `Failed`.
    #[error("operation cancelled")]
    Cancelled,

    /// No usable network connection (connectivity probe failed)
    #[error("no internet connection: {0}")]
    Connectivity(String),

    /// The host has network access disabled by policy
    #[error("network access is disabled by the host")]
    NetworkDisabled,

    /// Operation timed out
    #[error("operation timed out after {seconds}s")]
    Timeout {
        /// Number of seconds waited before giving up
        seconds: u64,
    },

    /// The remote service returned a non-success status
    #[error("remote service error ({status}): {reason}")]
    RemoteService {
        /// HTTP status code returned by the remote service
        status: u16,
        /// Human-readable description of the failure
        reason: String,
    },

    /// The remote service is rate limiting us
    #[error("rate limited by remote service")]
    RateLimited {
        /// Unix timestamp at which the limit resets, when the service provided one
        reset_at: Option<i64>,
    },

    /// Cache read/write failed
    #[error("cache I/O error: {0}")]
    CacheIo(String),

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "cleanup_target_percent")
        key: Option<String>,
    },

    /// Shutdown in progress - not accepting new tasks
    #[error("shutdown in progress: not accepting new tasks")]
    ShuttingDown,

    /// Task not found
    #[error("task not found: {0}")]
    NotFound(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network transport error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True when this error represents cooperative cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}
