//! Error Types
//!
//! Failures are grouped the way the dispatcher handles them: transport
//! problems (connectivity, status, timeout), model availability, and
//! malformed backend payloads. Every variant renders to the message that is
//! handed to error observers.

use thiserror::Error;

/// Errors produced by a [`Transport`](crate::transport::Transport)
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Backend unreachable or the connection broke mid-response
    #[error("connection failed: {0}")]
    Connection(String),

    /// Backend answered with a non-2xx status
    #[error("HTTP {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body text
        body: String,
    },

    /// The request did not finish within its deadline
    #[error("request timed out")]
    Timeout,

    /// Response body could not be decoded
    #[error("invalid response body: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Connection(err.to_string())
        }
    }
}

/// Errors surfaced by the dispatcher
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// Startup probe failed or the dispatcher was never initialized
    #[error("LLM service not available")]
    ServiceUnavailable,

    /// The registry is empty
    #[error("no suitable model available")]
    NoSuitableModel,

    /// No registered model passes the health predicate
    #[error("no healthy model available")]
    NoHealthyModel,

    /// Backend answered with a non-2xx status
    #[error("HTTP {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body text
        body: String,
    },

    /// Backend unreachable
    #[error("connection failed: {0}")]
    Connection(String),

    /// Attempt exceeded its deadline
    #[error("request timed out after {0} ms")]
    Timeout(u64),

    /// Backend reported an explicit error message
    #[error("{0}")]
    Backend(String),

    /// Whole-response reply carried no content and no error
    #[error("empty response")]
    EmptyResponse,

    /// Streamed reply closed before the `done` marker arrived
    #[error("stream ended before completion marker")]
    IncompleteStream,

    /// Backend payload could not be decoded
    #[error("invalid response payload: {0}")]
    Decode(String),

    /// Dispatcher is shutting down
    #[error("dispatcher has shut down")]
    Shutdown,

    /// The request ID is already queued, in flight, or waiting to retry
    #[error("request {0} is already active")]
    DuplicateRequest(String),
}

impl From<TransportError> for DispatchError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Connection(msg) => Self::Connection(msg),
            TransportError::Status { status, body } => Self::Status { status, body },
            // The dispatcher re-labels this with the attempt's deadline
            TransportError::Timeout => Self::Timeout(0),
            TransportError::Decode(msg) => Self::Decode(msg),
        }
    }
}

/// Configuration parsing errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// TOML could not be parsed into a configuration
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}
