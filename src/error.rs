//! Error types for the FaaS worker.
//!
//! All errors are strongly typed using thiserror so callers can tell a
//! worker that never reached the runtime apart from one whose stream failed.

use thiserror::Error;

use crate::trigger::TriggerKind;

/// Errors raised while decoding inbound wire messages.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum DecodeError {
    #[error("Trigger request '{id}' has neither an http nor a topic context")]
    MissingContext {
        id: String,
    },

    #[error("Server message '{id}' has no content")]
    MissingContent {
        id: String,
    },
}

/// Top-level error type for the FaaS worker.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum FaasError {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Trigger payload is not valid JSON: {source}")]
    PayloadDecode {
        #[source]
        source: serde_json::Error,
    },

    #[error("Handler failed: {message}")]
    Handler {
        message: String,
    },

    #[error("Response context is {actual} but the trigger was {expected}")]
    InvariantViolation {
        expected: TriggerKind,
        actual: TriggerKind,
    },

    #[error("Connection refused by runtime at {address}")]
    ConnectionRefused {
        address: String,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("Stream error: {0}")]
    Stream(#[from] tonic::Status),

    #[error("Invalid configuration: {message}")]
    Config {
        message: String,
    },

    #[error("Failed to encode response: {message}")]
    Encode {
        message: String,
    },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl FaasError {
    /// Creates a handler error from anything printable.
    #[must_use]
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if the runtime could not be reached at all.
    #[must_use]
    pub const fn is_connection_refused(&self) -> bool {
        matches!(self, Self::ConnectionRefused { .. })
    }

    /// Returns true if this is a stream failure after the connection was up.
    #[must_use]
    pub const fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }

    /// Returns true if the dispatch loop contains this error per trigger
    /// instead of stopping.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Decode(_) | Self::Handler { .. } | Self::InvariantViolation { .. } | Self::Encode { .. }
        )
    }
}

/// Result type alias for worker operations.
pub type FaasResult<T> = Result<T, FaasError>;
