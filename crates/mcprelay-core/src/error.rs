//! Unified core error type - no_std compatible.
//!
//! This module provides a single error type [`CoreError`] for the wire and
//! protocol layers, mapping directly onto the JSON-RPC error code ranges
//! defined in [`crate::jsonrpc::JsonRpcErrorCode`].
//!
//! `rich-errors` (std-only) adds UUID tracking and a timestamp for
//! observability; the default no_std build carries only kind and message.

use alloc::string::String;
use core::fmt;
use serde::{Deserialize, Serialize};

/// Result type alias for core operations.
pub type CoreResult<T> = core::result::Result<T, CoreError>;

/// Unified error type shared by the wire, transport, and protocol layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreError {
    /// Unique error ID for tracing (only with `rich-errors` feature).
    #[cfg(feature = "rich-errors")]
    pub id: uuid::Uuid,
    /// Error classification.
    pub kind: ErrorKind,
    /// Human-readable error message.
    pub message: String,
    /// Timestamp when the error occurred (only with `rich-errors` feature).
    #[cfg(feature = "rich-errors")]
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Error classification for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Parse error (-32700): payload was not valid JSON.
    ParseError,
    /// Invalid request (-32600): valid JSON but not a recognizable envelope.
    InvalidRequest,
    /// Method not found (-32601).
    MethodNotFound,
    /// Invalid params (-32602).
    InvalidParams,
    /// Internal error (-32603).
    Internal,
    /// The underlying transport failed or was closed.
    Transport,
    /// A request-level or maximum-total deadline elapsed.
    Timeout,
    /// The operation was cancelled cooperatively.
    Cancelled,
}

impl CoreError {
    /// Create a new error with kind and message.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            #[cfg(feature = "rich-errors")]
            id: uuid::Uuid::new_v4(),
            kind,
            message: message.into(),
            #[cfg(feature = "rich-errors")]
            timestamp: chrono::Utc::now(),
        }
    }

    /// Create a parse error.
    #[must_use]
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ParseError, message)
    }

    /// Create an invalid request error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message)
    }

    /// Create a method not found error.
    #[must_use]
    pub fn method_not_found(method: impl Into<String>) -> Self {
        let method = method.into();
        Self::new(
            ErrorKind::MethodNotFound,
            alloc::format!("Method not found: {}", method),
        )
    }

    /// Create an invalid params error.
    #[must_use]
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidParams, message)
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Create a transport error.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, message)
    }

    /// Create a timeout error.
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// Create a cancelled error.
    #[must_use]
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    /// Get the error ID (only available with `rich-errors` feature).
    #[cfg(feature = "rich-errors")]
    #[must_use]
    pub const fn id(&self) -> uuid::Uuid {
        self.id
    }

    /// Map this error's kind onto a JSON-RPC error code.
    #[must_use]
    pub const fn rpc_code(&self) -> i32 {
        match self.kind {
            ErrorKind::ParseError => -32700,
            ErrorKind::InvalidRequest => -32600,
            ErrorKind::MethodNotFound => -32601,
            ErrorKind::InvalidParams => -32602,
            ErrorKind::Internal | ErrorKind::Transport | ErrorKind::Timeout | ErrorKind::Cancelled => -32603,
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for CoreError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_code_mapping() {
        assert_eq!(CoreError::parse_error("x").rpc_code(), -32700);
        assert_eq!(CoreError::method_not_found("foo").rpc_code(), -32601);
    }

    #[test]
    fn test_message_formatting() {
        let err = CoreError::internal("boom");
        assert!(err.message.contains("boom"));
    }
}
