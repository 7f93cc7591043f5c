//! Transport error types.

use thiserror::Error;

use crate::config::LimitsConfig;

/// A specialized `Result` type for transport operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Represents errors that can occur during transport operations.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum TransportError {
    /// Failed to establish a connection.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// An established connection was lost.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// Failed to send a message.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Failed to receive a message.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// The operation did not complete within the configured timeout.
    #[error("operation timed out")]
    Timeout,

    /// The transport was configured with invalid parameters.
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// This endpoint attempted to send a request over a transport that
    /// cannot deliver it (see `TransportCapabilities::supports_server_to_client_requests`).
    #[error("stateless mode: this transport cannot carry a request in this direction")]
    StatelessMode,

    /// An underlying I/O error occurred.
    #[error("io error: {0}")]
    Io(String),

    /// An unexpected internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),

    /// Request size exceeds the configured maximum limit.
    #[error("request size ({size} bytes) exceeds maximum allowed ({max} bytes)")]
    RequestTooLarge {
        /// The actual size of the request in bytes
        size: usize,
        /// The maximum allowed size in bytes
        max: usize,
    },

    /// Response size exceeds the configured maximum limit.
    #[error("response size ({size} bytes) exceeds maximum allowed ({max} bytes)")]
    ResponseTooLarge {
        /// The actual size of the response in bytes
        size: usize,
        /// The maximum allowed size in bytes
        max: usize,
    },
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Validates that a request message size does not exceed the configured limit.
pub fn validate_request_size(size: usize, limits: &LimitsConfig) -> TransportResult<()> {
    if let Some(max_size) = limits.max_request_size
        && size > max_size
    {
        return Err(TransportError::RequestTooLarge {
            size,
            max: max_size,
        });
    }
    Ok(())
}

/// Validates that a response message size does not exceed the configured limit.
pub fn validate_response_size(size: usize, limits: &LimitsConfig) -> TransportResult<()> {
    if let Some(max_size) = limits.max_response_size
        && size > max_size
    {
        return Err(TransportError::ResponseTooLarge {
            size,
            max: max_size,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_size_validation() {
        let limits = LimitsConfig::default();
        assert!(validate_request_size(1000, &limits).is_ok());
        assert!(validate_request_size(10 * 1024 * 1024, &limits).is_err());
    }

    #[test]
    fn test_response_size_validation() {
        let limits = LimitsConfig::default();
        assert!(validate_response_size(1000, &limits).is_ok());
        assert!(validate_response_size(50 * 1024 * 1024, &limits).is_err());
    }

    #[test]
    fn test_unlimited_config() {
        let limits = LimitsConfig::unlimited();
        assert!(validate_request_size(100 * 1024 * 1024, &limits).is_ok());
        assert!(validate_response_size(100 * 1024 * 1024, &limits).is_ok());
    }
}
