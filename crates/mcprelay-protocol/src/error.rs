//! Protocol engine errors.

use thiserror::Error;

/// A specialized `Result` type for protocol engine operations.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

/// Errors produced by the protocol engine, independent of any one transport.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The underlying transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] mcprelay_transport::TransportError),

    /// Encoding or decoding the wire envelope failed.
    #[error("wire error: {0}")]
    Wire(#[from] mcprelay_wire::WireError),

    /// A request was sent but its deadline elapsed before a response arrived.
    #[error("request timed out after {0:?}")]
    RequestTimeout(std::time::Duration),

    /// A request's `max_total_timeout` cap elapsed, distinct from a plain
    /// per-reset deadline expiry: no number of progress-driven resets would
    /// have saved it.
    #[error("request exceeded its maximum total timeout of {0:?}")]
    MaxTotalTimeoutExceeded(std::time::Duration),

    /// The response channel for a pending request was dropped before a
    /// response or cancellation arrived (explicit cancellation, not a dead
    /// connection).
    #[error("request was dropped before completion")]
    Dropped,

    /// The response channel for a pending request was dropped because the
    /// underlying transport or session tore down while it was in flight.
    #[error("connection closed before the request completed")]
    ConnectionClosed,

    /// `start` was called on an engine whose receive loop is already running.
    #[error("engine is already connected")]
    AlreadyConnected,

    /// The peer returned a JSON-RPC error response.
    #[error("peer error {code}: {message}")]
    PeerError {
        /// JSON-RPC error code.
        code: i32,
        /// Human-readable error message.
        message: String,
    },

    /// A method was invoked before the session finished its initialize
    /// handshake and strict gating is in effect.
    #[error("session not yet initialized: {method} is not permitted before initialize completes")]
    NotInitialized {
        /// The method that was rejected.
        method: String,
    },

    /// The peer's declared capabilities do not cover the attempted operation.
    #[error("capability not supported: {0}")]
    CapabilityNotSupported(String),

    /// This transport cannot carry a request in the attempted direction.
    #[error("stateless mode: cannot send a request over this transport")]
    StatelessMode,

    /// `initialize` was attempted on a session that already completed it.
    #[error("session already initialized")]
    AlreadyInitialized,
}
