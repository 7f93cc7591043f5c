//! # mcprelay-core
//!
//! Wire-level MCP primitives - `no_std` compatible.
//!
//! This crate provides the foundational types shared by every other crate in
//! the workspace: JSON-RPC 2.0 envelopes, request/progress identifiers, the
//! handshake types exchanged during `initialize`, and the unified error type.
//! Concrete MCP domain schemas (tools, prompts, resources, sampling,
//! elicitation) are out of scope here and travel as opaque `serde_json::Value`
//! bodies through the higher layers.
//!
//! ## Features
//!
//! - `std` (default): richer error types via the standard library.
//! - `rich-errors`: UUID-based error tracking and timestamps (requires `std`).
//!
//! ## Module Organization
//!
//! - [`jsonrpc`]: JSON-RPC 2.0 envelope types.
//! - [`progress`]: the progress-token type and its zero-is-valid invariant.
//! - [`types`]: capability and handshake types for the session layer.
//! - [`error`]: the unified error type.

#![cfg_attr(not(feature = "std"), no_std)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]
#![cfg_attr(docsrs, feature(doc_cfg))]

extern crate alloc;

pub mod error;
pub mod jsonrpc;
pub mod progress;
pub mod types;

pub use error::{CoreError, CoreResult, ErrorKind};
pub use jsonrpc::{
    JSONRPC_VERSION, JsonRpcError, JsonRpcErrorCode, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, JsonRpcVersion, RequestId, ResponseId,
};
pub use progress::ProgressToken;

/// Chronological, officially supported protocol versions, oldest first.
pub const SUPPORTED_VERSIONS: &[&str] = &["2024-11-05", "2025-03-26", "2025-06-18", "2025-11-25"];

/// Latest protocol version, used when a client requests an unsupported one.
pub const LATEST_PROTOCOL_VERSION: &str = "2025-11-25";

/// First protocol version that disables batch POSTs on the streaming HTTP transport.
pub const BATCH_DISABLED_SINCE: &str = "2025-06-18";

/// First protocol version that emits a priming event after SSE replay.
pub const PRIMING_EVENT_SINCE: &str = "2025-11-25";

/// Protocol method names used by the session layer.
pub mod methods {
    /// Initialize handshake method.
    pub const INITIALIZE: &str = "initialize";
    /// Initialized notification method.
    pub const INITIALIZED: &str = "notifications/initialized";
    /// Liveness check, always permitted even before initialize.
    pub const PING: &str = "ping";
    /// Progress notification method.
    pub const PROGRESS: &str = "notifications/progress";
    /// Cancellation notification method.
    pub const CANCELLED: &str = "notifications/cancelled";
    /// Set logging level method.
    pub const SET_LEVEL: &str = "logging/setLevel";
}

/// JSON-RPC and MCP error codes (standard ranges plus MCP extensions).
pub mod error_codes {
    /// Parse error (-32700).
    pub const PARSE_ERROR: i32 = -32700;
    /// Invalid request (-32600).
    pub const INVALID_REQUEST: i32 = -32600;
    /// Method not found (-32601).
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid params (-32602).
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal error (-32603).
    pub const INTERNAL_ERROR: i32 = -32603;
    /// URL elicitation required (-32042); `data.elicitations` required.
    pub const URL_ELICITATION_REQUIRED: i32 = -32042;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_constants() {
        assert_eq!(LATEST_PROTOCOL_VERSION, "2025-11-25");
        assert!(SUPPORTED_VERSIONS.contains(&LATEST_PROTOCOL_VERSION));
        assert_eq!(*SUPPORTED_VERSIONS.last().unwrap(), LATEST_PROTOCOL_VERSION);
    }
}
