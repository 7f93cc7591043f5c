//! Core transport types.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{LimitsConfig, TimeoutConfig};

/// Enumerates the transport implementations shipped with this runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
    /// Line-delimited JSON-RPC over standard input/output.
    Stdio,
    /// Streaming HTTP with Server-Sent Events (the `/mcp` endpoint).
    Http,
    /// An in-memory paired transport, for same-process client/server pairing and tests.
    Memory,
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdio => write!(f, "stdio"),
            Self::Http => write!(f, "http"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

/// Represents the current state of a transport connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportState {
    /// The transport is not connected.
    Disconnected,
    /// The transport is in the process of connecting.
    Connecting,
    /// The transport is connected and ready to send/receive messages.
    Connected,
    /// The transport is in the process of disconnecting.
    Disconnecting,
    /// The transport has encountered an unrecoverable error.
    Failed {
        /// A description of the failure reason.
        reason: String,
    },
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnecting => write!(f, "disconnecting"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

/// Describes the capabilities of a transport implementation.
///
/// `supports_server_to_client_requests` is the flag the session layer
/// consults to reject server-initiated requests over a transport that
/// cannot carry them (StatelessMode): a plain request/response HTTP POST
/// without an accompanying SSE stream cannot deliver a request the other
/// way, while the in-memory, stdio, and streaming-HTTP transports can.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportCapabilities {
    /// The maximum message size in bytes that the transport can handle.
    pub max_message_size: Option<usize>,

    /// Whether this transport can deliver a request initiated by the
    /// opposite endpoint (server-to-client, or client-to-server for a
    /// server-side transport).
    pub supports_server_to_client_requests: bool,

    /// A map for any other custom capabilities.
    pub custom: HashMap<String, serde_json::Value>,
}

impl Default for TransportCapabilities {
    fn default() -> Self {
        Self {
            max_message_size: Some(4 * 1024 * 1024),
            supports_server_to_client_requests: true,
            custom: HashMap::new(),
        }
    }
}

/// Configuration for a transport instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// The type of the transport.
    pub transport_type: TransportType,

    /// The maximum time to wait for a connection to be established.
    pub connect_timeout: Duration,

    /// The interval for sending keep-alive messages to maintain the connection.
    pub keep_alive: Option<Duration>,

    /// Size limits for requests and responses.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Timeout configuration for operations.
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// A map for any other custom configuration.
    pub custom: HashMap<String, serde_json::Value>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            transport_type: TransportType::Stdio,
            connect_timeout: Duration::from_secs(30),
            keep_alive: None,
            limits: LimitsConfig::default(),
            timeouts: TimeoutConfig::default(),
            custom: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_type_display() {
        assert_eq!(TransportType::Stdio.to_string(), "stdio");
        assert_eq!(TransportType::Http.to_string(), "http");
        assert_eq!(TransportType::Memory.to_string(), "memory");
    }

    #[test]
    fn test_transport_state_display() {
        assert_eq!(TransportState::Connected.to_string(), "connected");
        assert_eq!(TransportState::Disconnected.to_string(), "disconnected");
        assert_eq!(
            TransportState::Failed {
                reason: "timeout".to_string()
            }
            .to_string(),
            "failed: timeout"
        );
    }

    #[test]
    fn test_transport_capabilities_default() {
        let caps = TransportCapabilities::default();
        assert!(caps.supports_server_to_client_requests);
    }

    #[test]
    fn test_transport_config_default() {
        let config = TransportConfig::default();
        assert_eq!(config.transport_type, TransportType::Stdio);
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
    }
}
