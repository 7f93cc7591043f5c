//! Core protocol types shared across the engine and session layer.

use alloc::string::String;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::jsonrpc::RequestId;

/// Protocol version string, e.g. `"2025-06-18"`. Treated as an opaque,
/// lexically-ordered token by the engine; the session layer interprets it.
pub type ProtocolVersion = String;

/// Message ID (same representation as `RequestId`).
pub type MessageId = RequestId;

/// Implementation information for MCP clients and servers, exchanged during
/// the initialize handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Implementation {
    /// Implementation name (programmatic identifier).
    pub name: String,
    /// Display title for UI.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Implementation version.
    pub version: String,
}

impl Default for Implementation {
    fn default() -> Self {
        Self {
            name: "unknown".into(),
            title: None,
            version: "0.0.0".into(),
        }
    }
}

impl Implementation {
    /// Create a new implementation info.
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: None,
            version: version.into(),
        }
    }

    /// Set the display title.
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// Base result type for MCP responses that carry no payload of their own,
/// only an optional `_meta`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmptyResult {
    /// Optional metadata.
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub _meta: Option<Value>,
}

impl EmptyResult {
    /// Create a new empty result.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with metadata.
    #[must_use]
    pub fn with_meta(meta: Value) -> Self {
        Self { _meta: Some(meta) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_implementation() {
        let impl_info = Implementation::new("test", "1.0.0").with_title("Test Server");
        assert_eq!(impl_info.name, "test");
        assert_eq!(impl_info.title, Some("Test Server".into()));
    }
}
