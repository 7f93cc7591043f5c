//! Session and handshake types - no_std compatible.
//!
//! Concrete MCP domain schemas (tools, prompts, resources, sampling,
//! elicitation) are out of scope for this layer and are carried as opaque
//! `serde_json::Value` bodies by higher layers.
//!
//! ## Organization
//!
//! - [`core`]: Implementation info and empty-result shape.
//! - [`capabilities`]: Client/server capability advertisement.
//! - [`initialization`]: Handshake request/result/notification types.

pub mod capabilities;
pub mod core;
pub mod initialization;

pub use capabilities::*;
pub use core::*;
pub use initialization::*;
