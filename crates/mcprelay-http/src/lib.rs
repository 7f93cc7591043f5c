//! Streaming HTTP/SSE transport for mcprelay (§4.6): the portable
//! session/config/SSE-codec types below are no_std-compatible and usable
//! standalone; [`server`], [`transport`], and [`event_store`] build the
//! actual axum-backed transport on top of them and require `std`.
//!
//! ## no_std support
//!
//! The portable building blocks support `no_std` environments with the
//! `alloc` feature:
//!
//! ```toml
//! [dependencies]
//! mcprelay-http = { version = "0.1", default-features = false, features = ["alloc"] }
//! ```

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "alloc")]
extern crate alloc;

pub mod config;
#[cfg(feature = "std")]
pub mod event_store;
#[cfg(feature = "std")]
pub mod server;
pub mod sse;
#[cfg(feature = "std")]
pub mod transport;
pub mod types;

// Re-export main types
pub use config::StreamableConfig;
#[cfg(feature = "std")]
pub use event_store::{EventStore, EventStoreError, InMemoryEventStore};
#[cfg(feature = "std")]
pub use server::{EngineConfigurator, SessionIdGenerator, SessionLifecycleHook, StreamableHttpServer};
pub use sse::{SseEncoder, SseEvent, SseEventBuilder, SseParser};
#[cfg(feature = "std")]
pub use transport::HttpTransport;
pub use types::{
    HttpMethod, OriginValidation, StreamableError, StreamableRequest, StreamableResponse,
};

/// MCP 2025-11-25 Streamable HTTP header names
pub mod headers {
    /// Session ID header for tracking stateful connections
    pub const MCP_SESSION_ID: &str = "Mcp-Session-Id";

    /// Last event ID header for SSE resumption
    pub const LAST_EVENT_ID: &str = "Last-Event-ID";

    /// Content-Type for JSON responses
    pub const CONTENT_TYPE_JSON: &str = "application/json";

    /// Content-Type for SSE streams
    pub const CONTENT_TYPE_SSE: &str = "text/event-stream";

    /// Accept header value for SSE
    pub const ACCEPT_SSE: &str = "text/event-stream";
}
