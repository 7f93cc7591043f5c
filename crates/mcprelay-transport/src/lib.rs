//! # mcprelay-transport
//!
//! The transport abstraction: bytes in, bytes out. A transport carries no
//! request/response bookkeeping of its own - that lives in the protocol
//! engine - but does expose [`TransportCapabilities::supports_server_to_client_requests`]
//! so the session layer can reject a server-initiated request over a
//! transport that has no way to deliver it.
//!
//! Two concrete transports ship here: [`memory::MemoryTransport`], an
//! in-memory paired transport for same-process pairing and tests, and
//! [`stdio::StdioTransport`], a line-delimited transport over the process's
//! stdin/stdout. The streaming HTTP/SSE transport lives in `mcprelay-http`,
//! which depends on this crate for the `Transport` trait itself.

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

mod config;
mod error;
mod events;
mod memory;
mod message;
mod metrics;
mod stdio;
mod traits;
mod types;

pub use config::{LimitsConfig, TimeoutConfig};
pub use error::{TransportError, TransportResult, validate_request_size, validate_response_size};
pub use events::{TransportEvent, TransportEventEmitter};
pub use memory::MemoryTransport;
pub use message::{MessageContext, SendOptions, TransportMessage};
pub use metrics::{AtomicMetrics, TransportMetrics};
pub use stdio::StdioTransport;
pub use traits::{Transport, TransportFactory};
pub use types::{TransportCapabilities, TransportConfig, TransportState, TransportType};
