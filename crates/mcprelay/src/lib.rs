//! A bidirectional Model Context Protocol runtime (§1): symmetric
//! [`Client`] and [`Server`] endpoints built from the lower `mcprelay-*`
//! crates, over any [`Transport`](mcprelay_transport::Transport):
//! in-memory, stdio, or the streaming HTTP/SSE transport in
//! [`mcprelay_http`].
//!
//! Both endpoints share the same protocol engine (`mcprelay-protocol`):
//! the only difference between a `Client` and a `Server` is which side of
//! the `initialize` handshake they drive and which handlers they register.
//! Handlers are plain `async` closures taking `(Option<Value>,
//! RequestContext)`, thanks to the blanket [`RequestHandler`]/
//! [`NotificationHandler`] impls in `mcprelay-protocol`.

mod client;
mod server;

pub use client::Client;
pub use server::{Server, ServerBuilder};

pub use mcprelay_core::types::{ClientCapabilities, Implementation, ServerCapabilities};
pub use mcprelay_protocol::{
    GatingMode, NotificationHandler, ProtocolError, RequestContext, RequestHandler,
    RequestOptions, SessionConfig,
};
pub use mcprelay_transport::Transport;

/// This crate's error type: every fallible operation on [`Client`] or
/// [`Server`] bottoms out in either the protocol engine or a malformed
/// peer payload.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The protocol engine, transport, or session layer failed.
    #[error(transparent)]
    Protocol(#[from] mcprelay_protocol::ProtocolError),

    /// A handshake or call payload did not match the expected JSON shape.
    #[error("malformed payload: {0}")]
    Serde(#[from] serde_json::Error),
}

/// This crate's `Result` alias.
pub type Result<T> = std::result::Result<T, Error>;
