//! # mcprelay-wire
//!
//! JSON-RPC 2.0 envelope codec for the MCP wire format.
//!
//! Parses and serializes the envelope shapes carried over every transport:
//! request, response (success/error), notification, and ordered batches of
//! any of those. `decode` never fails on well-formed JSON that merely isn't
//! a recognizable envelope: it classifies such payloads as
//! [`DecodedFrame::Unknown`] so callers can route them to
//! `handleUnknownMessage` instead of treating them as malformed input.

#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

mod envelope;
mod error;

pub use envelope::{BatchElement, DecodedFrame, Envelope, decode};
pub use error::WireError;

pub use mcprelay_core::jsonrpc::{
    JSONRPC_VERSION, JsonRpcError, JsonRpcErrorCode, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, JsonRpcResponsePayload, JsonRpcVersion, RequestId, ResponseId,
};
pub use mcprelay_core::progress::ProgressToken;
