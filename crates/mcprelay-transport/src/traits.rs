//! Core transport trait.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use mcprelay_wire::RequestId;

use crate::error::TransportResult;
use crate::message::{SendOptions, TransportMessage};
use crate::metrics::TransportMetrics;
use crate::types::{TransportCapabilities, TransportConfig, TransportState, TransportType};

/// The core trait for all transport implementations.
///
/// A transport carries opaque bytes; it has no notion of request/response
/// semantics or pending-call bookkeeping, which live in the protocol engine.
/// `receive` models a stream by being polled repeatedly: each call resolves
/// to the next message, and `Ok(None)` means the stream has ended.
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Returns the type of this transport.
    fn transport_type(&self) -> TransportType;

    /// Returns the capabilities of this transport.
    fn capabilities(&self) -> &TransportCapabilities;

    /// Returns the current state of the transport.
    fn state(&self) -> Pin<Box<dyn Future<Output = TransportState> + Send + '_>>;

    /// Establishes a connection to the remote endpoint.
    fn connect(&self) -> Pin<Box<dyn Future<Output = TransportResult<()>> + Send + '_>>;

    /// Closes the connection to the remote endpoint.
    fn disconnect(&self) -> Pin<Box<dyn Future<Output = TransportResult<()>> + Send + '_>>;

    /// Sends a single encoded frame over the transport.
    ///
    /// `options.related_request_id`, when set, lets a multiplexing transport
    /// (the streaming HTTP transport, notably) route the bytes onto the
    /// outgoing channel associated with that request rather than a general
    /// session-wide channel.
    fn send(
        &self,
        bytes: Bytes,
        options: SendOptions,
    ) -> Pin<Box<dyn Future<Output = TransportResult<()>> + Send + '_>>;

    /// Receives a single message from the transport in a non-blocking way.
    ///
    /// Returns `Ok(None)` once the transport's incoming stream has ended.
    fn receive(
        &self,
    ) -> Pin<Box<dyn Future<Output = TransportResult<Option<TransportMessage>>> + Send + '_>>;

    /// Returns whether this transport can deliver a request initiated by
    /// the endpoint that would normally only respond (see
    /// [`TransportCapabilities::supports_server_to_client_requests`]).
    fn supports_server_to_client_requests(&self) -> bool {
        self.capabilities().supports_server_to_client_requests
    }

    /// Returns a snapshot of the transport's current performance metrics.
    fn metrics(&self) -> Pin<Box<dyn Future<Output = TransportMetrics> + Send + '_>>;

    /// Returns `true` if the transport is currently in the `Connected` state.
    fn is_connected(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        Box::pin(async move { matches!(self.state().await, TransportState::Connected) })
    }

    /// Returns the endpoint address or identifier for this transport, if applicable.
    fn endpoint(&self) -> Option<String> {
        None
    }

    /// Applies a new configuration to the transport.
    fn configure(
        &self,
        config: TransportConfig,
    ) -> Pin<Box<dyn Future<Output = TransportResult<()>> + Send + '_>> {
        Box::pin(async move {
            let _ = config;
            Ok(())
        })
    }

    /// Releases whatever per-request response stream this transport may be
    /// holding open for `related_request_id`. A no-op for transports with no
    /// notion of a resource-scoped stream (stdio, in-memory); the streaming
    /// HTTP transport closes the matching SSE subscriber set.
    fn close_response_stream(&self, related_request_id: &RequestId) {
        let _ = related_request_id;
    }

    /// Releases the standalone notification stream, if this transport holds
    /// one open. A no-op outside the streaming HTTP transport.
    fn close_notification_stream(&self) {}
}

/// A factory for creating instances of a specific transport type.
pub trait TransportFactory: Send + Sync + std::fmt::Debug {
    /// Returns the type of transport this factory creates.
    fn transport_type(&self) -> TransportType;

    /// Creates a new transport instance with the given configuration.
    fn create(&self, config: TransportConfig) -> TransportResult<Box<dyn Transport>>;

    /// Returns `true` if this transport is available on the current system.
    fn is_available(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test that traits can be used as trait objects
    fn _test_transport_object(_t: &dyn Transport) {}
    fn _test_factory_object(_t: &dyn TransportFactory) {}
}
