//! The pending-request table: one outstanding oneshot per in-flight call.
//!
//! Invariants upheld here:
//! - a request id is registered at most once at a time (re-registering an id
//!   still in the table replaces its sender, dropping the old receiver's
//!   sender and causing that caller to observe `Dropped`)
//! - `resolve` consumes the registration; a second response for the same id
//!   (a misbehaving peer) is simply ignored rather than resolving twice
//! - dropping the table (engine shutdown) drops every sender, which wakes
//!   every waiting caller with a recv error rather than hanging forever

use dashmap::DashMap;
use mcprelay_wire::{JsonRpcResponse, RequestId};
use tokio::sync::oneshot;

/// Tracks in-flight requests awaiting a correlated response.
#[derive(Debug, Default)]
pub struct PendingRequests {
    inner: DashMap<RequestId, oneshot::Sender<JsonRpcResponse>>,
}

impl PendingRequests {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `id` as in-flight and returns the receiver that will carry
    /// its response.
    pub fn register(&self, id: RequestId) -> oneshot::Receiver<JsonRpcResponse> {
        let (tx, rx) = oneshot::channel();
        self.inner.insert(id, tx);
        rx
    }

    /// Delivers a response to the caller waiting on `id`.
    ///
    /// Returns `true` if a registration existed and the receiver was still
    /// alive to accept it.
    pub fn resolve(&self, id: &RequestId, response: JsonRpcResponse) -> bool {
        self.inner
            .remove(id)
            .is_some_and(|(_, tx)| tx.send(response).is_ok())
    }

    /// Removes a registration without resolving it, e.g. on cancellation.
    /// Dropping the sender wakes the waiting receiver with a recv error.
    pub fn cancel(&self, id: &RequestId) -> bool {
        self.inner.remove(id).is_some()
    }

    /// Number of requests currently in flight.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether no requests are currently in flight.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Drops every pending registration, waking every waiter with a recv
    /// error. Used at session teardown so no caller is left hanging when
    /// the connection closes.
    pub fn fail_all(&self) {
        self.inner.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcprelay_wire::JsonRpcError;

    fn ok_response(id: RequestId) -> JsonRpcResponse {
        JsonRpcResponse::success(serde_json::json!({"ok": true}), id)
    }

    #[tokio::test]
    async fn resolves_the_waiting_receiver() {
        let table = PendingRequests::new();
        let rx = table.register(RequestId::Number(1));
        assert!(table.resolve(&RequestId::Number(1), ok_response(RequestId::Number(1))));
        let response = rx.await.unwrap();
        assert!(response.is_success());
    }

    #[tokio::test]
    async fn resolving_an_unregistered_id_is_a_noop() {
        let table = PendingRequests::new();
        assert!(!table.resolve(&RequestId::Number(99), ok_response(RequestId::Number(99))));
    }

    #[tokio::test]
    async fn cancel_wakes_the_receiver_with_an_error() {
        let table = PendingRequests::new();
        let rx = table.register(RequestId::Number(2));
        assert!(table.cancel(&RequestId::Number(2)));
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn second_response_for_same_id_is_ignored() {
        let table = PendingRequests::new();
        let rx = table.register(RequestId::Number(3));
        assert!(table.resolve(&RequestId::Number(3), ok_response(RequestId::Number(3))));
        // id no longer registered: the second "response" from a misbehaving peer is dropped
        let error = JsonRpcError::internal_error("late");
        assert!(!table.resolve(
            &RequestId::Number(3),
            JsonRpcResponse::error_response(error, RequestId::Number(3))
        ));
        assert!(rx.await.unwrap().is_success());
    }
}
