//! Resumable-stream event storage (§4.6).
//!
//! Every outbound SSE `data:` frame is appended here before it is written to
//! the wire, so a client that drops and reconnects with `Last-Event-ID` can
//! replay everything it missed on the same logical stream. A stream is
//! identified by the standalone-GET stream id (stable per session, e.g.
//! [`STANDALONE_STREAM_ID`]) or a per-request stream id synthesized from the
//! originating request's id.
//!
//! Priming events (empty payload, written after a replay completes so the
//! client has a fresh `Last-Event-ID` to resume from) are stored like any
//! other event but never replayed themselves.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

/// The stream id used for the standalone GET SSE stream, as opposed to a
/// per-request stream synthesized from a request id.
pub const STANDALONE_STREAM_ID: &str = "_GET_stream";

/// Builds the stream id for the SSE stream carrying responses/notifications
/// related to a single POST request.
#[must_use]
pub fn request_stream_id(request_id: &str) -> String {
    format!("_request_{request_id}")
}

/// One stored SSE frame: the event id assigned on append, the stream it
/// belongs to, its SSE `event:` type, and its `data:` payload.
#[derive(Debug, Clone)]
pub struct StoredEvent {
    /// Event id assigned on append, unique within the store.
    pub id: String,
    /// The stream this event belongs to.
    pub stream_id: String,
    /// SSE event type (`"message"` for ordinary JSON-RPC traffic).
    pub event_type: String,
    /// SSE payload. A priming event carries an empty string here.
    pub data: String,
}

impl StoredEvent {
    /// A priming event carries no payload; this is how replay tells it
    /// apart from real data when deciding what to skip.
    fn is_priming(&self) -> bool {
        self.data.is_empty()
    }
}

/// Failure modes for event-store operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EventStoreError {
    /// `Last-Event-ID` did not match any stored event.
    #[error("unknown event id: {0}")]
    UnknownEventId(String),
}

/// Storage for resumable SSE streams.
///
/// Implementations must be safe for concurrent append and replay (§5): the
/// default [`InMemoryEventStore`] serializes both behind a single lock.
pub trait EventStore: Send + Sync + std::fmt::Debug {
    /// Appends an event to `stream_id`, assigning it a fresh event id.
    fn append(&self, stream_id: &str, event_type: &str, data: String) -> StoredEvent;

    /// Appends a priming event (empty payload) to `stream_id`.
    fn prime(&self, stream_id: &str) -> StoredEvent {
        self.append(stream_id, "message", String::new())
    }

    /// Replays every event strictly after `event_id`, skipping priming
    /// events, calling `emit` for each in order. Returns the stream id the
    /// anchor event belonged to, or `UnknownEventId` if no stored event has
    /// that id.
    fn replay_after(
        &self,
        event_id: &str,
        emit: &mut dyn FnMut(&StoredEvent),
    ) -> Result<String, EventStoreError>;
}

/// The default event store: an in-process append-only log per stream,
/// capped at `max_events_per_stream` entries (oldest dropped first).
#[derive(Debug)]
pub struct InMemoryEventStore {
    streams: RwLock<HashMap<String, Vec<StoredEvent>>>,
    next_id: AtomicU64,
    max_events_per_stream: usize,
}

impl InMemoryEventStore {
    /// Creates a store retaining up to `max_events_per_stream` events per
    /// stream before evicting the oldest.
    #[must_use]
    pub fn new(max_events_per_stream: usize) -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            max_events_per_stream,
        }
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl EventStore for InMemoryEventStore {
    fn append(&self, stream_id: &str, event_type: &str, data: String) -> StoredEvent {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let event = StoredEvent {
            id,
            stream_id: stream_id.to_string(),
            event_type: event_type.to_string(),
            data,
        };

        let mut streams = self.streams.write();
        let log = streams.entry(stream_id.to_string()).or_default();
        log.push(event.clone());
        if log.len() > self.max_events_per_stream {
            log.remove(0);
        }
        event
    }

    fn replay_after(
        &self,
        event_id: &str,
        emit: &mut dyn FnMut(&StoredEvent),
    ) -> Result<String, EventStoreError> {
        let streams = self.streams.read();
        for log in streams.values() {
            let Some(position) = log.iter().position(|e| e.id == event_id) else {
                continue;
            };
            let stream_id = log[position].stream_id.clone();
            for event in &log[position + 1..] {
                if !event.is_priming() {
                    emit(event);
                }
            }
            return Ok(stream_id);
        }
        Err(EventStoreError::UnknownEventId(event_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replay_yields_only_entries_strictly_after_the_anchor() {
        let store = InMemoryEventStore::default();
        let e0 = store.append(STANDALONE_STREAM_ID, "message", "one".into());
        store.append(STANDALONE_STREAM_ID, "message", "two".into());
        store.append(STANDALONE_STREAM_ID, "message", "three".into());

        let mut seen = Vec::new();
        let stream_id = store
            .replay_after(&e0.id, &mut |event| seen.push(event.data.clone()))
            .unwrap();

        assert_eq!(stream_id, STANDALONE_STREAM_ID);
        assert_eq!(seen, vec!["two".to_string(), "three".to_string()]);
    }

    #[test]
    fn replay_skips_priming_events() {
        let store = InMemoryEventStore::default();
        let e0 = store.append(STANDALONE_STREAM_ID, "message", "one".into());
        store.prime(STANDALONE_STREAM_ID);
        store.append(STANDALONE_STREAM_ID, "message", "two".into());

        let mut seen = Vec::new();
        store
            .replay_after(&e0.id, &mut |event| seen.push(event.data.clone()))
            .unwrap();

        assert_eq!(seen, vec!["two".to_string()]);
    }

    #[test]
    fn unknown_anchor_fails() {
        let store = InMemoryEventStore::default();
        store.append(STANDALONE_STREAM_ID, "message", "one".into());
        let err = store
            .replay_after("does-not-exist", &mut |_| {})
            .unwrap_err();
        assert!(matches!(err, EventStoreError::UnknownEventId(_)));
    }

    #[test]
    fn streams_are_isolated_from_each_other() {
        let store = InMemoryEventStore::default();
        let req_stream = request_stream_id("7");
        let a0 = store.append(STANDALONE_STREAM_ID, "message", "standalone".into());
        store.append(&req_stream, "message", "per-request".into());

        let mut seen = Vec::new();
        let stream_id = store
            .replay_after(&a0.id, &mut |event| seen.push(event.data.clone()))
            .unwrap();

        assert_eq!(stream_id, STANDALONE_STREAM_ID);
        assert!(seen.is_empty());
    }

    #[test]
    fn evicts_oldest_once_capacity_is_exceeded() {
        let store = InMemoryEventStore::new(2);
        store.append(STANDALONE_STREAM_ID, "message", "one".into());
        let e1 = store.append(STANDALONE_STREAM_ID, "message", "two".into());
        store.append(STANDALONE_STREAM_ID, "message", "three".into());

        // "one" was evicted, so replaying from e1 still works and only yields "three".
        let mut seen = Vec::new();
        store
            .replay_after(&e1.id, &mut |event| seen.push(event.data.clone()))
            .unwrap();
        assert_eq!(seen, vec!["three".to_string()]);
    }
}
