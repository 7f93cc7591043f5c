//! The per-session [`Transport`] implementation backing the streaming HTTP
//! transport (§4.6).
//!
//! One [`HttpTransport`] is created per MCP session and lives for the
//! session's whole lifetime, independent of how many physical HTTP
//! connections arrive against it: a POST feeds bytes into [`HttpTransport::deliver`],
//! and the engine's receive loop (driven by [`Transport::receive`]) decodes
//! and dispatches them exactly as it would for any other transport.
//!
//! Outbound bytes are routed by [`SendOptions::related_request_id`] (§4.6,
//! "request routing under connection replacement"): bytes tagged with a
//! request id that has a registered direct waiter go straight back as the
//! synchronous JSON-mode POST response; everything else is appended to the
//! event store under the related request's stream (or the standalone GET
//! stream, for untagged sends) and broadcast to whatever SSE subscribers are
//! currently attached to that stream.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use dashmap::DashMap;
use mcprelay_transport::{
    MessageContext, SendOptions, Transport, TransportCapabilities, TransportMessage,
    TransportMetrics, TransportState, TransportType,
};
use mcprelay_transport::{AtomicMetrics, TransportError, TransportResult};
use mcprelay_wire::RequestId;
use tokio::sync::{Mutex, mpsc, oneshot};

use crate::event_store::{EventStore, STANDALONE_STREAM_ID, StoredEvent, request_stream_id};

fn stream_id_for(related: Option<&RequestId>) -> String {
    match related {
        Some(id) => request_stream_id(&id.to_string()),
        None => STANDALONE_STREAM_ID.to_string(),
    }
}

/// The transport backing one HTTP session.
#[derive(Debug)]
pub struct HttpTransport {
    session_id: String,
    inbox_tx: mpsc::UnboundedSender<Bytes>,
    inbox_rx: Mutex<mpsc::UnboundedReceiver<Bytes>>,
    capabilities: TransportCapabilities,
    connected: AtomicBool,
    metrics: AtomicMetrics,
    event_store: Arc<dyn EventStore>,
    direct_waiters: DashMap<RequestId, oneshot::Sender<Bytes>>,
    subscribers: DashMap<String, Vec<mpsc::UnboundedSender<StoredEvent>>>,
}

impl HttpTransport {
    /// Creates a new session transport. `supports_server_to_client_requests`
    /// should reflect whether this deployment permits a standalone GET
    /// stream at all (sessions enabled); it is fixed at construction since
    /// [`Transport::capabilities`] returns a plain reference.
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        event_store: Arc<dyn EventStore>,
        supports_server_to_client_requests: bool,
    ) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        Self {
            session_id: session_id.into(),
            inbox_tx,
            inbox_rx: Mutex::new(inbox_rx),
            capabilities: TransportCapabilities {
                supports_server_to_client_requests,
                ..TransportCapabilities::default()
            },
            connected: AtomicBool::new(true),
            metrics: AtomicMetrics::new(),
            event_store,
            direct_waiters: DashMap::new(),
            subscribers: DashMap::new(),
        }
    }

    /// Feeds a raw inbound frame (one HTTP POST body) to the engine's
    /// receive loop.
    pub fn deliver(&self, bytes: Bytes) -> Result<(), Bytes> {
        self.inbox_tx.send(bytes).map_err(|e| e.0)
    }

    /// Registers a one-shot waiter for the reply to `id`: used for a POST
    /// the server chose to answer in JSON mode rather than SSE mode. The
    /// next `send` tagged with this id is delivered here instead of the
    /// event store.
    pub fn await_direct_reply(&self, id: RequestId) -> oneshot::Receiver<Bytes> {
        let (tx, rx) = oneshot::channel();
        self.direct_waiters.insert(id, tx);
        rx
    }

    /// Drops a direct-reply registration that was never fulfilled (e.g. the
    /// HTTP client disconnected before the response arrived).
    pub fn cancel_direct_reply(&self, id: &RequestId) {
        self.direct_waiters.remove(id);
    }

    /// Subscribes to the live stream of events for `stream_id`, returning
    /// the receiver end. Used for the standalone GET stream and for a
    /// per-request SSE-mode POST response.
    pub fn subscribe(&self, stream_id: &str) -> mpsc::UnboundedReceiver<StoredEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.entry(stream_id.to_string()).or_default().push(tx);
        rx
    }

    /// Like [`Self::subscribe`], but refuses once `stream_id` already has
    /// `max_streams` live subscribers. Dead subscribers are pruned lazily on
    /// the next broadcast, so a cap here self-heals as old streams close.
    pub fn try_subscribe(
        &self,
        stream_id: &str,
        max_streams: usize,
    ) -> Option<mpsc::UnboundedReceiver<StoredEvent>> {
        let mut subs = self.subscribers.entry(stream_id.to_string()).or_default();
        if subs.len() >= max_streams {
            return None;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        subs.push(tx);
        Some(rx)
    }

    /// The event store backing this session's resumable streams.
    #[must_use]
    pub fn event_store(&self) -> &Arc<dyn EventStore> {
        &self.event_store
    }

    /// This session's id.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn broadcast(&self, stream_id: &str, event: StoredEvent) {
        if let Some(mut subs) = self.subscribers.get_mut(stream_id) {
            subs.retain(|sender| sender.send(event.clone()).is_ok());
        }
    }
}

impl Transport for HttpTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::Http
    }

    fn capabilities(&self) -> &TransportCapabilities {
        &self.capabilities
    }

    fn state(&self) -> Pin<Box<dyn Future<Output = TransportState> + Send + '_>> {
        Box::pin(async move {
            if self.connected.load(Ordering::Acquire) {
                TransportState::Connected
            } else {
                TransportState::Disconnected
            }
        })
    }

    fn connect(&self) -> Pin<Box<dyn Future<Output = TransportResult<()>> + Send + '_>> {
        Box::pin(async move {
            self.connected.store(true, Ordering::Release);
            Ok(())
        })
    }

    fn disconnect(&self) -> Pin<Box<dyn Future<Output = TransportResult<()>> + Send + '_>> {
        Box::pin(async move {
            self.connected.store(false, Ordering::Release);
            Ok(())
        })
    }

    fn send(
        &self,
        bytes: Bytes,
        options: SendOptions,
    ) -> Pin<Box<dyn Future<Output = TransportResult<()>> + Send + '_>> {
        Box::pin(async move {
            if !self.connected.load(Ordering::Acquire) {
                return Err(TransportError::ConnectionLost("session closed".into()));
            }
            self.metrics.bytes_sent.fetch_add(bytes.len() as u64, Ordering::Relaxed);
            self.metrics.messages_sent.fetch_add(1, Ordering::Relaxed);

            if let Some(id) = &options.related_request_id
                && let Some((_, waiter)) = self.direct_waiters.remove(id)
            {
                let _ = waiter.send(bytes);
                return Ok(());
            }

            let stream_id = stream_id_for(options.related_request_id.as_ref());
            let payload = String::from_utf8_lossy(&bytes).into_owned();
            let event = self.event_store.append(&stream_id, "message", payload);
            self.broadcast(&stream_id, event);
            Ok(())
        })
    }

    fn receive(
        &self,
    ) -> Pin<Box<dyn Future<Output = TransportResult<Option<TransportMessage>>> + Send + '_>> {
        Box::pin(async move {
            let mut inbox = self.inbox_rx.lock().await;
            match inbox.recv().await {
                Some(bytes) => {
                    self.metrics
                        .bytes_received
                        .fetch_add(bytes.len() as u64, Ordering::Relaxed);
                    self.metrics.messages_received.fetch_add(1, Ordering::Relaxed);
                    let context = MessageContext {
                        session_id: Some(self.session_id.clone()),
                        ..MessageContext::default()
                    };
                    Ok(Some(TransportMessage::with_context(bytes, context)))
                }
                None => Ok(None),
            }
        })
    }

    fn metrics(&self) -> Pin<Box<dyn Future<Output = TransportMetrics> + Send + '_>> {
        Box::pin(async move { self.metrics.snapshot() })
    }

    fn endpoint(&self) -> Option<String> {
        Some(format!("http+sse://{}", self.session_id))
    }

    fn close_response_stream(&self, related_request_id: &RequestId) {
        self.subscribers.remove(&request_stream_id(&related_request_id.to_string()));
    }

    fn close_notification_stream(&self) {
        self.subscribers.remove(STANDALONE_STREAM_ID);
    }
}
