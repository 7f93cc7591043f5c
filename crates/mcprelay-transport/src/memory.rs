//! An in-memory paired transport.
//!
//! [`MemoryTransport::pair`] returns two endpoints wired directly to each
//! other with a channel in each direction. Used for same-process
//! client/server pairing and in tests that exercise the protocol engine
//! without a real network or process boundary.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use tokio::sync::{Mutex, mpsc};

use crate::error::{TransportError, TransportResult};
use crate::message::{MessageContext, SendOptions, TransportMessage};
use crate::metrics::{AtomicMetrics, TransportMetrics};
use crate::traits::Transport;
use crate::types::{TransportCapabilities, TransportState};

/// One end of an in-memory paired transport.
#[derive(Debug)]
pub struct MemoryTransport {
    outbox: mpsc::UnboundedSender<Bytes>,
    inbox: Mutex<mpsc::UnboundedReceiver<Bytes>>,
    capabilities: TransportCapabilities,
    connected: AtomicBool,
    metrics: AtomicMetrics,
}

impl MemoryTransport {
    /// Creates two endpoints connected to each other.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();

        let capabilities = TransportCapabilities {
            supports_server_to_client_requests: true,
            ..TransportCapabilities::default()
        };

        let a = Self {
            outbox: tx_b,
            inbox: Mutex::new(rx_a),
            capabilities: capabilities.clone(),
            connected: AtomicBool::new(true),
            metrics: AtomicMetrics::new(),
        };
        let b = Self {
            outbox: tx_a,
            inbox: Mutex::new(rx_b),
            capabilities,
            connected: AtomicBool::new(true),
            metrics: AtomicMetrics::new(),
        };
        (a, b)
    }
}

impl Transport for MemoryTransport {
    fn transport_type(&self) -> crate::types::TransportType {
        crate::types::TransportType::Memory
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
        _options: SendOptions,
    ) -> Pin<Box<dyn Future<Output = TransportResult<()>> + Send + '_>> {
        Box::pin(async move {
            if !self.connected.load(Ordering::Acquire) {
                return Err(TransportError::ConnectionLost(
                    "memory transport disconnected".into(),
                ));
            }
            self.metrics.bytes_sent.fetch_add(bytes.len() as u64, Ordering::Relaxed);
            self.metrics.messages_sent.fetch_add(1, Ordering::Relaxed);
            self.outbox
                .send(bytes)
                .map_err(|_| TransportError::SendFailed("peer dropped".into()))
        })
    }

    fn receive(
        &self,
    ) -> Pin<Box<dyn Future<Output = TransportResult<Option<TransportMessage>>> + Send + '_>> {
        Box::pin(async move {
            let mut inbox = self.inbox.lock().await;
            match inbox.recv().await {
                Some(bytes) => {
                    self.metrics
                        .bytes_received
                        .fetch_add(bytes.len() as u64, Ordering::Relaxed);
                    self.metrics.messages_received.fetch_add(1, Ordering::Relaxed);
                    Ok(Some(TransportMessage::with_context(
                        bytes,
                        MessageContext::default(),
                    )))
                }
                None => Ok(None),
            }
        })
    }

    fn metrics(&self) -> Pin<Box<dyn Future<Output = TransportMetrics> + Send + '_>> {
        Box::pin(async move { self.metrics.snapshot() })
    }

    fn endpoint(&self) -> Option<String> {
        Some("memory://".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_a_message_between_both_ends() {
        let (a, b) = MemoryTransport::pair();
        a.send(Bytes::from_static(b"ping"), SendOptions::default())
            .await
            .unwrap();
        let received = b.receive().await.unwrap().unwrap();
        assert_eq!(&received.payload[..], b"ping");
    }

    #[tokio::test]
    async fn is_bidirectional_capable() {
        let (a, _b) = MemoryTransport::pair();
        assert!(a.supports_server_to_client_requests());
    }

    #[tokio::test]
    async fn send_after_disconnect_fails() {
        let (a, _b) = MemoryTransport::pair();
        a.disconnect().await.unwrap();
        let err = a
            .send(Bytes::from_static(b"ping"), SendOptions::default())
            .await;
        assert!(err.is_err());
    }
}
