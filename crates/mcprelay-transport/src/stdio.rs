//! A line-delimited transport over standard input/output.
//!
//! Each frame is one line of JSON followed by `\n`. This is deliberately
//! minimal: no child-process spawning, no framing negotiation, just the
//! read/write halves of the current process's stdio.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdin, Stdout};
use tokio::sync::Mutex;

use crate::error::{TransportError, TransportResult};
use crate::message::{MessageContext, SendOptions, TransportMessage};
use crate::metrics::{AtomicMetrics, TransportMetrics};
use crate::traits::Transport;
use crate::types::{TransportCapabilities, TransportState, TransportType};

/// A transport that reads and writes newline-delimited JSON-RPC frames on
/// the process's standard input and output.
#[derive(Debug)]
pub struct StdioTransport {
    reader: Mutex<BufReader<Stdin>>,
    writer: Mutex<Stdout>,
    capabilities: TransportCapabilities,
    connected: AtomicBool,
    metrics: AtomicMetrics,
}

impl StdioTransport {
    /// Creates a transport bound to the current process's stdin/stdout.
    #[must_use]
    pub fn new() -> Self {
        Self {
            reader: Mutex::new(BufReader::new(tokio::io::stdin())),
            writer: Mutex::new(tokio::io::stdout()),
            capabilities: TransportCapabilities {
                supports_server_to_client_requests: true,
                ..TransportCapabilities::default()
            },
            connected: AtomicBool::new(false),
            metrics: AtomicMetrics::new(),
        }
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for StdioTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::Stdio
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
            if bytes.contains(&b'\n') {
                return Err(TransportError::SendFailed(
                    "frame contains an embedded newline".into(),
                ));
            }
            let mut writer = self.writer.lock().await;
            writer.write_all(&bytes).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
            self.metrics.bytes_sent.fetch_add(bytes.len() as u64, Ordering::Relaxed);
            self.metrics.messages_sent.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })
    }

    fn receive(
        &self,
    ) -> Pin<Box<dyn Future<Output = TransportResult<Option<TransportMessage>>> + Send + '_>> {
        Box::pin(async move {
            let mut reader = self.reader.lock().await;
            let mut line = String::new();
            let bytes_read = reader.read_line(&mut line).await?;
            if bytes_read == 0 {
                return Ok(None);
            }
            let trimmed = line.trim_end_matches(['\n', '\r']);
            self.metrics
                .bytes_received
                .fetch_add(trimmed.len() as u64, Ordering::Relaxed);
            self.metrics.messages_received.fetch_add(1, Ordering::Relaxed);
            Ok(Some(TransportMessage::with_context(
                Bytes::copy_from_slice(trimmed.as_bytes()),
                MessageContext::default(),
            )))
        })
    }

    fn metrics(&self) -> Pin<Box<dyn Future<Output = TransportMetrics> + Send + '_>> {
        Box::pin(async move { self.metrics.snapshot() })
    }

    fn endpoint(&self) -> Option<String> {
        Some("stdio://".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_frames_with_embedded_newlines() {
        let transport = StdioTransport::new();
        transport.connect().await.unwrap();
        let err = transport
            .send(Bytes::from_static(b"line1\nline2"), SendOptions::default())
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn advertises_bidirectional_support() {
        let transport = StdioTransport::new();
        assert!(transport.supports_server_to_client_requests());
    }
}
