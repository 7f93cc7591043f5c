//! Transport message and send-option types.

use std::collections::HashMap;

use bytes::Bytes;
use mcprelay_wire::RequestId;
use serde::{Deserialize, Serialize};

/// Maximum number of custom headers per message (DoS protection).
const MAX_CUSTOM_HEADERS: usize = 64;

/// A message received from a transport, paired with the context it arrived
/// under (HTTP session id, the request it is related to, auth info passed
/// through from the surrounding connection).
#[derive(Debug, Clone)]
pub struct TransportMessage {
    /// The raw wire payload, ready for `mcprelay_wire::decode`.
    pub payload: Bytes,
    /// Per-message context.
    pub context: MessageContext,
}

impl TransportMessage {
    /// Creates a new message with empty context.
    pub fn new(payload: Bytes) -> Self {
        Self {
            payload,
            context: MessageContext::default(),
        }
    }

    /// Creates a new message with the given context.
    pub const fn with_context(payload: Bytes, context: MessageContext) -> Self {
        Self { payload, context }
    }

    /// Returns the size of the message payload in bytes.
    pub const fn size(&self) -> usize {
        self.payload.len()
    }
}

/// Context carried alongside a [`TransportMessage`], both inbound and
/// outbound. Transports that multiplex several logical streams over one
/// connection (the streaming HTTP transport) use `related_request_id` to
/// select the correct outgoing channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageContext {
    /// The HTTP session id this message belongs to, if the transport is session-scoped.
    pub session_id: Option<String>,
    /// The request id this message is related to (I6): a response or a
    /// notification emitted while handling request R carries `Some(R)` so a
    /// multiplexing transport can route it to R's stream.
    pub related_request_id: Option<RequestId>,
    /// Opaque auth info passed through from the surrounding connection
    /// (e.g. a bearer token), never interpreted by the transport itself.
    pub auth_info: Option<String>,
    /// Custom per-message headers.
    pub headers: HashMap<String, String>,
}

impl MessageContext {
    /// Creates a context tagged with a related request id.
    #[must_use]
    pub fn for_request(related_request_id: RequestId) -> Self {
        Self {
            related_request_id: Some(related_request_id),
            ..Default::default()
        }
    }

    /// Validates metadata constraints.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.headers.len() > MAX_CUSTOM_HEADERS {
            return Err("Too many custom headers");
        }
        Ok(())
    }

    /// Adds a header using a builder pattern.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// Options accepted by [`crate::Transport::send`].
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Tags the outgoing bytes so a multiplexing transport selects the
    /// correct outgoing channel (e.g. a per-request SSE stream).
    pub related_request_id: Option<RequestId>,
}

impl SendOptions {
    /// Creates send options tagged with a related request id.
    #[must_use]
    pub fn for_request(related_request_id: RequestId) -> Self {
        Self {
            related_request_id: Some(related_request_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_message_creation() {
        let payload = Bytes::from("test payload");
        let msg = TransportMessage::new(payload.clone());
        assert_eq!(msg.payload, payload);
        assert_eq!(msg.size(), 12);
    }

    #[test]
    fn test_context_header_limit() {
        let mut ctx = MessageContext::default();
        for i in 0..MAX_CUSTOM_HEADERS {
            ctx.headers.insert(format!("key{}", i), format!("value{}", i));
        }
        assert!(ctx.validate().is_ok());

        ctx.headers.insert("overflow".to_string(), "value".to_string());
        assert!(ctx.validate().is_err());
    }

    #[test]
    fn test_related_request_id_tagging() {
        let ctx = MessageContext::for_request(RequestId::Number(100));
        assert_eq!(ctx.related_request_id, Some(RequestId::Number(100)));
    }
}
