//! JSON-RPC 2.0 envelope decoding and encoding.
//!
//! The codec classifies a raw byte payload into one of the shapes in
//! [`DecodedFrame`] without failing on well-formed-but-unrecognizable JSON;
//! only a JSON syntax error produces [`WireError::ParseError`].

use mcprelay_core::jsonrpc::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use serde_json::Value;

use crate::error::WireError;

/// A single recognized JSON-RPC envelope.
#[derive(Debug, Clone)]
pub enum Envelope {
    /// A request carrying a method, optional params, and an id.
    Request(JsonRpcRequest),
    /// A response, success or error, identified by id.
    Response(JsonRpcResponse),
    /// A notification: a method and optional params, no id.
    Notification(JsonRpcNotification),
}

impl Envelope {
    /// Serialize this envelope back to its canonical JSON bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let value = match self {
            Self::Request(r) => serde_json::to_vec(r),
            Self::Response(r) => serde_json::to_vec(r),
            Self::Notification(n) => serde_json::to_vec(n),
        };
        value.expect("envelope types are always serializable")
    }
}

/// One element of a decoded batch: either a recognized envelope or a raw
/// value that did not match any envelope shape.
#[derive(Debug, Clone)]
pub enum BatchElement {
    /// A recognized request, response, or notification.
    Recognized(Envelope),
    /// Valid JSON that did not match any recognizable envelope.
    Unknown(Value),
}

/// The classification of a decoded wire payload.
#[derive(Debug, Clone)]
pub enum DecodedFrame {
    /// A single request.
    Request(JsonRpcRequest),
    /// A single response.
    Response(JsonRpcResponse),
    /// A single notification.
    Notification(JsonRpcNotification),
    /// An ordered batch of elements, possibly empty.
    Batch(Vec<BatchElement>),
    /// Valid JSON that is not a recognizable JSON-RPC envelope.
    Unknown(Value),
}

/// Decode a raw payload into a [`DecodedFrame`].
///
/// Invalid JSON fails with [`WireError::ParseError`]. Valid JSON that does
/// not match a recognizable envelope shape (missing `jsonrpc`, malformed
/// `id`, etc.) is returned as `DecodedFrame::Unknown` rather than failing.
pub fn decode(bytes: &[u8]) -> Result<DecodedFrame, WireError> {
    let value: Value = serde_json::from_slice(bytes)?;
    Ok(classify(value))
}

fn classify(value: Value) -> DecodedFrame {
    match value {
        Value::Array(elements) => {
            DecodedFrame::Batch(elements.into_iter().map(classify_batch_element).collect())
        }
        other => classify_object(other),
    }
}

fn classify_batch_element(value: Value) -> BatchElement {
    match classify_object(value.clone()) {
        DecodedFrame::Request(r) => BatchElement::Recognized(Envelope::Request(r)),
        DecodedFrame::Response(r) => BatchElement::Recognized(Envelope::Response(r)),
        DecodedFrame::Notification(n) => BatchElement::Recognized(Envelope::Notification(n)),
        DecodedFrame::Unknown(_) | DecodedFrame::Batch(_) => BatchElement::Unknown(value),
    }
}

fn classify_object(value: Value) -> DecodedFrame {
    let Some(obj) = value.as_object() else {
        return DecodedFrame::Unknown(value);
    };

    if !matches!(obj.get("jsonrpc"), Some(Value::String(v)) if v == "2.0") {
        return DecodedFrame::Unknown(value);
    }

    let has_method = obj.contains_key("method");
    let has_id = obj.contains_key("id");
    let has_result_or_error = obj.contains_key("result") || obj.contains_key("error");

    if has_method && has_id {
        return match serde_json::from_value::<JsonRpcRequest>(value.clone()) {
            Ok(req) => DecodedFrame::Request(req),
            Err(_) => DecodedFrame::Unknown(value),
        };
    }
    if has_method {
        return match serde_json::from_value::<JsonRpcNotification>(value.clone()) {
            Ok(note) => DecodedFrame::Notification(note),
            Err(_) => DecodedFrame::Unknown(value),
        };
    }
    if has_result_or_error {
        return match serde_json::from_value::<JsonRpcResponse>(value.clone()) {
            Ok(resp) => DecodedFrame::Response(resp),
            Err(_) => DecodedFrame::Unknown(value),
        };
    }
    DecodedFrame::Unknown(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcprelay_core::jsonrpc::RequestId;
    use pretty_assertions::assert_eq;

    #[test]
    fn decodes_request() {
        let bytes = br#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#;
        match decode(bytes).unwrap() {
            DecodedFrame::Request(r) => {
                assert_eq!(r.method, "ping");
                assert_eq!(r.id, RequestId::Number(1));
            }
            other => panic!("expected Request, got {other:?}"),
        }
    }

    #[test]
    fn decodes_notification_without_id() {
        let bytes = br#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#;
        match decode(bytes).unwrap() {
            DecodedFrame::Notification(n) => assert_eq!(n.method, "notifications/initialized"),
            other => panic!("expected Notification, got {other:?}"),
        }
    }

    #[test]
    fn decodes_success_response() {
        let bytes = br#"{"jsonrpc":"2.0","id":"abc","result":{}}"#;
        match decode(bytes).unwrap() {
            DecodedFrame::Response(r) => assert!(r.is_success()),
            other => panic!("expected Response, got {other:?}"),
        }
    }

    #[test]
    fn decodes_error_response() {
        let bytes = br#"{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"Method not found"}}"#;
        match decode(bytes).unwrap() {
            DecodedFrame::Response(r) => assert!(r.is_error()),
            other => panic!("expected Response, got {other:?}"),
        }
    }

    #[test]
    fn missing_jsonrpc_field_is_unknown() {
        let bytes = br#"{"id":1,"method":"ping"}"#;
        assert!(matches!(decode(bytes).unwrap(), DecodedFrame::Unknown(_)));
    }

    #[test]
    fn malformed_id_is_unknown_not_fatal() {
        let bytes = br#"{"jsonrpc":"2.0","id":{"nested":true},"method":"ping"}"#;
        assert!(matches!(decode(bytes).unwrap(), DecodedFrame::Unknown(_)));
    }

    #[test]
    fn invalid_json_is_a_parse_error() {
        let bytes = b"not json at all {{{";
        assert!(decode(bytes).is_err());
    }

    #[test]
    fn empty_batch_is_distinct_shape() {
        let bytes = b"[]";
        match decode(bytes).unwrap() {
            DecodedFrame::Batch(elements) => assert!(elements.is_empty()),
            other => panic!("expected empty Batch, got {other:?}"),
        }
    }

    #[test]
    fn batch_preserves_element_order() {
        let bytes = br#"[
            {"jsonrpc":"2.0","id":1,"method":"a"},
            {"jsonrpc":"2.0","method":"b"},
            {"jsonrpc":"2.0","id":2,"method":"c"}
        ]"#;
        match decode(bytes).unwrap() {
            DecodedFrame::Batch(elements) => {
                assert_eq!(elements.len(), 3);
                assert!(matches!(
                    &elements[0],
                    BatchElement::Recognized(Envelope::Request(r)) if r.method == "a"
                ));
                assert!(matches!(
                    &elements[1],
                    BatchElement::Recognized(Envelope::Notification(n)) if n.method == "b"
                ));
                assert!(matches!(
                    &elements[2],
                    BatchElement::Recognized(Envelope::Request(r)) if r.method == "c"
                ));
            }
            other => panic!("expected Batch, got {other:?}"),
        }
    }

    #[test]
    fn progress_token_zero_round_trips_through_params() {
        let bytes = br#"{"jsonrpc":"2.0","method":"notifications/progress","params":{"progressToken":0,"progress":1}}"#;
        match decode(bytes).unwrap() {
            DecodedFrame::Notification(n) => {
                let token = n.params.unwrap()["progressToken"].clone();
                assert_eq!(token, serde_json::json!(0));
            }
            other => panic!("expected Notification, got {other:?}"),
        }
    }

    proptest::proptest! {
        #[test]
        fn request_round_trips(id in 0i64..1_000_000, method in "[a-z/]{1,20}") {
            let req = JsonRpcRequest::new(method.clone(), None, id);
            let encoded = Envelope::Request(req.clone()).encode();
            match decode(&encoded).unwrap() {
                DecodedFrame::Request(decoded) => {
                    assert_eq!(decoded.method, method);
                    assert_eq!(decoded.id, RequestId::Number(id));
                }
                other => panic!("expected Request, got {other:?}"),
            }
        }
    }
}
