//! Wire codec errors.

use thiserror::Error;

/// Errors produced while decoding or encoding a JSON-RPC envelope.
#[derive(Debug, Error)]
pub enum WireError {
    /// The payload was not valid JSON at all.
    #[error("parse error: {0}")]
    ParseError(#[from] serde_json::Error),
}
