//! The progress-callback table.
//!
//! A progress token of `0` is a distinct, present key: it is stored and
//! looked up exactly like any other token. Nothing here ever treats a
//! missing entry and a `Some(ProgressToken::Number(0))` entry as the same
//! thing - the table only ever sees tokens callers explicitly registered.

use dashmap::DashMap;
use mcprelay_wire::ProgressToken;
use serde_json::Value;
use tokio::sync::mpsc;

/// One progress update, carrying the raw `params` object from
/// `notifications/progress` (progress, optional total, optional message).
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// The progress value reported so far.
    pub progress: f64,
    /// The total, if the peer knows it.
    pub total: Option<f64>,
    /// A human-readable status message, if supplied.
    pub message: Option<String>,
}

impl ProgressUpdate {
    /// Extracts a progress update from a notification's raw params object.
    #[must_use]
    pub fn from_params(params: &Value) -> Option<Self> {
        let progress = params.get("progress")?.as_f64()?;
        let total = params.get("total").and_then(Value::as_f64);
        let message = params
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string);
        Some(Self {
            progress,
            total,
            message,
        })
    }
}

/// Tracks progress-notification subscriptions keyed by token.
#[derive(Debug, Default)]
pub struct ProgressCallbacks {
    inner: DashMap<ProgressToken, mpsc::UnboundedSender<ProgressUpdate>>,
}

impl ProgressCallbacks {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers interest in updates for `token`, returning the receiving
    /// end of the channel they'll arrive on.
    pub fn register(&self, token: ProgressToken) -> mpsc::UnboundedReceiver<ProgressUpdate> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.insert(token, tx);
        rx
    }

    /// Delivers an update for `token`, if anyone is listening.
    ///
    /// Returns `true` if a subscriber was found and the send succeeded.
    pub fn notify(&self, token: &ProgressToken, update: ProgressUpdate) -> bool {
        self.inner
            .get(token)
            .is_some_and(|tx| tx.send(update).is_ok())
    }

    /// Stops tracking `token`, e.g. once the associated request completes.
    pub fn remove(&self, token: &ProgressToken) {
        self.inner.remove(token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn token_zero_is_independently_addressable() {
        let callbacks = ProgressCallbacks::new();
        let zero = ProgressToken::Number(0);
        let mut rx = callbacks.register(zero.clone());

        assert!(callbacks.notify(
            &zero,
            ProgressUpdate {
                progress: 1.0,
                total: None,
                message: None
            }
        ));
        let update = rx.recv().await.unwrap();
        assert_eq!(update.progress, 1.0);
    }

    #[tokio::test]
    async fn unregistered_token_notification_is_a_noop() {
        let callbacks = ProgressCallbacks::new();
        assert!(!callbacks.notify(
            &ProgressToken::Number(5),
            ProgressUpdate {
                progress: 0.5,
                total: None,
                message: None
            }
        ));
    }

    #[test]
    fn parses_progress_params() {
        let params = serde_json::json!({"progress": 3.0, "total": 10.0, "message": "working"});
        let update = ProgressUpdate::from_params(&params).unwrap();
        assert_eq!(update.progress, 3.0);
        assert_eq!(update.total, Some(10.0));
        assert_eq!(update.message.as_deref(), Some("working"));
    }
}
