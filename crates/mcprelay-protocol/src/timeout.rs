//! Per-request timeout enforcement with progress-driven deadline resets.
//!
//! Mirrors the cooperative-cancellation shape of a tool-execution timeout
//! manager: a `tokio::select!` races the awaited outcome against a sleep,
//! but here the sleep's deadline can be pushed out by an external reset
//! signal (a progress notification arriving for the request) and is capped
//! by an overall `max_total_timeout` regardless of how many resets occur.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{ProtocolError, ProtocolResult};

/// Configuration for a single request's timeout behavior.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutPolicy {
    /// How long to wait since the last reset (or since the start, if never
    /// reset) before the request is considered timed out.
    pub request_timeout: Duration,
    /// Whether a progress notification for this request pushes the deadline
    /// back out by `request_timeout`.
    pub reset_on_progress: bool,
    /// An overall cap on total wait time that `reset_on_progress` cannot
    /// extend past. `None` means no cap beyond `request_timeout` resets.
    pub max_total_timeout: Option<Duration>,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            reset_on_progress: true,
            max_total_timeout: Some(Duration::from_secs(300)),
        }
    }
}

/// A handle that lets the caller push a request's deadline out, e.g. from
/// the receive loop when a progress notification for it arrives.
#[derive(Debug, Clone)]
pub struct DeadlineHandle {
    reset_tx: mpsc::UnboundedSender<()>,
}

impl DeadlineHandle {
    /// Resets the deadline to `now + request_timeout`, capped by
    /// `max_total_timeout` if configured. A no-op if the request already
    /// completed and stopped listening.
    pub fn reset(&self) {
        let _ = self.reset_tx.send(());
    }
}

/// Awaits `outcome`, enforcing `policy` via a deadline that `DeadlineHandle::reset`
/// can push out. Returns `ProtocolError::RequestTimeout` if a per-reset
/// deadline elapses, `ProtocolError::MaxTotalTimeoutExceeded` if the
/// `max_total_timeout` cap is what actually fired, or `ProtocolError::Dropped`
/// if `cancellation` fires first.
pub async fn with_timeout<F, T>(
    policy: TimeoutPolicy,
    cancellation: CancellationToken,
    outcome: F,
) -> (ProtocolResult<T>, DeadlineHandle)
where
    F: Future<Output = T>,
{
    let (reset_tx, mut reset_rx) = mpsc::unbounded_channel();
    let handle = DeadlineHandle { reset_tx };

    let start = Instant::now();
    let total_deadline = policy.max_total_timeout.map(|d| start + d);
    let mut deadline = start + policy.request_timeout;
    if let Some(total) = total_deadline {
        deadline = deadline.min(total);
    }

    tokio::pin!(outcome);
    let result = loop {
        tokio::select! {
            value = &mut outcome => break Ok(value),
            () = tokio::time::sleep_until(deadline) => {
                break if total_deadline == Some(deadline) {
                    Err(ProtocolError::MaxTotalTimeoutExceeded(policy.max_total_timeout.unwrap()))
                } else {
                    Err(ProtocolError::RequestTimeout(policy.request_timeout))
                };
            }
            () = cancellation.cancelled() => {
                break Err(ProtocolError::Dropped);
            }
            Some(()) = reset_rx.recv(), if policy.reset_on_progress => {
                let mut next = Instant::now() + policy.request_timeout;
                if let Some(total) = total_deadline {
                    next = next.min(total);
                }
                deadline = next;
            }
        }
    };

    (result, handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completes_before_the_deadline() {
        let policy = TimeoutPolicy {
            request_timeout: Duration::from_millis(200),
            reset_on_progress: false,
            max_total_timeout: None,
        };
        let (result, _handle) = with_timeout(policy, CancellationToken::new(), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            42
        })
        .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn times_out_when_the_operation_is_too_slow() {
        let policy = TimeoutPolicy {
            request_timeout: Duration::from_millis(20),
            reset_on_progress: false,
            max_total_timeout: None,
        };
        let (result, _handle) = with_timeout(policy, CancellationToken::new(), async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            42
        })
        .await;
        assert!(matches!(result, Err(ProtocolError::RequestTimeout(_))));
    }

    #[tokio::test]
    async fn max_total_timeout_is_reported_distinctly_from_a_reset_deadline() {
        let policy = TimeoutPolicy {
            request_timeout: Duration::from_millis(500),
            reset_on_progress: true,
            max_total_timeout: Some(Duration::from_millis(20)),
        };
        let (result, _handle) = with_timeout(policy, CancellationToken::new(), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            42
        })
        .await;
        assert!(matches!(result, Err(ProtocolError::MaxTotalTimeoutExceeded(_))));
    }

    #[tokio::test]
    async fn progress_reset_extends_the_deadline() {
        let policy = TimeoutPolicy {
            request_timeout: Duration::from_millis(50),
            reset_on_progress: true,
            max_total_timeout: Some(Duration::from_secs(5)),
        };
        let cancellation = CancellationToken::new();
        let outcome = async {
            tokio::time::sleep(Duration::from_millis(80)).await;
            "done"
        };

        tokio::pin!(outcome);
        let (reset_tx, mut reset_rx) = mpsc::unbounded_channel::<()>();
        // Drive the timeout manually so we can fire a reset mid-flight.
        let handle = DeadlineHandle { reset_tx };
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            handle.reset();
        });

        let start = Instant::now();
        let total_deadline = start + Duration::from_secs(5);
        let mut deadline = start + policy.request_timeout;
        let result = loop {
            tokio::select! {
                value = &mut outcome => break Ok(value),
                () = tokio::time::sleep_until(deadline) => break Err(ProtocolError::RequestTimeout(policy.request_timeout)),
                () = cancellation.cancelled() => break Err(ProtocolError::Dropped),
                Some(()) = reset_rx.recv() => {
                    deadline = (Instant::now() + policy.request_timeout).min(total_deadline);
                }
            }
        };
        assert_eq!(result.unwrap(), "done");
    }

    #[tokio::test]
    async fn cancellation_wins_over_completion() {
        let policy = TimeoutPolicy {
            request_timeout: Duration::from_secs(5),
            reset_on_progress: false,
            max_total_timeout: None,
        };
        let cancellation = CancellationToken::new();
        let cancel_clone = cancellation.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel_clone.cancel();
        });
        let (result, _handle) = with_timeout(policy, cancellation, async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            1
        })
        .await;
        assert!(matches!(result, Err(ProtocolError::Dropped)));
    }
}
