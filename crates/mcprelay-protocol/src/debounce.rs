//! Coalescing queue for high-frequency notifications.
//!
//! Several notification kinds (`notifications/resources/list_changed`,
//! repeated progress updates for the same token) are cheap to produce and
//! expensive to deliver one at a time to a slow peer. A [`Debouncer`]
//! collapses same-key updates that land within one tick into a single
//! flush carrying only the latest value per key.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Coalesces values pushed under the same key within one `interval` tick.
#[derive(Debug)]
pub struct Debouncer<K, V> {
    pending: Arc<Mutex<HashMap<K, V>>>,
}

impl<K, V> Debouncer<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Send + 'static,
{
    /// Spawns the background flush task and returns a handle plus the
    /// receiving end of flushed batches. A batch is only emitted when at
    /// least one key was pushed during that tick.
    #[must_use]
    pub fn spawn(interval: Duration) -> (Self, mpsc::UnboundedReceiver<Vec<(K, V)>>) {
        let pending = Arc::new(Mutex::new(HashMap::new()));
        let (tx, rx) = mpsc::unbounded_channel();

        let pending_task = Arc::clone(&pending);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                let drained: Vec<(K, V)> = {
                    let mut map = pending_task.lock();
                    if map.is_empty() {
                        continue;
                    }
                    map.drain().collect()
                };
                if tx.send(drained).is_err() {
                    break;
                }
            }
        });

        (Self { pending }, rx)
    }

    /// Pushes a value for `key`, overwriting any value already pending for
    /// it in the current tick.
    pub fn push(&self, key: K, value: V) {
        self.pending.lock().insert(key, value);
    }

    /// Whether no value is currently awaiting its next flush.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn coalesces_repeated_pushes_to_the_same_key() {
        let (debouncer, mut rx) = Debouncer::spawn(Duration::from_millis(20));
        debouncer.push("uri-1", 1);
        debouncer.push("uri-1", 2);
        debouncer.push("uri-2", 3);

        let batch = rx.recv().await.unwrap();
        assert_eq!(batch.len(), 2);
        let uri1 = batch.iter().find(|(k, _)| *k == "uri-1").unwrap();
        assert_eq!(uri1.1, 2);
    }

    #[tokio::test]
    async fn is_idle_reflects_whether_a_flush_is_pending() {
        let (debouncer, mut rx) = Debouncer::spawn(Duration::from_millis(20));
        assert!(debouncer.is_idle());
        debouncer.push("uri-1", 1);
        assert!(!debouncer.is_idle());
        rx.recv().await.unwrap();
        assert!(debouncer.is_idle());
    }

    #[tokio::test]
    async fn empty_ticks_emit_nothing() {
        let (_debouncer, mut rx) = Debouncer::<&str, i32>::spawn(Duration::from_millis(10));
        let result = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(result.is_err(), "no batch should have been emitted");
    }
}
