//! Upstream block tracking: the sync-event seam, a polling implementation,
//! and the consumer-side cursor that reconciles irregular notifications.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::FilterConfig;
use crate::error::TransportError;
use crate::query::EthQuery;

/// The chain head moved from `old_block` to `new_block`.
///
/// `old_block` is `None` for the first event a tracker emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncEvent {
    pub old_block: Option<u64>,
    pub new_block: u64,
}

impl SyncEvent {
    pub fn new(old_block: Option<u64>, new_block: u64) -> Self {
        Self { old_block, new_block }
    }

    /// First block number not yet covered by `old_block`.
    pub fn first_new_block(&self) -> Option<u64> {
        self.old_block.map(|old| old + 1)
    }
}

/// Source of chain-head information and sync events.
#[async_trait]
pub trait BlockTracker: Send + Sync + 'static {
    /// Current head block number.
    async fn latest_block_number(&self) -> Result<u64, TransportError>;

    /// A fresh receiver of sync events. Dropping it unsubscribes.
    fn subscribe_sync(&self) -> broadcast::Receiver<SyncEvent>;
}

/// Wait for the next sync event, skipping over receiver lag.
///
/// Returns `None` once the tracker has gone away.
pub async fn next_sync(rx: &mut broadcast::Receiver<SyncEvent>) -> Option<SyncEvent> {
    loop {
        match rx.recv().await {
            Ok(event) => return Some(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "sync receiver lagged, next range will cover the gap");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

/// Remembers the last head a consumer processed.
///
/// Events whose new head is not past it are stale (duplicated or
/// re-ordered) and dropped. Otherwise the remembered head replaces the
/// event's `old_block`, so a skipped notification leaves no gap.
#[derive(Debug, Clone, Default)]
pub struct SyncCursor {
    last: Option<u64>,
}

impl SyncCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// A cursor that has already processed everything up to `head`.
    pub fn starting_at(head: u64) -> Self {
        Self { last: Some(head) }
    }

    pub fn last(&self) -> Option<u64> {
        self.last
    }

    /// The event to process for `event`, or `None` when it is stale.
    pub fn reconcile(&mut self, event: SyncEvent) -> Option<SyncEvent> {
        match self.last {
            Some(last) if event.new_block <= last => {
                tracing::debug!(last, new_block = event.new_block, "ignoring stale sync event");
                None
            }
            Some(last) => {
                self.last = Some(event.new_block);
                Some(SyncEvent::new(Some(last), event.new_block))
            }
            None => {
                self.last = Some(event.new_block);
                Some(event)
            }
        }
    }

    /// Forget the remembered head (the consumer unsubscribed).
    pub fn reset(&mut self) {
        self.last = None;
    }
}

/// Tracks the head by polling `eth_blockNumber`.
///
/// A background task polls every `poll_interval_ms` and broadcasts a
/// [`SyncEvent`] whenever the head advances. The task stops when the tracker
/// is dropped.
pub struct PollingBlockTracker {
    query: EthQuery,
    latest: Arc<Mutex<Option<u64>>>,
    tx: broadcast::Sender<SyncEvent>,
    task: JoinHandle<()>,
}

impl PollingBlockTracker {
    /// Start polling. Must be called inside a Tokio runtime.
    pub fn spawn(query: EthQuery, config: &FilterConfig) -> Arc<Self> {
        let (tx, _) = broadcast::channel(config.sync_channel_capacity.max(1));
        let latest = Arc::new(Mutex::new(None));
        let interval = config.poll_interval();

        let task = {
            let query = query.clone();
            let latest = Arc::clone(&latest);
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    ticker.tick().await;
                    match query.block_number().await {
                        Ok(head) => observe_head(&latest, &tx, head),
                        Err(e) => tracing::warn!(error = %e, "head poll failed"),
                    }
                }
            })
        };

        Arc::new(Self { query, latest, tx, task })
    }
}

fn observe_head(latest: &Mutex<Option<u64>>, tx: &broadcast::Sender<SyncEvent>, head: u64) {
    let mut last = latest.lock().unwrap_or_else(|e| e.into_inner());
    if last.is_some_and(|l| head <= l) {
        return;
    }
    let event = SyncEvent::new(*last, head);
    *last = Some(head);
    tracing::debug!(old_block = ?event.old_block, new_block = head, "head advanced");
    // No receivers simply means nothing is installed right now.
    let _ = tx.send(event);
}

#[async_trait]
impl BlockTracker for PollingBlockTracker {
    async fn latest_block_number(&self) -> Result<u64, TransportError> {
        let cached = *self.latest.lock().unwrap_or_else(|e| e.into_inner());
        match cached {
            Some(head) => Ok(head),
            None => {
                let head = self.query.block_number().await?;
                observe_head(&self.latest, &self.tx, head);
                Ok(head)
            }
        }
    }

    fn subscribe_sync(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }
}

impl Drop for PollingBlockTracker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_passes_first_event_through() {
        let mut cursor = SyncCursor::new();
        let event = SyncEvent::new(None, 10);
        assert_eq!(cursor.reconcile(event), Some(event));
        assert_eq!(cursor.last(), Some(10));
    }

    #[test]
    fn cursor_drops_stale_and_duplicate_events() {
        let mut cursor = SyncCursor::new();
        cursor.reconcile(SyncEvent::new(Some(9), 10));
        assert_eq!(cursor.reconcile(SyncEvent::new(Some(9), 10)), None);
        assert_eq!(cursor.reconcile(SyncEvent::new(Some(7), 8)), None);
        assert_eq!(cursor.last(), Some(10));
    }

    #[test]
    fn cursor_covers_gaps() {
        let mut cursor = SyncCursor::new();
        cursor.reconcile(SyncEvent::new(Some(9), 10));
        // The 10 → 11 event was missed.
        assert_eq!(
            cursor.reconcile(SyncEvent::new(Some(11), 12)),
            Some(SyncEvent::new(Some(10), 12))
        );
    }

    #[test]
    fn cursor_reset_forgets_head() {
        let mut cursor = SyncCursor::new();
        cursor.reconcile(SyncEvent::new(None, 3));
        cursor.reset();
        assert_eq!(cursor.last(), None);
        assert!(cursor.reconcile(SyncEvent::new(Some(1), 2)).is_some());
    }

    #[test]
    fn cursor_starting_at_head_skips_covered_blocks() {
        let mut cursor = SyncCursor::starting_at(5);
        assert_eq!(cursor.reconcile(SyncEvent::new(Some(4), 5)), None);
        assert_eq!(
            cursor.reconcile(SyncEvent::new(None, 7)),
            Some(SyncEvent::new(Some(5), 7))
        );
    }

    #[test]
    fn first_new_block() {
        assert_eq!(SyncEvent::new(Some(4), 6).first_new_block(), Some(5));
        assert_eq!(SyncEvent::new(None, 6).first_new_block(), None);
    }

    #[tokio::test]
    async fn observe_head_emits_only_on_advance() {
        let (tx, mut rx) = broadcast::channel(8);
        let latest = Mutex::new(None);
        observe_head(&latest, &tx, 5);
        observe_head(&latest, &tx, 5);
        observe_head(&latest, &tx, 4);
        observe_head(&latest, &tx, 7);
        assert_eq!(rx.recv().await.unwrap(), SyncEvent::new(None, 5));
        assert_eq!(rx.recv().await.unwrap(), SyncEvent::new(Some(5), 7));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn next_sync_skips_lag() {
        let (tx, mut rx) = broadcast::channel(1);
        tx.send(SyncEvent::new(None, 1)).unwrap();
        tx.send(SyncEvent::new(Some(1), 2)).unwrap();
        assert_eq!(next_sync(&mut rx).await, Some(SyncEvent::new(Some(1), 2)));
        drop(tx);
        assert_eq!(next_sync(&mut rx).await, None);
    }
}
