//! Filter registry and update coordination.
//!
//! Installed filters live behind a single async gate. Client operations
//! (install, uninstall, reads) and the advance cycle triggered by each sync
//! event all take the gate, so a reader never sees a filter mid-update and
//! two advance cycles never interleave.
//!
//! The registry listens to the tracker's sync feed only while at least one
//! filter is installed.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use chainfilter_core::tracker::next_sync;
use chainfilter_core::{FilterError, FilterItem, FilterType, SyncCursor, SyncEvent};
use futures::future::join_all;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::filter::Filter;
use crate::subscriptions::Relay;
use crate::upstream::Upstream;

/// Identifier handed out by [`FilterRegistry::install`]. Starts at `1`.
pub type FilterId = u64;

struct FilterEntry {
    filter: Filter,
    /// Head this filter has already accounted for.
    cursor: SyncCursor,
    /// Push target for subscription-backed filters.
    relay: Option<Relay>,
}

#[derive(Default)]
struct RegistryState {
    next_id: FilterId,
    filters: HashMap<FilterId, FilterEntry>,
    sync_task: Option<JoinHandle<()>>,
    destroyed: bool,
}

impl RegistryState {
    fn ensure_live(&self) -> Result<(), FilterError> {
        if self.destroyed {
            Err(FilterError::RegistryDestroyed)
        } else {
            Ok(())
        }
    }

    fn entry_mut(&mut self, id: FilterId) -> Result<&mut FilterEntry, FilterError> {
        self.ensure_live()?;
        self.filters.get_mut(&id).ok_or(FilterError::UnknownFilter { id })
    }

    fn stop_sync(&mut self) {
        if let Some(task) = self.sync_task.take() {
            task.abort();
            info!("unsubscribed from sync events");
        }
    }
}

struct RegistryInner {
    upstream: Upstream,
    state: Mutex<RegistryState>,
}

impl Drop for RegistryInner {
    fn drop(&mut self) {
        self.state.get_mut().stop_sync();
    }
}

/// The set of installed filters for one middleware instance.
///
/// Cheap to clone; clones share the same filters.
#[derive(Clone)]
pub struct FilterRegistry {
    inner: Arc<RegistryInner>,
}

impl FilterRegistry {
    pub fn new(upstream: Upstream) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                upstream,
                state: Mutex::new(RegistryState::default()),
            }),
        }
    }

    pub fn upstream(&self) -> &Upstream {
        &self.inner.upstream
    }

    /// Initialize `filter` at the current head and install it.
    ///
    /// Nothing is installed when initialization fails.
    pub async fn install(&self, filter: Filter) -> Result<FilterId, FilterError> {
        self.install_entry(filter, None).await
    }

    /// Install a filter whose results are pushed through `relay` after every
    /// advance. Such a filter is always push-only.
    pub(crate) async fn install_relayed(&self, filter: Filter, relay: Relay) -> Result<FilterId, FilterError> {
        self.install_entry(filter.push_only(), Some(relay)).await
    }

    async fn install_entry(&self, mut filter: Filter, relay: Option<Relay>) -> Result<FilterId, FilterError> {
        let mut state = self.inner.state.lock().await;
        state.ensure_live()?;

        let upstream = &self.inner.upstream;
        let head = upstream.tracker.latest_block_number().await?;
        filter.initialize(upstream, head).await?;

        state.next_id += 1;
        let id = state.next_id;
        let kind = filter.filter_type();
        state.filters.insert(
            id,
            FilterEntry {
                filter,
                cursor: SyncCursor::starting_at(head),
                relay,
            },
        );
        info!(filter_id = id, %kind, head, "filter installed");

        if state.filters.len() == 1 {
            let rx = upstream.tracker.subscribe_sync();
            state.sync_task = Some(spawn_sync_listener(Arc::downgrade(&self.inner), rx));
            info!("subscribed to sync events");
        }
        Ok(id)
    }

    /// Remove filter `id`. Returns `false` when it was not installed.
    pub async fn uninstall(&self, id: FilterId) -> Result<bool, FilterError> {
        let mut state = self.inner.state.lock().await;
        state.ensure_live()?;
        let removed = state.filters.remove(&id).is_some();
        if removed {
            info!(filter_id = id, "filter uninstalled");
            if state.filters.is_empty() {
                state.stop_sync();
            }
        }
        Ok(removed)
    }

    /// Results produced since the previous call for `id`; clears them.
    pub async fn get_changes(&self, id: FilterId) -> Result<Vec<FilterItem>, FilterError> {
        let mut state = self.inner.state.lock().await;
        Ok(state.entry_mut(id)?.filter.take_changes())
    }

    /// Every result `id` has produced since installation.
    pub async fn get_all_results(&self, id: FilterId) -> Result<Vec<FilterItem>, FilterError> {
        let mut state = self.inner.state.lock().await;
        Ok(state.entry_mut(id)?.filter.all_results().to_vec())
    }

    /// `eth_getFilterLogs`: all results of a log filter, empty for others.
    pub async fn get_filter_logs(&self, id: FilterId) -> Result<Vec<FilterItem>, FilterError> {
        let mut state = self.inner.state.lock().await;
        Ok(state.entry_mut(id)?.filter.logs().to_vec())
    }

    pub async fn filter_type(&self, id: FilterId) -> Option<FilterType> {
        let state = self.inner.state.lock().await;
        state.filters.get(&id).map(|entry| entry.filter.filter_type())
    }

    pub async fn len(&self) -> usize {
        self.inner.state.lock().await.filters.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Whether the registry currently listens to sync events.
    pub async fn is_syncing(&self) -> bool {
        self.inner.state.lock().await.sync_task.is_some()
    }

    /// Advance every installed filter over the range `event` covers.
    ///
    /// Filters advance concurrently. A failing filter is logged and yields
    /// nothing this cycle; the others are unaffected.
    pub async fn advance_all(&self, event: SyncEvent) {
        let mut state = self.inner.state.lock().await;
        let upstream = &self.inner.upstream;

        let updates = state.filters.iter_mut().map(|(&id, entry)| async move {
            let Some(event) = entry.cursor.reconcile(event) else {
                return;
            };
            match entry.filter.advance(upstream, event).await {
                Ok(count) => {
                    debug!(filter_id = id, old_block = ?event.old_block, new_block = event.new_block, count, "filter advanced");
                    if let Some(relay) = &entry.relay {
                        relay.deliver(entry.filter.take_changes());
                    }
                }
                Err(e) => warn!(filter_id = id, new_block = event.new_block, error = %e, "filter update failed"),
            }
        });
        join_all(updates).await;
    }

    /// Remove every filter and stop listening. Later calls fail with
    /// [`FilterError::RegistryDestroyed`].
    pub async fn destroy_all(&self) {
        let mut state = self.inner.state.lock().await;
        let count = state.filters.len();
        state.filters.clear();
        state.stop_sync();
        state.destroyed = true;
        info!(filters = count, "filter registry destroyed");
    }
}

impl std::fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterRegistry")
            .field("upstream", &self.inner.upstream)
            .finish_non_exhaustive()
    }
}

fn spawn_sync_listener(inner: Weak<RegistryInner>, mut rx: broadcast::Receiver<SyncEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = next_sync(&mut rx).await {
            let Some(inner) = inner.upgrade() else {
                break;
            };
            FilterRegistry { inner }.advance_all(event).await;
        }
        debug!("sync listener stopped");
    })
}
