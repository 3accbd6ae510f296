//! Push subscriptions (`eth_subscribe`).
//!
//! `logs` and `newPendingTransactions` subscriptions are backed by push-only
//! filters in a registry of their own; after every advance the filter's new
//! results are relayed as notifications instead of waiting to be polled, and
//! nothing is kept once relayed. `newHeads`
//! subscriptions run their own task that fetches every newly covered block.
//!
//! All notifications go to the single receiver returned by
//! [`SubscriptionManager::new`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chainfilter_core::tracker::next_sync;
use chainfilter_core::{FilterError, FilterItem, FilterParams, SyncCursor};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::filter::Filter;
use crate::registry::{FilterId, FilterRegistry};
use crate::upstream::Upstream;

/// Opaque subscription id: `0x` followed by 16 random bytes in hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(pub String);

impl SubscriptionId {
    pub fn random() -> Self {
        Self(format!("0x{}", hex::encode(rand::random::<[u8; 16]>())))
    }
}

impl From<String> for SubscriptionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Subscription types served by [`SubscriptionManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionKind {
    NewHeads,
    Logs,
    NewPendingTransactions,
}

impl std::str::FromStr for SubscriptionKind {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "newHeads" => Ok(Self::NewHeads),
            "logs" => Ok(Self::Logs),
            "newPendingTransactions" => Ok(Self::NewPendingTransactions),
            other => Err(FilterError::UnsupportedSubscription(other.to_string())),
        }
    }
}

impl std::fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NewHeads => write!(f, "newHeads"),
            Self::Logs => write!(f, "logs"),
            Self::NewPendingTransactions => write!(f, "newPendingTransactions"),
        }
    }
}

/// `params` of an `eth_subscription` notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationParams {
    pub subscription: SubscriptionId,
    pub result: Value,
}

/// One `eth_subscription` envelope, carrying a single item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionNotification {
    pub jsonrpc: String,
    pub method: String,
    pub params: NotificationParams,
}

impl SubscriptionNotification {
    pub fn new(subscription: SubscriptionId, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            method: "eth_subscription".into(),
            params: NotificationParams { subscription, result },
        }
    }
}

/// Forwards a filter's fresh results to its subscriber.
pub(crate) struct Relay {
    subscription: SubscriptionId,
    sink: mpsc::UnboundedSender<SubscriptionNotification>,
}

impl Relay {
    pub(crate) fn deliver(&self, items: Vec<FilterItem>) {
        for item in items {
            match serde_json::to_value(&item) {
                Ok(result) => {
                    let notification = SubscriptionNotification::new(self.subscription.clone(), result);
                    if self.sink.send(notification).is_err() {
                        debug!(subscription = %self.subscription, "notification receiver dropped");
                        return;
                    }
                }
                Err(e) => warn!(subscription = %self.subscription, error = %e, "unserializable filter item"),
            }
        }
    }
}

enum SubscriptionEntry {
    Filter(FilterId),
    Heads(JoinHandle<()>),
}

/// Manages `eth_subscribe` / `eth_unsubscribe`.
pub struct SubscriptionManager {
    registry: FilterRegistry,
    sink: mpsc::UnboundedSender<SubscriptionNotification>,
    entries: Mutex<HashMap<SubscriptionId, SubscriptionEntry>>,
    closed: AtomicBool,
}

impl SubscriptionManager {
    /// Create a manager and the receiver all its notifications arrive on.
    pub fn new(upstream: Upstream) -> (Self, mpsc::UnboundedReceiver<SubscriptionNotification>) {
        let (sink, rx) = mpsc::unbounded_channel();
        let manager = Self {
            registry: FilterRegistry::new(upstream),
            sink,
            entries: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        };
        (manager, rx)
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<SubscriptionId, SubscriptionEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start a subscription. `params` only applies to `logs`.
    pub async fn subscribe(
        &self,
        kind: SubscriptionKind,
        params: Option<FilterParams>,
    ) -> Result<SubscriptionId, FilterError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(FilterError::RegistryDestroyed);
        }
        let id = SubscriptionId::random();

        let entry = match kind {
            SubscriptionKind::NewHeads => SubscriptionEntry::Heads(self.spawn_heads(id.clone())),
            SubscriptionKind::Logs => {
                let filter = Filter::log(params.unwrap_or_default());
                SubscriptionEntry::Filter(self.install_relayed(&id, filter).await?)
            }
            SubscriptionKind::NewPendingTransactions => {
                SubscriptionEntry::Filter(self.install_relayed(&id, Filter::pending_transactions()).await?)
            }
        };

        if self.closed.load(Ordering::Acquire) {
            self.teardown(entry).await;
            return Err(FilterError::RegistryDestroyed);
        }
        self.entries().insert(id.clone(), entry);
        info!(subscription = %id, %kind, "subscribed");
        Ok(id)
    }

    async fn install_relayed(&self, id: &SubscriptionId, filter: Filter) -> Result<FilterId, FilterError> {
        let relay = Relay {
            subscription: id.clone(),
            sink: self.sink.clone(),
        };
        self.registry.install_relayed(filter, relay).await
    }

    fn spawn_heads(&self, id: SubscriptionId) -> JoinHandle<()> {
        let upstream = self.registry.upstream();
        let mut rx = upstream.tracker.subscribe_sync();
        let fetcher = upstream.fetcher.clone();
        let sink = self.sink.clone();

        tokio::spawn(async move {
            let mut cursor = SyncCursor::new();
            while let Some(event) = next_sync(&mut rx).await {
                let Some(event) = cursor.reconcile(event) else {
                    continue;
                };
                for block in fetcher.fetch_range(event.first_new_block(), event.new_block).await {
                    let header = match serde_json::to_value(&block.header) {
                        Ok(header) => header,
                        Err(e) => {
                            warn!(subscription = %id, block = block.number(), error = %e, "unserializable header");
                            continue;
                        }
                    };
                    if sink.send(SubscriptionNotification::new(id.clone(), header)).is_err() {
                        return;
                    }
                }
            }
        })
    }

    async fn teardown(&self, entry: SubscriptionEntry) {
        match entry {
            SubscriptionEntry::Filter(filter_id) => {
                if let Err(e) = self.registry.uninstall(filter_id).await {
                    debug!(filter_id, error = %e, "subscription filter already gone");
                }
            }
            SubscriptionEntry::Heads(task) => task.abort(),
        }
    }

    /// Stop subscription `id`. Returns `false` when it does not exist.
    pub async fn unsubscribe(&self, id: &SubscriptionId) -> bool {
        let Some(entry) = self.entries().remove(id) else {
            return false;
        };
        self.teardown(entry).await;
        info!(subscription = %id, "unsubscribed");
        true
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tear down every subscription and refuse new ones.
    pub async fn destroy(&self) {
        self.closed.store(true, Ordering::Release);
        let entries: Vec<_> = self.entries().drain().collect();
        for (_, entry) in entries {
            if let SubscriptionEntry::Heads(task) = entry {
                task.abort();
            }
        }
        self.registry.destroy_all().await;
        info!("subscription manager destroyed");
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        for entry in self.entries().values() {
            if let SubscriptionEntry::Heads(task) = entry {
                task.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainfilter_core::{FilterConfig, MemoryChain};
    use std::sync::Arc;

    fn manager(chain: &Arc<MemoryChain>) -> (SubscriptionManager, mpsc::UnboundedReceiver<SubscriptionNotification>) {
        SubscriptionManager::new(Upstream::from_source(chain.clone(), FilterConfig::default()))
    }

    #[test]
    fn random_ids_are_prefixed_hex() {
        let id = SubscriptionId::random();
        assert!(id.0.starts_with("0x"));
        assert_eq!(id.0.len(), 34);
        assert_ne!(id, SubscriptionId::random());
    }

    #[test]
    fn kind_parsing() {
        assert_eq!("newHeads".parse::<SubscriptionKind>().unwrap(), SubscriptionKind::NewHeads);
        assert!(matches!(
            "syncing".parse::<SubscriptionKind>(),
            Err(FilterError::UnsupportedSubscription(_))
        ));
    }

    #[test]
    fn notification_envelope_shape() {
        let n = SubscriptionNotification::new(SubscriptionId("0x1".into()), serde_json::json!("0xab"));
        assert_eq!(
            serde_json::to_value(&n).unwrap(),
            serde_json::json!({
                "jsonrpc": "2.0",
                "method": "eth_subscription",
                "params": { "subscription": "0x1", "result": "0xab" }
            })
        );
    }

    #[tokio::test]
    async fn unsubscribe_unknown_is_false() {
        let chain = MemoryChain::new();
        let (manager, _rx) = manager(&chain);
        assert!(!manager.unsubscribe(&SubscriptionId("0xnope".into())).await);
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<SubscriptionNotification>) -> SubscriptionNotification {
        tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
            .await
            .expect("notification timed out")
            .expect("notification channel closed")
    }

    #[tokio::test]
    async fn relayed_transactions_are_not_retained() {
        let chain = MemoryChain::new();
        let (manager, mut rx) = manager(&chain);
        let id = manager.subscribe(SubscriptionKind::NewPendingTransactions, None).await.unwrap();

        let mut expected = Vec::new();
        for _ in 0..30 {
            expected.push(chain.add_transaction());
            chain.mine();
        }
        for hash in &expected {
            let notification = recv(&mut rx).await;
            assert_eq!(notification.params.subscription, id);
            assert_eq!(notification.params.result, serde_json::json!(hash));
        }

        assert!(manager.registry.get_all_results(1).await.unwrap().is_empty());
        assert!(manager.registry.get_changes(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn logs_subscription_skips_history() {
        let chain = MemoryChain::new();
        for _ in 0..5 {
            chain.add_log("0xaa", &["0x01"]);
            chain.mine();
        }
        let (manager, mut rx) = manager(&chain);
        let params = FilterParams::default().from_block(chainfilter_core::BlockRef::Earliest);
        manager.subscribe(SubscriptionKind::Logs, Some(params)).await.unwrap();
        assert_eq!(chain.request_count("eth_getLogs"), 0);

        let tx_hash = chain.add_log("0xaa", &["0x01"]);
        chain.mine();
        let notification = recv(&mut rx).await;
        assert_eq!(notification.params.result["transactionHash"], serde_json::json!(tx_hash));
        assert!(manager.registry.get_all_results(1).await.unwrap().is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn destroyed_manager_refuses_subscriptions() {
        let chain = MemoryChain::new();
        let (manager, _rx) = manager(&chain);
        manager.subscribe(SubscriptionKind::NewHeads, None).await.unwrap();
        manager.subscribe(SubscriptionKind::Logs, None).await.unwrap();
        assert_eq!(manager.len(), 2);

        manager.destroy().await;
        assert!(manager.is_empty());
        assert!(matches!(
            manager.subscribe(SubscriptionKind::Logs, None).await,
            Err(FilterError::RegistryDestroyed)
        ));
    }
}
