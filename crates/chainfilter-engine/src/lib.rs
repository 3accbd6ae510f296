//! chainfilter-engine: server-side Ethereum filters and subscriptions.
//!
//! # Components
//!
//! - [`Filter`]: log, block and pending-transaction filters with their
//!   accumulated results
//! - [`FilterRegistry`]: installed filters behind one update gate, advanced
//!   on every sync event while any filter is installed
//! - [`SubscriptionManager`]: push delivery for `eth_subscribe`
//! - [`FilterMiddleware`]: serves the `eth_*Filter` / `eth_subscribe`
//!   methods and forwards everything else upstream
//!
//! # Example
//!
//! ```rust,no_run
//! use chainfilter_core::{FilterConfig, MemoryChain};
//! use chainfilter_engine::{Filter, FilterRegistry, Upstream};
//!
//! # async fn run() -> Result<(), chainfilter_core::FilterError> {
//! let chain = MemoryChain::new();
//! let registry = FilterRegistry::new(Upstream::from_source(chain.clone(), FilterConfig::default()));
//! let id = registry.install(Filter::block()).await?;
//! chain.mine();
//! let hashes = registry.get_changes(id).await?;
//! # Ok(())
//! # }
//! ```

pub mod filter;
pub mod middleware;
pub mod registry;
pub mod subscriptions;
pub mod upstream;

pub use filter::{BlockFilter, Filter, FilterKind, LogFilter, PendingTransactionFilter};
pub use middleware::FilterMiddleware;
pub use registry::{FilterId, FilterRegistry};
pub use subscriptions::{
    NotificationParams, SubscriptionId, SubscriptionKind, SubscriptionManager, SubscriptionNotification,
};
pub use upstream::Upstream;
