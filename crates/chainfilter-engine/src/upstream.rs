//! The upstream collaborators every filter and subscription talks to.

use std::sync::Arc;

use chainfilter_core::{BlockRangeFetcher, BlockTracker, EthQuery, FilterConfig, RpcTransport};

/// Data provider, block fetcher and head tracker, bundled for sharing.
#[derive(Clone)]
pub struct Upstream {
    pub query: EthQuery,
    pub fetcher: BlockRangeFetcher,
    pub tracker: Arc<dyn BlockTracker>,
    pub config: FilterConfig,
}

impl Upstream {
    pub fn new(
        transport: Arc<dyn RpcTransport>,
        tracker: Arc<dyn BlockTracker>,
        config: FilterConfig,
    ) -> Self {
        let query = EthQuery::new(transport);
        let fetcher = BlockRangeFetcher::new(query.clone(), config.fetch.clone());
        Self { query, fetcher, tracker, config }
    }

    /// Upstream whose data provider and tracker are the same object, such as
    /// [`chainfilter_core::MemoryChain`].
    pub fn from_source<S>(source: Arc<S>, config: FilterConfig) -> Self
    where
        S: RpcTransport + BlockTracker,
    {
        let transport: Arc<dyn RpcTransport> = source.clone();
        let tracker: Arc<dyn BlockTracker> = source;
        Self::new(transport, tracker, config)
    }

    /// The raw upstream transport, for forwarding non-filter methods.
    pub fn transport(&self) -> &Arc<dyn RpcTransport> {
        self.query.transport()
    }
}

impl std::fmt::Debug for Upstream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Upstream")
            .field("query", &self.query)
            .field("config", &self.config)
            .finish()
    }
}
