//! Log filter: backfills on install, then matches logs from each new range.

use chainfilter_core::{log_matches, BlockRef, EthQuery, FilterError, FilterParams, Log, SyncEvent};

/// An `eth_newFilter` / `logs` subscription filter.
#[derive(Debug, Clone)]
pub struct LogFilter {
    params: FilterParams,
}

impl LogFilter {
    pub fn new(params: FilterParams) -> Self {
        Self {
            params: params.normalized(),
        }
    }

    /// The filter's params. After [`initialize`](Self::initialize) the lower
    /// bound is always a concrete block number.
    pub fn params(&self) -> &FilterParams {
        &self.params
    }

    /// Pin the lower bound against `head` and load the historical logs in
    /// `[fromBlock, min(toBlock, head)]`.
    ///
    /// The returned logs are trusted as-is; the upstream applied the address
    /// and topic criteria.
    pub async fn initialize(&mut self, query: &EthQuery, head: u64) -> Result<Vec<Log>, FilterError> {
        let from = self.pin(head);
        let to = self.params.to_block.min(BlockRef::Number(head)).resolve(head);
        if to < from {
            return Ok(vec![]);
        }
        Ok(query.logs(&self.params.with_range(from, to)).await?)
    }

    /// Resolve the lower bound against `head` without loading any history.
    /// Returns the pinned block number.
    pub fn pin(&mut self, head: u64) -> u64 {
        let from = self.params.from_block.resolve(head);
        self.params.from_block = BlockRef::Number(from);
        from
    }

    /// Logs in the range the event newly covers that pass the matcher.
    pub async fn advance(&self, query: &EthQuery, event: SyncEvent) -> Result<Vec<Log>, FilterError> {
        let to = event.new_block;
        let from = event.first_new_block().unwrap_or(to);
        if to < from {
            return Ok(vec![]);
        }

        let logs = query.logs(&self.params.with_range(from, to)).await?;
        Ok(logs
            .into_iter()
            .filter(|log| log_matches(&self.params, log))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainfilter_core::{MemoryChain, TopicPattern};

    #[tokio::test]
    async fn initialize_pins_symbolic_lower_bound() {
        let chain = MemoryChain::new();
        chain.mine();
        chain.mine();
        let query = EthQuery::new(chain.clone());

        let mut filter = LogFilter::new(FilterParams::default());
        filter.initialize(&query, chain.head()).await.unwrap();
        assert_eq!(filter.params().from_block, BlockRef::Number(2));
        assert_eq!(filter.params().to_block, BlockRef::Latest);

        let mut earliest = LogFilter::new(FilterParams::default().from_block(BlockRef::Earliest));
        earliest.initialize(&query, chain.head()).await.unwrap();
        assert_eq!(earliest.params().from_block, BlockRef::Number(0));
    }

    #[test]
    fn pin_resolves_without_querying() {
        let mut filter = LogFilter::new(FilterParams::default().from_block(BlockRef::Earliest));
        assert_eq!(filter.pin(7), 0);
        assert_eq!(filter.params().from_block, BlockRef::Number(0));

        let mut latest = LogFilter::new(FilterParams::default());
        assert_eq!(latest.pin(7), 7);
        assert_eq!(latest.params().to_block, BlockRef::Latest);
    }

    #[tokio::test]
    async fn initialize_backfills_up_to_head() {
        let chain = MemoryChain::new();
        chain.add_log("0xaa", &["0x01"]);
        chain.mine();
        chain.add_log("0xaa", &["0x02"]);
        chain.mine();
        let query = EthQuery::new(chain.clone());

        let mut filter = LogFilter::new(FilterParams::default().from_block(1u64).address("0xAA"));
        let seeded = filter.initialize(&query, chain.head()).await.unwrap();
        assert_eq!(seeded.len(), 2);

        let mut future = LogFilter::new(FilterParams::default().from_block(10u64));
        assert!(future.initialize(&query, chain.head()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn advance_reapplies_matcher() {
        let chain = MemoryChain::new();
        let query = EthQuery::new(chain.clone());
        let mut filter = LogFilter::new(
            FilterParams::default().topic(None).topic(Some(TopicPattern::Single("0xcafe02".into()))),
        );
        filter.initialize(&query, chain.head()).await.unwrap();

        chain.add_log("0xaa", &["0xcafe01", "0xcafe02"]);
        chain.add_log("0xaa", &["0xcafe01", "0xcafe01"]);
        chain.mine();

        let logs = filter.advance(&query, SyncEvent::new(Some(0), 1)).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].topics[1], "0xcafe02");
    }

    #[tokio::test]
    async fn advance_propagates_upstream_failure() {
        let chain = MemoryChain::new();
        let query = EthQuery::new(chain.clone());
        let mut filter = LogFilter::new(FilterParams::default());
        filter.initialize(&query, 0).await.unwrap();
        chain.mine();

        chain.fail_next("eth_getLogs", 1);
        let err = filter.advance(&query, SyncEvent::new(Some(0), 1)).await.unwrap_err();
        assert!(matches!(err, FilterError::UpstreamQuery(_)));
    }
}
