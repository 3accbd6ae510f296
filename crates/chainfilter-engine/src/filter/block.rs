//! Block-driven filters: new block hashes and the transactions they carry.

use chainfilter_core::{BlockRangeFetcher, SyncEvent};

/// `eth_newBlockFilter`: reports the hash of every block after installation.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockFilter;

impl BlockFilter {
    pub async fn advance(&self, fetcher: &BlockRangeFetcher, event: SyncEvent) -> Vec<String> {
        fetcher
            .fetch_range(event.first_new_block(), event.new_block)
            .await
            .into_iter()
            .filter_map(|block| block.header.hash)
            .collect()
    }
}

/// `eth_newPendingTransactionFilter`: reports the hash of every transaction
/// mined after installation, in block order then in-block order.
#[derive(Debug, Clone, Copy, Default)]
pub struct PendingTransactionFilter;

impl PendingTransactionFilter {
    pub async fn advance(&self, fetcher: &BlockRangeFetcher, event: SyncEvent) -> Vec<String> {
        fetcher
            .fetch_range(event.first_new_block(), event.new_block)
            .await
            .into_iter()
            .flat_map(|block| block.transactions)
            .map(|tx| tx.hash().to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainfilter_core::{EthQuery, FetchConfig, MemoryChain};

    fn fetcher(chain: &std::sync::Arc<MemoryChain>) -> BlockRangeFetcher {
        BlockRangeFetcher::new(EthQuery::new(chain.clone()), FetchConfig::default())
    }

    #[tokio::test]
    async fn block_filter_reports_each_new_hash() {
        let chain = MemoryChain::new();
        let b1 = chain.mine();
        let b2 = chain.mine();

        let hashes = BlockFilter.advance(&fetcher(&chain), SyncEvent::new(Some(0), 2)).await;
        assert_eq!(hashes, vec![b1.hash().unwrap(), b2.hash().unwrap()]);
    }

    #[tokio::test]
    async fn boot_event_covers_only_new_head() {
        let chain = MemoryChain::new();
        chain.mine();
        let b2 = chain.mine();

        let hashes = BlockFilter.advance(&fetcher(&chain), SyncEvent::new(None, 2)).await;
        assert_eq!(hashes, vec![b2.hash().unwrap()]);
    }

    #[tokio::test]
    async fn transactions_in_block_then_index_order() {
        let chain = MemoryChain::new();
        let t1 = chain.add_transaction();
        let t2 = chain.add_log("0xaa", &["0x01"]);
        chain.mine();
        let t3 = chain.add_transaction();
        chain.mine();

        let hashes = PendingTransactionFilter
            .advance(&fetcher(&chain), SyncEvent::new(Some(0), 2))
            .await;
        assert_eq!(hashes, vec![t1, t2, t3]);
    }
}
