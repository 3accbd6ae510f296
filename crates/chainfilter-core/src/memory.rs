//! In-memory chain: an upstream provider and block tracker backed by a
//! `Vec` of blocks. Used for tests and local demos.
//!
//! Transactions (optionally emitting one log) are queued with
//! [`MemoryChain::add_transaction`] / [`MemoryChain::add_log`] and sealed
//! into the next block by [`MemoryChain::mine`], which also broadcasts a
//! [`SyncEvent`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::broadcast;

use crate::error::TransportError;
use crate::matcher::{address_matches, topics_match};
use crate::quantity::{to_quantity, Quantity};
use crate::request::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use crate::tracker::{BlockTracker, SyncEvent};
use crate::transport::RpcTransport;
use crate::types::{Block, BlockHeader, BlockRef, BlockTransaction, FilterParams, Log};

struct QueuedTx {
    hash: String,
    log: Option<(String, Vec<String>)>,
}

#[derive(Default)]
struct ChainState {
    blocks: Vec<Block>,
    logs: Vec<Log>,
    queued: Vec<QueuedTx>,
    tx_counter: u64,
    failures: HashMap<String, u32>,
    requests: HashMap<String, u32>,
}

/// An in-memory chain starting at a genesis block `0`.
pub struct MemoryChain {
    state: Mutex<ChainState>,
    tx: broadcast::Sender<SyncEvent>,
}

impl MemoryChain {
    pub fn new() -> Arc<Self> {
        let (tx, _) = broadcast::channel(256);
        let chain = Self {
            state: Mutex::new(ChainState::default()),
            tx,
        };
        chain.seal_block();
        Arc::new(chain)
    }

    fn state(&self) -> MutexGuard<'_, ChainState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current head number.
    pub fn head(&self) -> u64 {
        self.state().blocks.len() as u64 - 1
    }

    /// Block `number`, if it exists.
    pub fn block(&self, number: u64) -> Option<Block> {
        self.state().blocks.get(number as usize).cloned()
    }

    /// Queue a transaction without logs. Returns its hash.
    pub fn add_transaction(&self) -> String {
        self.queue(None)
    }

    /// Queue a transaction emitting one log. Returns the transaction hash.
    pub fn add_log(&self, address: &str, topics: &[&str]) -> String {
        let topics = topics.iter().map(|t| t.to_string()).collect();
        self.queue(Some((address.to_string(), topics)))
    }

    fn queue(&self, log: Option<(String, Vec<String>)>) -> String {
        let mut state = self.state();
        state.tx_counter += 1;
        let hash = format!("0x7a{:062x}", state.tx_counter);
        state.queued.push(QueuedTx { hash: hash.clone(), log });
        hash
    }

    /// Seal queued transactions into a new block and broadcast the sync event.
    pub fn mine(&self) -> Block {
        let (old, block) = self.seal_block();
        let _ = self.tx.send(SyncEvent::new(old, block.number()));
        block
    }

    /// Seal a new block without telling subscribers.
    pub fn mine_unannounced(&self) -> Block {
        self.seal_block().1
    }

    /// Append a block. Returns the previous head (`None` for genesis) read
    /// under the same lock as the append.
    fn seal_block(&self) -> (Option<u64>, Block) {
        let mut state = self.state();
        let number = state.blocks.len() as u64;
        let old = number.checked_sub(1);
        let hash = format!("0xb1{number:062x}");
        let parent_hash = state.blocks.last().and_then(|b| b.header.hash.clone());
        let queued = std::mem::take(&mut state.queued);

        let mut transactions = Vec::with_capacity(queued.len());
        for (index, tx) in queued.into_iter().enumerate() {
            if let Some((address, topics)) = tx.log {
                let log_index = state.logs.iter().filter(|l| l.block_number == Some(Quantity(number))).count();
                state.logs.push(Log {
                    address,
                    topics,
                    data: "0x".into(),
                    block_number: Some(Quantity(number)),
                    block_hash: Some(hash.clone()),
                    transaction_hash: Some(tx.hash.clone()),
                    transaction_index: Some(Quantity(index as u64)),
                    log_index: Some(Quantity(log_index as u64)),
                    removed: Some(false),
                    extra: Default::default(),
                });
            }
            transactions.push(BlockTransaction::Hash(tx.hash));
        }

        let block = Block {
            header: BlockHeader {
                number: Quantity(number),
                hash: Some(hash),
                parent_hash,
                sha3_uncles: None,
                miner: Some(format!("0x{:040x}", 0)),
                state_root: None,
                transactions_root: None,
                receipts_root: None,
                logs_bloom: None,
                difficulty: Some(Quantity(0)),
                gas_limit: Some(Quantity(30_000_000)),
                gas_used: Some(Quantity(21_000 * transactions.len() as u64)),
                nonce: None,
                mix_hash: None,
                timestamp: Some(Quantity(1_700_000_000 + number * 12)),
                extra_data: Some("0x".into()),
            },
            transactions,
        };
        state.blocks.push(block.clone());
        (old, block)
    }

    /// Make the next `times` requests for `method` fail with a transport error.
    pub fn fail_next(&self, method: &str, times: u32) {
        *self.state().failures.entry(method.to_string()).or_default() += times;
    }

    /// Number of requests received for `method`.
    pub fn request_count(&self, method: &str) -> u32 {
        self.state().requests.get(method).copied().unwrap_or(0)
    }

    fn handle(&self, req: &JsonRpcRequest) -> Result<Value, JsonRpcError> {
        let state = self.state();
        let head = state.blocks.len() as u64 - 1;
        match req.method.as_str() {
            "eth_blockNumber" => Ok(json!(to_quantity(head))),
            "eth_getBlockByNumber" => {
                let number: BlockRef = req
                    .param(0)
                    .cloned()
                    .map(serde_json::from_value)
                    .transpose()
                    .map_err(|e| JsonRpcError::new(JsonRpcError::INVALID_PARAMS, e.to_string()))?
                    .unwrap_or_default();
                let block = state.blocks.get(number.resolve(head) as usize);
                Ok(block.map_or(Value::Null, |b| json!(b)))
            }
            "eth_getLogs" => {
                let params = req
                    .param(0)
                    .cloned()
                    .map(FilterParams::from_value)
                    .transpose()
                    .map_err(|e| JsonRpcError::new(JsonRpcError::INVALID_PARAMS, e.to_string()))?
                    .unwrap_or_default();
                let from = params.from_block.resolve(head);
                let to = params.to_block.resolve(head);
                let logs: Vec<&Log> = state
                    .logs
                    .iter()
                    .filter(|log| {
                        let n = log.block_number_u64().unwrap_or_default();
                        n >= from
                            && n <= to
                            && address_matches(params.address.as_deref(), &log.address)
                            && topics_match(&params.topics, &log.topics)
                    })
                    .collect();
                Ok(json!(logs))
            }
            other => Err(JsonRpcError::new(-32601, format!("method {other} not found"))),
        }
    }
}

#[async_trait]
impl RpcTransport for MemoryChain {
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        {
            let mut state = self.state();
            *state.requests.entry(req.method.clone()).or_default() += 1;
            if let Some(remaining) = state.failures.get_mut(&req.method) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(TransportError::Http(format!("simulated {} failure", req.method)));
                }
            }
        }
        Ok(match self.handle(&req) {
            Ok(result) => JsonRpcResponse::success(req.id, result),
            Err(error) => JsonRpcResponse::failure(req.id, error),
        })
    }

    fn url(&self) -> &str {
        "memory"
    }
}

#[async_trait]
impl BlockTracker for MemoryChain {
    async fn latest_block_number(&self) -> Result<u64, TransportError> {
        Ok(self.head())
    }

    fn subscribe_sync(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::EthQuery;
    use crate::types::TopicPattern;

    #[tokio::test]
    async fn mine_emits_sync_event_and_serves_blocks() {
        let chain = MemoryChain::new();
        let mut rx = chain.subscribe_sync();
        let tx_hash = chain.add_transaction();
        let block = chain.mine();
        assert_eq!(block.number(), 1);
        assert_eq!(rx.recv().await.unwrap(), SyncEvent::new(Some(0), 1));

        let query = EthQuery::new(chain.clone());
        assert_eq!(query.block_number().await.unwrap(), 1);
        let fetched = query.block_by_number(1).await.unwrap();
        assert_eq!(fetched.transactions[0].hash(), tx_hash);
        assert!(query.block_by_number(2).await.is_err());
    }

    #[tokio::test]
    async fn get_logs_filters_inclusively() {
        let chain = MemoryChain::new();
        chain.add_log("0xaa", &["0x01"]);
        chain.mine();
        chain.add_log("0xbb", &["0x02"]);
        chain.mine();

        let query = EthQuery::new(chain.clone());
        let all = query.logs(&FilterParams::default().with_range(1, 2)).await.unwrap();
        assert_eq!(all.len(), 2);

        let only_two = query
            .logs(&FilterParams::default().topic(Some(TopicPattern::Single("0x02".into()))).with_range(0, 2))
            .await
            .unwrap();
        assert_eq!(only_two.len(), 1);
        assert_eq!(only_two[0].block_number_u64(), Some(2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_mining_announces_contiguous_heads() {
        let chain = MemoryChain::new();
        let mut rx = chain.subscribe_sync();

        let miners: Vec<_> = (0..4)
            .map(|_| {
                let chain = chain.clone();
                tokio::spawn(async move {
                    for _ in 0..25 {
                        chain.mine();
                    }
                })
            })
            .collect();
        for miner in miners {
            miner.await.unwrap();
        }
        assert_eq!(chain.head(), 100);

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(events.len(), 100);
        for event in &events {
            assert_eq!(event.old_block, Some(event.new_block - 1));
        }
        let mut heads: Vec<u64> = events.iter().map(|e| e.new_block).collect();
        heads.sort_unstable();
        assert_eq!(heads, (1..=100).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let chain = MemoryChain::new();
        chain.fail_next("eth_blockNumber", 1);
        let query = EthQuery::new(chain.clone());
        assert!(query.block_number().await.is_err());
        assert_eq!(query.block_number().await.unwrap(), 0);
        assert_eq!(chain.request_count("eth_blockNumber"), 2);
    }
}
