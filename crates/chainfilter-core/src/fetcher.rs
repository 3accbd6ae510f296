//! Block range fetcher.
//!
//! Loads every block body in an inclusive number range with one
//! `eth_getBlockByNumber` per block, all in flight at once. Each block gets a
//! bounded number of attempts; a block that never arrives is dropped from the
//! result instead of failing the whole range.

use futures::future::join_all;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::Retry;

use crate::config::FetchConfig;
use crate::error::{FilterError, TransportError};
use crate::query::EthQuery;
use crate::types::Block;

/// Fetches block bodies for filter and subscription updates.
#[derive(Debug, Clone)]
pub struct BlockRangeFetcher {
    query: EthQuery,
    config: FetchConfig,
}

impl BlockRangeFetcher {
    pub fn new(query: EthQuery, config: FetchConfig) -> Self {
        Self { query, config }
    }

    /// Fetch blocks `[from, to]` in ascending order, skipping blocks that
    /// could not be loaded. `from` defaults to `to`; an inverted range is empty.
    pub async fn fetch_range(&self, from: Option<u64>, to: u64) -> Vec<Block> {
        let from = from.unwrap_or(to);
        if to < from {
            return vec![];
        }

        let fetches = (from..=to).map(|number| async move {
            match self.fetch_block(number).await {
                Ok(block) => Some(block),
                Err(e) => {
                    tracing::warn!(block = number, error = %e, "dropping block from range");
                    None
                }
            }
        });

        join_all(fetches).await.into_iter().flatten().collect()
    }

    /// Fetch a single block, retrying every kind of failure (transport error,
    /// RPC error object, `null` result) up to `max_attempts` times.
    pub async fn fetch_block(&self, number: u64) -> Result<Block, FilterError> {
        let attempts = self.config.max_attempts.max(1);
        let strategy =
            FixedInterval::new(self.config.retry_interval()).take(attempts as usize - 1);

        let mut attempt = 0u32;
        Retry::start(strategy, || {
            attempt += 1;
            self.attempt(number, attempt)
        })
        .await
        .map_err(|_| FilterError::RangeFetch { block: number, attempts })
    }

    async fn attempt(&self, number: u64, attempt: u32) -> Result<Block, TransportError> {
        let timeout = self.config.attempt_timeout();
        let result = match tokio::time::timeout(timeout, self.query.block_by_number(number)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout {
                ms: timeout.as_millis() as u64,
            }),
        };
        if let Err(e) = &result {
            tracing::warn!(block = number, attempt, error = %e, "eth_getBlockByNumber failed");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
    use crate::transport::RpcTransport;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};

    enum Reply {
        Fail,
        RpcError,
        Result(Value),
    }

    /// Per-block scripted replies; once a script runs dry the block is served.
    #[derive(Default)]
    struct Scripted {
        scripts: Mutex<HashMap<u64, VecDeque<Reply>>>,
        calls: Mutex<Vec<u64>>,
    }

    impl Scripted {
        fn script(self, block: u64, replies: Vec<Reply>) -> Self {
            self.scripts.lock().unwrap().insert(block, replies.into());
            self
        }
    }

    fn block_json(n: u64) -> Value {
        json!({ "number": format!("{n:#x}"), "hash": format!("0xb{n}"), "transactions": [] })
    }

    #[async_trait]
    impl RpcTransport for Scripted {
        async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
            let number = crate::quantity::parse_numeral(req.params[0].as_str().unwrap()).unwrap();
            self.calls.lock().unwrap().push(number);
            let reply = self
                .scripts
                .lock()
                .unwrap()
                .get_mut(&number)
                .and_then(|s| s.pop_front())
                .unwrap_or(Reply::Result(block_json(number)));
            match reply {
                Reply::Fail => Err(TransportError::Http("connection reset".into())),
                Reply::RpcError => Ok(JsonRpcResponse::failure(
                    req.id,
                    JsonRpcError::new(-32000, "header not found"),
                )),
                Reply::Result(v) => Ok(JsonRpcResponse::success(req.id, v)),
            }
        }
        fn url(&self) -> &str {
            "scripted"
        }
    }

    fn fetcher(transport: Arc<Scripted>) -> BlockRangeFetcher {
        BlockRangeFetcher::new(EthQuery::new(transport), FetchConfig::default())
    }

    #[tokio::test]
    async fn returns_blocks_in_ascending_order() {
        let transport = Arc::new(Scripted::default().script(2, vec![Reply::Fail]));
        let blocks = fetcher(transport).fetch_range(Some(1), 4).await;
        let numbers: Vec<_> = blocks.iter().map(Block::number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn missing_from_defaults_to_single_block() {
        let transport = Arc::new(Scripted::default());
        let blocks = fetcher(transport.clone()).fetch_range(None, 7).await;
        assert_eq!(blocks.len(), 1);
        assert_eq!(*transport.calls.lock().unwrap(), vec![7]);
    }

    #[tokio::test]
    async fn inverted_range_is_empty() {
        let transport = Arc::new(Scripted::default());
        assert!(fetcher(transport.clone()).fetch_range(Some(5), 4).await.is_empty());
        assert!(transport.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn fails_twice_then_null_yields_empty() {
        let transport = Arc::new(Scripted::default().script(
            1,
            vec![Reply::Fail, Reply::RpcError, Reply::Result(Value::Null)],
        ));
        let blocks = fetcher(transport.clone()).fetch_range(Some(1), 1).await;
        assert!(blocks.is_empty());
        assert_eq!(transport.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn recovers_on_last_attempt() {
        let transport = Arc::new(Scripted::default().script(1, vec![Reply::Fail, Reply::Fail]));
        let block = fetcher(transport).fetch_block(1).await.unwrap();
        assert_eq!(block.hash(), Some("0xb1"));
    }

    #[tokio::test]
    async fn exhausted_block_reports_range_fetch_error() {
        let transport = Arc::new(
            Scripted::default().script(9, vec![Reply::Fail, Reply::Fail, Reply::Fail]),
        );
        let err = fetcher(transport).fetch_block(9).await.unwrap_err();
        assert!(matches!(err, FilterError::RangeFetch { block: 9, attempts: 3 }));
    }

    #[tokio::test]
    async fn gap_in_range_is_filtered() {
        let transport = Arc::new(
            Scripted::default().script(3, vec![Reply::Fail, Reply::Fail, Reply::Fail]),
        );
        let numbers: Vec<_> = fetcher(transport)
            .fetch_range(Some(2), 4)
            .await
            .iter()
            .map(Block::number)
            .collect();
        assert_eq!(numbers, vec![2, 4]);
    }
}
