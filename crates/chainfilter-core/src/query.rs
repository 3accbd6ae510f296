//! Typed upstream calls used by filters.
//!
//! Wraps an [`RpcTransport`] with `eth_blockNumber`, `eth_getBlockByNumber`
//! and `eth_getLogs`, numbering requests from a shared counter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};

use crate::error::TransportError;
use crate::quantity::{to_quantity, Quantity};
use crate::transport::{call_with, RpcTransport};
use crate::types::{Block, FilterParams, Log};

/// Cheaply cloneable handle to the upstream data provider.
#[derive(Clone)]
pub struct EthQuery {
    transport: Arc<dyn RpcTransport>,
    next_id: Arc<AtomicU64>,
}

impl EthQuery {
    pub fn new(transport: Arc<dyn RpcTransport>) -> Self {
        Self {
            transport,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// The wrapped transport.
    pub fn transport(&self) -> &Arc<dyn RpcTransport> {
        &self.transport
    }

    async fn request<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        call_with(self.transport.as_ref(), id, method, params).await
    }

    /// Current chain head number.
    pub async fn block_number(&self) -> Result<u64, TransportError> {
        let head: Quantity = self.request("eth_blockNumber", vec![]).await?;
        Ok(head.as_u64())
    }

    /// Block body with transaction hashes only.
    ///
    /// A `null` result is reported as [`TransportError::EmptyResult`]; callers
    /// that tolerate missing blocks treat it like any other failed attempt.
    pub async fn block_by_number(&self, number: u64) -> Result<Block, TransportError> {
        let block: Option<Block> = self
            .request("eth_getBlockByNumber", vec![json!(to_quantity(number)), json!(false)])
            .await?;
        block.ok_or_else(|| TransportError::EmptyResult {
            method: "eth_getBlockByNumber".into(),
        })
    }

    /// `eth_getLogs` for the given params.
    pub async fn logs(&self, params: &FilterParams) -> Result<Vec<Log>, TransportError> {
        let params = serde_json::to_value(params)?;
        let logs: Option<Vec<Log>> = self.request("eth_getLogs", vec![params]).await?;
        Ok(logs.unwrap_or_default())
    }
}

impl std::fmt::Debug for EthQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EthQuery")
            .field("url", &self.transport.url())
            .finish()
    }
}
