//! chainfilter-core: foundation types and upstream plumbing for ChainFilter.
//!
//! # Overview
//!
//! ChainFilter serves the Ethereum `eth_*Filter` and `eth_subscribe` methods
//! on top of any JSON-RPC upstream. The core crate defines:
//!
//! - [`RpcTransport`]: the async trait every upstream implements
//! - [`JsonRpcRequest`] / [`JsonRpcResponse`]: wire types
//! - [`TransportError`] / [`FilterError`]: error taxonomy
//! - [`types`]: block references, filter params, logs, blocks
//! - [`matcher`]: the log matching predicate
//! - [`BlockRangeFetcher`]: retrying, order-preserving block range loads
//! - [`BlockTracker`]: the sync-event seam, plus [`PollingBlockTracker`]
//! - [`MemoryChain`]: an in-memory upstream for tests and demos

pub mod config;
pub mod error;
pub mod fetcher;
pub mod matcher;
pub mod memory;
pub mod quantity;
pub mod query;
pub mod request;
pub mod tracker;
pub mod transport;
pub mod types;

pub use config::{FetchConfig, FilterConfig};
pub use error::{FilterError, TransportError};
pub use fetcher::BlockRangeFetcher;
pub use matcher::log_matches;
pub use memory::MemoryChain;
pub use quantity::Quantity;
pub use query::EthQuery;
pub use request::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RpcId};
pub use tracker::{BlockTracker, PollingBlockTracker, SyncCursor, SyncEvent};
pub use transport::RpcTransport;
pub use types::{Block, BlockHeader, BlockRef, FilterItem, FilterParams, FilterType, Log, TopicPattern};
