//! chainfilter-http: HTTP JSON-RPC upstream transport.
//!
//! [`HttpRpcClient`] implements [`chainfilter_core::RpcTransport`] over
//! `reqwest`, retrying transient failures with exponential backoff.

pub mod client;

pub use client::{HttpClientConfig, HttpRpcClient, RetryConfig};
