//! Error types for upstream transports and the filter engine.

use thiserror::Error;

use crate::request::JsonRpcError;

/// Errors that can occur while talking to the upstream provider.
#[derive(Debug, Error)]
pub enum TransportError {
    /// HTTP request failed (connection refused, timeout, etc.).
    #[error("HTTP error: {0}")]
    Http(String),

    /// JSON-RPC protocol-level error returned by the node.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    /// The node answered with a `null` result where a value was required.
    #[error("empty result for {method}")]
    EmptyResult { method: String },

    /// Request timed out after the configured duration.
    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// Response could not be deserialized.
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// An unexpected error.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Returns `true` if this error is retryable (transient).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Http(_) | Self::Timeout { .. } | Self::EmptyResult { .. }
        )
    }
}

/// Errors surfaced by the filter registry and subscription manager.
#[derive(Debug, Error)]
pub enum FilterError {
    /// A client referenced a filter id that is not installed.
    #[error("filter not found: 0x{id:x}")]
    UnknownFilter { id: u64 },

    /// Every attempt to fetch a block failed. Degrades to "missing" inside
    /// range fetches; only surfaced by single-block helpers.
    #[error("block 0x{block:x} unavailable after {attempts} attempts")]
    RangeFetch { block: u64, attempts: u32 },

    /// A log or block query against the upstream provider failed.
    #[error("upstream query failed: {0}")]
    UpstreamQuery(#[from] TransportError),

    /// The registry (or subscription manager) has been torn down.
    #[error("filter registry destroyed")]
    RegistryDestroyed,

    /// Malformed request parameters.
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// `eth_subscribe` with a type this engine does not serve.
    #[error("unsupported subscription type: {0}")]
    UnsupportedSubscription(String),
}

impl FilterError {
    /// Map onto the JSON-RPC error object returned to clients.
    pub fn to_rpc_error(&self) -> JsonRpcError {
        let code = match self {
            Self::InvalidParams(_) | Self::UnsupportedSubscription(_) => {
                JsonRpcError::INVALID_PARAMS
            }
            Self::UnknownFilter { .. } | Self::RegistryDestroyed => JsonRpcError::SERVER_ERROR,
            Self::RangeFetch { .. } | Self::UpstreamQuery(_) => JsonRpcError::INTERNAL_ERROR,
        };
        let message = match self {
            Self::UnknownFilter { .. } => "filter not found".to_string(),
            other => other.to_string(),
        };
        JsonRpcError::new(code, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(TransportError::Http("reset".into()).is_retryable());
        assert!(TransportError::EmptyResult { method: "eth_getBlockByNumber".into() }.is_retryable());
        assert!(!TransportError::Rpc(JsonRpcError::new(-32000, "reverted")).is_retryable());
    }

    #[test]
    fn unknown_filter_maps_to_server_error() {
        let err = FilterError::UnknownFilter { id: 0x1f }.to_rpc_error();
        assert_eq!(err.code, JsonRpcError::SERVER_ERROR);
        assert_eq!(err.message, "filter not found");
        assert_eq!(FilterError::UnknownFilter { id: 0x1f }.to_string(), "filter not found: 0x1f");
    }

    #[test]
    fn invalid_params_code() {
        let err = FilterError::InvalidParams("missing filter id".into()).to_rpc_error();
        assert_eq!(err.code, -32602);
    }
}
