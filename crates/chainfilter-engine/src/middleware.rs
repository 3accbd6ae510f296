//! JSON-RPC middleware serving the filter and subscription methods.
//!
//! [`FilterMiddleware`] is itself an [`RpcTransport`]: the filter methods are
//! answered locally, every other method goes to the wrapped upstream
//! unchanged.

use std::sync::Arc;

use async_trait::async_trait;
use chainfilter_core::quantity::{parse_hex_quantity, to_quantity};
use chainfilter_core::{
    FilterError, FilterParams, JsonRpcRequest, JsonRpcResponse, RpcTransport, TransportError,
};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::filter::Filter;
use crate::registry::{FilterId, FilterRegistry};
use crate::subscriptions::{SubscriptionId, SubscriptionKind, SubscriptionManager, SubscriptionNotification};
use crate::upstream::Upstream;

/// Methods answered by [`FilterMiddleware`] instead of the upstream.
pub const FILTER_METHODS: &[&str] = &[
    "eth_newFilter",
    "eth_newBlockFilter",
    "eth_newPendingTransactionFilter",
    "eth_uninstallFilter",
    "eth_getFilterChanges",
    "eth_getFilterLogs",
    "eth_subscribe",
    "eth_unsubscribe",
];

/// Filter and subscription support in front of an upstream transport.
pub struct FilterMiddleware {
    upstream: Arc<dyn RpcTransport>,
    registry: FilterRegistry,
    subscriptions: SubscriptionManager,
}

impl FilterMiddleware {
    /// Build the middleware and the receiver of its subscription notifications.
    pub fn new(upstream: Upstream) -> (Self, mpsc::UnboundedReceiver<SubscriptionNotification>) {
        let (subscriptions, notifications) = SubscriptionManager::new(upstream.clone());
        let middleware = Self {
            upstream: upstream.transport().clone(),
            registry: FilterRegistry::new(upstream),
            subscriptions,
        };
        (middleware, notifications)
    }

    pub fn registry(&self) -> &FilterRegistry {
        &self.registry
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    /// Whether `method` is answered locally.
    pub fn handles(method: &str) -> bool {
        FILTER_METHODS.contains(&method)
    }

    /// Answer `req` if it is a filter method; `None` means it belongs upstream.
    pub async fn handle(&self, req: &JsonRpcRequest) -> Option<Result<Value, FilterError>> {
        let result = match req.method.as_str() {
            "eth_newFilter" => self.new_filter(req).await,
            "eth_newBlockFilter" => self.install(Filter::block()).await,
            "eth_newPendingTransactionFilter" => self.install(Filter::pending_transactions()).await,
            "eth_uninstallFilter" => match filter_id_param(req) {
                Ok(id) => self.registry.uninstall(id).await.map(Value::Bool),
                Err(e) => Err(e),
            },
            "eth_getFilterChanges" => match filter_id_param(req) {
                Ok(id) => self.registry.get_changes(id).await.and_then(|items| to_json(&items)),
                Err(e) => Err(e),
            },
            "eth_getFilterLogs" => match filter_id_param(req) {
                Ok(id) => self.registry.get_filter_logs(id).await.and_then(|items| to_json(&items)),
                Err(e) => Err(e),
            },
            "eth_subscribe" => self.subscribe(req).await,
            "eth_unsubscribe" => match req.param(0).and_then(Value::as_str) {
                Some(id) => {
                    let id = SubscriptionId(id.to_string());
                    Ok(Value::Bool(self.subscriptions.unsubscribe(&id).await))
                }
                None => Err(FilterError::InvalidParams("missing subscription id".into())),
            },
            _ => return None,
        };
        if let Err(e) = &result {
            tracing::debug!(method = %req.method, error = %e, "filter method failed");
        }
        Some(result)
    }

    async fn new_filter(&self, req: &JsonRpcRequest) -> Result<Value, FilterError> {
        let params = match req.param(0) {
            Some(value) => FilterParams::from_value(value.clone())?,
            None => FilterParams::default(),
        };
        self.install(Filter::log(params)).await
    }

    async fn install(&self, filter: Filter) -> Result<Value, FilterError> {
        let id = self.registry.install(filter).await?;
        Ok(Value::String(to_quantity(id)))
    }

    async fn subscribe(&self, req: &JsonRpcRequest) -> Result<Value, FilterError> {
        let kind: SubscriptionKind = req
            .param(0)
            .and_then(Value::as_str)
            .ok_or_else(|| FilterError::InvalidParams("missing subscription type".into()))?
            .parse()?;
        let params = match (kind, req.param(1)) {
            (SubscriptionKind::Logs, Some(value)) => Some(FilterParams::from_value(value.clone())?),
            _ => None,
        };
        let id = self.subscriptions.subscribe(kind, params).await?;
        Ok(Value::String(id.0))
    }

    /// Tear down every filter and subscription.
    pub async fn destroy(&self) {
        self.subscriptions.destroy().await;
        self.registry.destroy_all().await;
    }
}

fn filter_id_param(req: &JsonRpcRequest) -> Result<FilterId, FilterError> {
    let raw = req
        .param(0)
        .and_then(Value::as_str)
        .ok_or_else(|| FilterError::InvalidParams("missing filter id".into()))?;
    parse_hex_quantity(raw).ok_or_else(|| FilterError::InvalidParams(format!("invalid filter id {raw:?}")))
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, FilterError> {
    Ok(serde_json::to_value(value).map_err(TransportError::from)?)
}

#[async_trait]
impl RpcTransport for FilterMiddleware {
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        match self.handle(&req).await {
            Some(Ok(result)) => Ok(JsonRpcResponse::success(req.id, result)),
            Some(Err(e)) => Ok(JsonRpcResponse::failure(req.id, e.to_rpc_error())),
            None => self.upstream.send(req).await,
        }
    }

    fn url(&self) -> &str {
        self.upstream.url()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainfilter_core::{FilterConfig, JsonRpcError, MemoryChain};
    use serde_json::json;

    fn middleware(chain: &Arc<MemoryChain>) -> FilterMiddleware {
        FilterMiddleware::new(Upstream::from_source(chain.clone(), FilterConfig::default())).0
    }

    async fn call(mw: &FilterMiddleware, method: &str, params: Vec<Value>) -> JsonRpcResponse {
        mw.send(JsonRpcRequest::new(1, method, params)).await.unwrap()
    }

    #[tokio::test]
    async fn filter_ids_are_hex_quantities() {
        let chain = MemoryChain::new();
        let mw = middleware(&chain);
        let first = call(&mw, "eth_newBlockFilter", vec![]).await.into_result().unwrap();
        let second = call(&mw, "eth_newFilter", vec![json!({})]).await.into_result().unwrap();
        assert_eq!(first, json!("0x1"));
        assert_eq!(second, json!("0x2"));
    }

    #[tokio::test]
    async fn unknown_filter_is_server_error() {
        let chain = MemoryChain::new();
        let mw = middleware(&chain);
        let err = call(&mw, "eth_getFilterChanges", vec![json!("0x9")])
            .await
            .into_result()
            .unwrap_err();
        assert_eq!(err.code, JsonRpcError::SERVER_ERROR);
        assert_eq!(err.message, "filter not found");

        let removed = call(&mw, "eth_uninstallFilter", vec![json!("0x9")]).await.into_result();
        assert_eq!(removed.unwrap(), json!(false));
    }

    #[tokio::test]
    async fn malformed_params_are_invalid_params() {
        let chain = MemoryChain::new();
        let mw = middleware(&chain);
        for (method, params) in [
            ("eth_getFilterChanges", vec![]),
            ("eth_uninstallFilter", vec![json!("twelve")]),
            ("eth_newFilter", vec![json!({"fromBlock": "soon"})]),
            ("eth_subscribe", vec![json!("syncing")]),
        ] {
            let err = call(&mw, method, params).await.into_result().unwrap_err();
            assert_eq!(err.code, JsonRpcError::INVALID_PARAMS, "{method}");
        }
    }

    #[tokio::test]
    async fn other_methods_are_forwarded() {
        let chain = MemoryChain::new();
        chain.mine();
        let mw = middleware(&chain);
        let head = call(&mw, "eth_blockNumber", vec![]).await.into_result().unwrap();
        assert_eq!(head, json!("0x1"));
        assert_eq!(chain.request_count("eth_blockNumber"), 1);
        assert_eq!(mw.url(), "memory");
    }

    #[tokio::test]
    async fn upstream_failure_during_install_is_internal_error() {
        let chain = MemoryChain::new();
        let mw = middleware(&chain);
        chain.fail_next("eth_getLogs", 1);
        let err = call(&mw, "eth_newFilter", vec![json!({"fromBlock": "earliest"})])
            .await
            .into_result()
            .unwrap_err();
        assert_eq!(err.code, JsonRpcError::INTERNAL_ERROR);
        assert!(mw.registry().is_empty().await);
    }

    #[tokio::test]
    async fn destroyed_middleware_reports_server_error() {
        let chain = MemoryChain::new();
        let mw = middleware(&chain);
        mw.destroy().await;
        let err = call(&mw, "eth_newBlockFilter", vec![]).await.into_result().unwrap_err();
        assert_eq!(err.code, JsonRpcError::SERVER_ERROR);
    }
}
