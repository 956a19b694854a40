//! Endpoint router.
//!
//! # Responsibilities
//! - Hold the weighted endpoint list (swapped atomically on reload)
//! - Pick one endpoint per request: weighted random or pinned
//! - Tag every failure with the endpoint that produced it
//!
//! The router never retries on another endpoint by itself. Callers that
//! want failover call again and get a fresh draw.

use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::timeout;

use crate::chain::error::{TxError, TxResult};
use crate::config::RouterConfig;
use crate::observability::metrics;
use crate::router::endpoint::Endpoint;
use crate::router::fixed::Fixed;
use crate::router::jsonrpc::{JsonRpcRequest, JsonRpcResponse};
use crate::router::transport::TransportError;
use crate::router::weighted::WeightedRandom;
use crate::router::Selector;

/// How the router picks an endpoint when more than one is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum SwitchMode {
    /// Weighted random draw on every request.
    #[default]
    Random = 0,
    /// Always the pinned index.
    Fixed = 1,
}

impl From<u8> for SwitchMode {
    fn from(val: u8) -> Self {
        match val {
            1 => SwitchMode::Fixed,
            _ => SwitchMode::Random,
        }
    }
}

/// Routes JSON-RPC requests over a set of weighted endpoints.
pub struct EndpointRouter {
    endpoints: ArcSwap<Vec<Arc<Endpoint>>>,
    mode: AtomicU8,
    index: AtomicUsize,
    next_id: AtomicU64,
    weighted: WeightedRandom,
    fixed: Fixed,
    request_timeout: Duration,
    log_requests: bool,
}

impl EndpointRouter {
    /// Create a router over the given endpoints.
    pub fn new(endpoints: Vec<Endpoint>, mode: SwitchMode) -> TxResult<Self> {
        if endpoints.is_empty() {
            return Err(TxError::NoEndpoints);
        }
        Ok(Self {
            endpoints: ArcSwap::from_pointee(endpoints.into_iter().map(Arc::new).collect()),
            mode: AtomicU8::new(mode as u8),
            index: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
            weighted: WeightedRandom::new(),
            fixed: Fixed::new(),
            request_timeout: Duration::from_secs(300),
            log_requests: false,
        })
    }

    /// Build HTTP endpoints from configuration.
    pub fn from_config(config: &RouterConfig) -> TxResult<Self> {
        let endpoints = Self::endpoints_from_config(config)?;
        let router = Self::new(endpoints, config.switch_mode)?
            .with_request_timeout(Duration::from_secs(config.request_timeout_secs))
            .with_request_logging(config.log_requests);
        router.set_provider_index(config.fixed_index)?;

        tracing::info!(
            endpoints = router.len(),
            mode = ?config.switch_mode,
            "Endpoint router initialized"
        );
        Ok(router)
    }

    /// Build the endpoint list described by `config` without touching a router.
    pub fn endpoints_from_config(config: &RouterConfig) -> TxResult<Vec<Endpoint>> {
        let timeout = Duration::from_secs(config.request_timeout_secs);
        config
            .endpoints
            .iter()
            .map(|entry| Endpoint::http(entry.spec(), entry.priority(), timeout))
            .collect()
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn with_request_logging(mut self, enabled: bool) -> Self {
        self.log_requests = enabled;
        self
    }

    pub fn len(&self) -> usize {
        self.endpoints.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.load().is_empty()
    }

    /// Snapshot of the current endpoint list.
    pub fn endpoints(&self) -> Arc<Vec<Arc<Endpoint>>> {
        self.endpoints.load_full()
    }

    pub fn switch_mode(&self) -> SwitchMode {
        SwitchMode::from(self.mode.load(Ordering::Relaxed))
    }

    pub fn set_switch_mode(&self, mode: SwitchMode) {
        self.mode.store(mode as u8, Ordering::Relaxed);
    }

    pub fn provider_index(&self) -> usize {
        self.index.load(Ordering::Relaxed)
    }

    /// Pin the index used in fixed mode. Returns whether it changed.
    pub fn set_provider_index(&self, idx: usize) -> TxResult<bool> {
        let len = self.len();
        if idx >= len {
            return Err(TxError::Config(format!(
                "provider index {} out of range ({} endpoints)",
                idx, len
            )));
        }
        Ok(self.index.swap(idx, Ordering::Relaxed) != idx)
    }

    /// Draw a new index by weight. With `no_duplicates` the current index
    /// is excluded from the draw.
    pub fn set_random_provider_index(&self, no_duplicates: bool) -> bool {
        let endpoints = self.endpoints.load();
        if endpoints.len() < 2 {
            return false;
        }
        let current = self.provider_index();
        let exclude = no_duplicates.then_some(current);
        match self.weighted.draw(&endpoints, exclude) {
            Some(idx) => self.index.swap(idx, Ordering::Relaxed) != idx,
            None => false,
        }
    }

    /// Atomically replace the endpoint list.
    pub fn replace_endpoints(&self, endpoints: Vec<Endpoint>) -> TxResult<()> {
        if endpoints.is_empty() {
            return Err(TxError::NoEndpoints);
        }
        let len = endpoints.len();
        self.endpoints
            .store(Arc::new(endpoints.into_iter().map(Arc::new).collect()));
        if self.provider_index() >= len {
            self.index.store(0, Ordering::Relaxed);
        }
        tracing::info!(endpoints = len, "Endpoint list replaced");
        Ok(())
    }

    /// Pick the endpoint for the next request.
    pub fn select(&self) -> TxResult<Arc<Endpoint>> {
        let endpoints = self.endpoints.load();
        let idx = match endpoints.len() {
            0 => return Err(TxError::NoEndpoints),
            1 => 0,
            _ => match self.switch_mode() {
                SwitchMode::Random => {
                    let idx = self
                        .weighted
                        .select(&endpoints, self.provider_index())
                        .unwrap_or(0);
                    self.index.store(idx, Ordering::Relaxed);
                    idx
                }
                SwitchMode::Fixed => self
                    .fixed
                    .select(&endpoints, self.provider_index())
                    .unwrap_or(0),
            },
        };
        Ok(endpoints[idx].clone())
    }

    /// Forward a request to one endpoint using the default timeout.
    pub async fn send(&self, request: JsonRpcRequest) -> TxResult<JsonRpcResponse> {
        self.dispatch(request, self.request_timeout)
            .await
            .map(|(_, response)| response)
    }

    /// Typed convenience over [`send`](Self::send).
    pub async fn request<T: DeserializeOwned>(&self, method: &str, params: Value) -> TxResult<T> {
        self.request_within(method, params, self.request_timeout).await
    }

    /// Typed request with an explicit timeout.
    pub async fn request_within<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
        limit: Duration,
    ) -> TxResult<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (endpoint, response) = self
            .dispatch(JsonRpcRequest::new(id, method, params), limit)
            .await?;
        let value = response.result.unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(|e| TxError::InvalidResponse {
            endpoint: endpoint.url().to_string(),
            message: format!("{}: {}", method, e),
        })
    }

    async fn dispatch(
        &self,
        request: JsonRpcRequest,
        limit: Duration,
    ) -> TxResult<(Arc<Endpoint>, JsonRpcResponse)> {
        let endpoint = self.select()?;
        let method = request.method.clone();

        if self.log_requests {
            tracing::debug!(
                endpoint = %endpoint.url(),
                method = %method,
                id = request.id,
                params = %request.params,
                "send rpc"
            );
        }

        let outcome = timeout(limit, endpoint.transport().send(request)).await;
        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                endpoint.record_transport_failure();
                metrics::record_rpc_request(endpoint.url(), "transport_error");
                return Err(transport_error(&endpoint, &method, e));
            }
            Err(_) => {
                endpoint.record_transport_failure();
                metrics::record_rpc_request(endpoint.url(), "timeout");
                return Err(TxError::RequestTimeout {
                    endpoint: endpoint.url().to_string(),
                    method,
                    after: limit,
                });
            }
        };

        self.on_result(&endpoint, &response);

        if let Some(error) = response.error {
            return Err(TxError::from_rpc(endpoint.url(), &method, error));
        }
        if response.result.is_none() {
            return Err(TxError::InvalidResponse {
                endpoint: endpoint.url().to_string(),
                message: format!("{}: response carries neither result nor error", method),
            });
        }
        Ok((endpoint, response))
    }

    fn on_result(&self, endpoint: &Endpoint, response: &JsonRpcResponse) {
        if response.error.is_some() {
            endpoint.record_rpc_error();
            metrics::record_rpc_request(endpoint.url(), "rpc_error");
        } else {
            endpoint.record_success();
            metrics::record_rpc_request(endpoint.url(), "ok");
        }
    }
}

fn transport_error(endpoint: &Endpoint, method: &str, error: TransportError) -> TxError {
    let url = endpoint.url().to_string();
    match error {
        TransportError::Timeout(after) => TxError::RequestTimeout {
            endpoint: url,
            method: method.to_string(),
            after,
        },
        TransportError::Decode(message) => TxError::InvalidResponse {
            endpoint: url,
            message,
        },
        other => TxError::Transport {
            endpoint: url,
            message: other.to_string(),
        },
    }
}

impl std::fmt::Debug for EndpointRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointRouter")
            .field("endpoints", &self.endpoints.load())
            .field("mode", &self.switch_mode())
            .field("index", &self.provider_index())
            .finish()
    }
}
