//! RPC endpoint abstraction.
//!
//! # Responsibilities
//! - Represent a single node endpoint with its selection priority
//! - Own the transport used to reach it
//! - Track request outcomes for diagnostics

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::chain::error::{TxError, TxResult};
use crate::router::transport::{HttpTransport, Transport};

/// Counters kept per endpoint.
#[derive(Debug, Default)]
pub struct EndpointStats {
    pub requests: AtomicU64,
    pub transport_failures: AtomicU64,
    pub rpc_errors: AtomicU64,
}

/// Point-in-time copy of [`EndpointStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub requests: u64,
    pub transport_failures: u64,
    pub rpc_errors: u64,
}

/// A single RPC endpoint.
pub struct Endpoint {
    url: String,
    /// Relative draw weight, never below 1.
    priority: u32,
    transport: Arc<dyn Transport>,
    stats: EndpointStats,
}

impl Endpoint {
    /// Create an endpoint around an existing transport.
    pub fn new(url: impl Into<String>, priority: u32, transport: Arc<dyn Transport>) -> Self {
        Self {
            url: url.into(),
            priority: priority.max(1),
            transport,
            stats: EndpointStats::default(),
        }
    }

    /// Build an HTTP endpoint from a configured endpoint string.
    ///
    /// The string may carry a `"<priority>/"` prefix, e.g. `16/http://10.0.0.1:8545`.
    /// An explicit `priority` overrides the prefix.
    pub fn http(spec: &str, priority: Option<u32>, timeout: Duration) -> TxResult<Self> {
        let (prefixed, url_str) = Self::parse_spec(spec);
        let url: url::Url = url_str
            .parse()
            .map_err(|e| TxError::Config(format!("Invalid RPC URL '{}': {}", url_str, e)))?;

        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(TxError::Config(format!(
                    "Unsupported RPC scheme '{}' for {}",
                    other, url_str
                )))
            }
        }

        let transport = HttpTransport::new(url, timeout)
            .map_err(|e| TxError::Config(format!("Cannot create transport for {}: {}", url_str, e)))?;

        Ok(Self::new(
            url_str,
            priority.unwrap_or(prefixed),
            Arc::new(transport),
        ))
    }

    /// Split an endpoint string into `(priority, url)`.
    pub fn parse_spec(spec: &str) -> (u32, &str) {
        let spec = spec.trim();
        if let Some((prefix, rest)) = spec.split_once('/') {
            if !prefix.is_empty() && prefix.bytes().all(|b| b.is_ascii_digit()) {
                let priority = prefix.parse::<u32>().unwrap_or(1).max(1);
                return (priority, rest);
            }
        }
        (1, spec)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn record_success(&self) {
        self.stats.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transport_failure(&self) {
        self.stats.requests.fetch_add(1, Ordering::Relaxed);
        self.stats.transport_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rpc_error(&self) {
        self.stats.requests.fetch_add(1, Ordering::Relaxed);
        self.stats.rpc_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests: self.stats.requests.load(Ordering::Relaxed),
            transport_failures: self.stats.transport_failures.load(Ordering::Relaxed),
            rpc_errors: self.stats.rpc_errors.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("url", &self.url)
            .field("priority", &self.priority)
            .field("stats", &self.stats())
            .finish()
    }
}
