//! Configuration schema definitions.
//!
//! Every section has defaults, so an empty file is a valid configuration
//! pointing at a local node.

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};

use crate::router::SwitchMode;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct TxConfig {
    /// RPC endpoints and selection.
    pub router: RouterConfig,

    /// Chain reads and gas defaults.
    pub chain: ChainConfig,

    /// Nonce reservation limits.
    pub nonce: NonceConfig,

    /// Queue retry behaviour.
    pub queue: QueueConfig,

    /// Confirmation polling.
    pub confirm: ConfirmConfig,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,

    /// Sender used when a caller names none.
    pub default_account: Option<Address>,
}

/// One configured endpoint: either `"16/http://host:8545"` or a table.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum EndpointEntry {
    Spec(String),
    Detailed { url: String, priority: Option<u32> },
}

impl EndpointEntry {
    pub fn spec(&self) -> &str {
        match self {
            EndpointEntry::Spec(spec) => spec,
            EndpointEntry::Detailed { url, .. } => url,
        }
    }

    pub fn priority(&self) -> Option<u32> {
        match self {
            EndpointEntry::Spec(_) => None,
            EndpointEntry::Detailed { priority, .. } => *priority,
        }
    }
}

/// Endpoint router configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RouterConfig {
    pub endpoints: Vec<EndpointEntry>,

    /// `random` (weighted) or `fixed`.
    pub switch_mode: SwitchMode,

    /// Index used in fixed mode.
    pub fixed_index: usize,

    /// HTTP request timeout.
    pub request_timeout_secs: u64,

    /// Log every request at debug level.
    pub log_requests: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            endpoints: vec![EndpointEntry::Spec("http://127.0.0.1:8545".to_string())],
            switch_mode: SwitchMode::Random,
            fixed_index: 0,
            request_timeout_secs: 300,
            log_requests: false,
        }
    }
}

/// Chain reader configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ChainConfig {
    /// Expected chain id, checked at startup when set.
    pub chain_id: Option<u64>,

    pub block_number_timeout_secs: u64,

    /// Timeout for the other reads.
    pub read_timeout_secs: u64,

    /// Timeout for broadcasts.
    pub send_timeout_secs: u64,

    pub gas_price_cache_secs: u64,

    /// Used when the node reports a zero gas price.
    pub default_gas_price: u128,

    /// Gas limit = estimate × multiplier.
    pub gas_limit_multiplier: f64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            chain_id: None,
            block_number_timeout_secs: 10,
            read_timeout_secs: 10,
            send_timeout_secs: 60,
            gas_price_cache_secs: 5,
            default_gas_price: 100_000,
            gas_limit_multiplier: 1.2,
        }
    }
}

/// Nonce allocator configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct NonceConfig {
    /// Reservation lifetime when the caller gives none.
    pub reservation_ttl_secs: u64,

    /// Gas floor bump applied when an expired slot is re-issued.
    pub gas_bump_percent: u32,

    /// Maximum reservations held per account.
    pub max_in_flight: usize,
}

impl Default for NonceConfig {
    fn default() -> Self {
        Self {
            reservation_ttl_secs: 120,
            gas_bump_percent: 10,
            max_in_flight: 64,
        }
    }
}

/// Transaction queue configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct QueueConfig {
    /// Retries granted when the caller gives none.
    pub default_retry: u32,

    pub retry_delay_ms: u64,

    pub max_retry_delay_ms: u64,

    /// Pause after a failed reservation or when no slot is free.
    pub idle_poll_ms: u64,

    /// Treat block-range exceeded and confirmation timeout as retryable.
    pub retry_on_confirmation_failure: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default_retry: 0,
            retry_delay_ms: 1_000,
            max_retry_delay_ms: 30_000,
            idle_poll_ms: 1_000,
            retry_on_confirmation_failure: false,
        }
    }
}

/// Confirmation watcher configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ConfirmConfig {
    pub timeout_secs: u64,

    /// Blocks to wait past the submission block.
    pub block_range: u64,

    pub poll_interval_ms: u64,
}

impl Default for ConfirmConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            block_range: 32,
            poll_interval_ms: 10_000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
