//! Observability: structured logs and metrics.
//!
//! ```text
//! router, allocator, queue, watcher
//!     → tracing events (account, nonce, tx_hash, item_id, endpoint)
//!     → metrics facade → Prometheus exporter (optional)
//! ```

pub mod logging;
pub mod metrics;
