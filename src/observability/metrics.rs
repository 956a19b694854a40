//! Metrics collection and exposition.
//!
//! # Metrics
//! - `txl_rpc_requests_total` (counter): requests by endpoint and outcome
//! - `txl_queue_items_total` (counter): terminal queue outcomes
//! - `txl_queue_retries_total` (counter): retries by error kind
//! - `txl_queue_depth` (gauge): waiting items per account
//! - `txl_nonce_reservations_total` (counter): new / reissued / released slots
//! - `txl_confirmations_total` (counter): watcher outcomes
//! - `txl_confirmation_seconds` (histogram): submit to outcome latency
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;
use std::time::Duration;

use alloy::primitives::Address;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder with an HTTP scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_rpc_request(endpoint: &str, outcome: &'static str) {
    counter!("txl_rpc_requests_total", "endpoint" => endpoint.to_string(), "outcome" => outcome)
        .increment(1);
}

pub fn record_queue_item(outcome: &'static str) {
    counter!("txl_queue_items_total", "outcome" => outcome).increment(1);
}

pub fn record_queue_retry(kind: &'static str) {
    counter!("txl_queue_retries_total", "kind" => kind).increment(1);
}

pub fn set_queue_depth(account: Address, depth: usize) {
    gauge!("txl_queue_depth", "account" => account.to_string()).set(depth as f64);
}

pub fn record_nonce_reservation(action: &'static str) {
    counter!("txl_nonce_reservations_total", "action" => action).increment(1);
}

pub fn record_confirmation(outcome: &'static str, elapsed: Duration) {
    counter!("txl_confirmations_total", "outcome" => outcome).increment(1);
    histogram!("txl_confirmation_seconds").record(elapsed.as_secs_f64());
}
