//! Multi-endpoint JSON-RPC routing.
//!
//! Requests go to one endpoint per call, picked by weight or pinned.
//! Every failure carries the URL of the endpoint that produced it.

pub mod endpoint;
pub mod fixed;
pub mod jsonrpc;
pub mod pool;
pub mod transport;
pub mod weighted;

use std::sync::Arc;

pub use endpoint::Endpoint;
pub use pool::{EndpointRouter, SwitchMode};
pub use transport::{HttpTransport, Transport, TransportError};

/// Endpoint selection strategy.
pub trait Selector: Send + Sync + std::fmt::Debug {
    /// Index of the endpoint to use, or `None` if none qualifies.
    fn select(&self, endpoints: &[Arc<Endpoint>], current: usize) -> Option<usize>;
}
