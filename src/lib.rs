//! Client-side transaction lifecycle for EVM JSON-RPC nodes.
//!
//! ```text
//! caller ─▶ TransactionQueue.push ─▶ NonceAllocator.reserve
//!                 │                         │
//!                 ▼                         ▼
//!          work(reservation) ──▶ EndpointRouter ──▶ node
//!                 │
//!                 ▼
//!        ConfirmationWatcher ──▶ ChainReader ──▶ receipt
//! ```
//!
//! Queue and reservation state lives only in memory and is rebuilt from
//! `eth_getTransactionCount` after a restart.

pub mod chain;
pub mod config;
pub mod confirm;
pub mod lifecycle;
pub mod manager;
pub mod nonce;
pub mod observability;
pub mod queue;
pub mod resilience;
pub mod router;
pub mod signer;

pub use chain::{ErrorKind, TxError, TxReceipt, TxResult, TxSkeleton};
pub use config::TxConfig;
pub use confirm::WatchOptions;
pub use lifecycle::Shutdown;
pub use manager::TxManager;
pub use queue::{PushOptions, Submission};
pub use router::{EndpointRouter, SwitchMode};
