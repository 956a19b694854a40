//! Error taxonomy for the transaction lifecycle.
//!
//! Every failure the queue can observe is a [`TxError`]. The queue never
//! parses messages itself: it asks the error for its [`ErrorKind`], its
//! [`Disposition`] and whether the nonce reservation it held should be
//! released.

use std::time::Duration;

use alloy::primitives::{Bytes, TxHash};
use serde_json::Value;
use thiserror::Error;

use crate::chain::revert::decode_revert_reason;
use crate::chain::types::TxReceipt;
use crate::router::jsonrpc::RpcErrorObject;

/// JSON-RPC code some gateways return when their upstream timed out.
const RPC_TIMEOUT_CODE: i64 = -32065;

/// JSON-RPC code geth uses for `execution reverted` with revert data.
const RPC_REVERT_CODE: i64 = 3;

/// Result type for lifecycle operations.
pub type TxResult<T> = Result<T, TxError>;

/// Classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Endpoint unreachable or the connection broke.
    Transport,
    /// A request did not answer in time.
    Timeout,
    /// Well-formed JSON-RPC error without a more specific meaning.
    Rpc,
    /// Execution reverted before the transaction was mined.
    Reverted,
    /// Mined, but the receipt status is failed.
    StatusFailed,
    /// Sender balance does not cover value + gas.
    InsufficientFunds,
    /// Node rejected the nonce (too low, underpriced replacement, duplicate).
    NonceConflict,
    /// Receipt did not show up within the permitted block window.
    BlockRangeExceeded,
    /// Receipt did not show up before the wall-clock deadline.
    ConfirmationTimeout,
    /// Item waited in the queue past its own deadline.
    QueueTimeout,
    /// Caller cancelled the item while it was queued.
    Cancelled,
    /// Missing signer, empty endpoint list, chain mismatch.
    Configuration,
    /// Anything that could not be classified.
    Unknown,
}

impl ErrorKind {
    /// Stable label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transport => "transport",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Rpc => "rpc",
            ErrorKind::Reverted => "reverted",
            ErrorKind::StatusFailed => "status_failed",
            ErrorKind::InsufficientFunds => "insufficient_funds",
            ErrorKind::NonceConflict => "nonce_conflict",
            ErrorKind::BlockRangeExceeded => "block_range_exceeded",
            ErrorKind::ConfirmationTimeout => "confirmation_timeout",
            ErrorKind::QueueTimeout => "queue_timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the queue does with a failed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Retry while the item has budget left, then reject.
    Retry,
    /// Retry while budget is left, plus one forced extra attempt.
    RetryOnceMore,
    /// Retry regardless of budget.
    ForceRetry,
    /// Reject immediately.
    Fatal,
}

/// Errors produced by the router, reader, allocator, queue and watcher.
#[derive(Debug, Clone, Error)]
pub enum TxError {
    #[error("transport error from {endpoint}: {message}")]
    Transport { endpoint: String, message: String },

    #[error("{method} to {endpoint} timed out after {after:?}")]
    RequestTimeout {
        endpoint: String,
        method: String,
        after: Duration,
    },

    #[error("RPC error {code} from {endpoint}: {message}")]
    Rpc {
        endpoint: String,
        code: i64,
        message: String,
    },

    #[error("execution reverted{}", reason_suffix(.reason))]
    Reverted {
        endpoint: String,
        reason: Option<String>,
        data: Option<Bytes>,
    },

    #[error("transaction {} mined with failed status", .receipt.transaction_hash)]
    StatusFailed { receipt: Box<TxReceipt> },

    #[error("insufficient funds reported by {endpoint}: {message}")]
    InsufficientFunds { endpoint: String, message: String },

    #[error("nonce rejected by {endpoint}: {message}")]
    NonceConflict { endpoint: String, message: String },

    #[error("transaction {tx_hash} not mined by block {limit_block} (chain at {current_block})")]
    BlockRangeExceeded {
        tx_hash: TxHash,
        limit_block: u64,
        current_block: u64,
    },

    #[error("transaction {tx_hash} not confirmed within {after:?}")]
    ConfirmationTimeout { tx_hash: TxHash, after: Duration },

    #[error("queued item {id} timed out before execution")]
    QueueTimeout { id: u64 },

    #[error("queued item {id} was cancelled")]
    Cancelled { id: u64 },

    #[error("no signer configured")]
    SignerMissing,

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("no RPC endpoints configured")]
    NoEndpoints,

    #[error("chain ID mismatch: expected {expected}, got {actual}")]
    ChainMismatch { expected: u64, actual: u64 },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid response from {endpoint}: {message}")]
    InvalidResponse { endpoint: String, message: String },

    #[error("queue dropped the item before it resolved")]
    Dropped,

    #[error("{0}")]
    Other(String),
}

fn reason_suffix(reason: &Option<String>) -> String {
    reason
        .as_deref()
        .map(|r| format!(": {}", r))
        .unwrap_or_default()
}

impl TxError {
    /// Wrap an opaque failure from caller-supplied work.
    pub fn other(message: impl std::fmt::Display) -> Self {
        TxError::Other(message.to_string())
    }

    /// Convert a JSON-RPC error object into the most specific variant.
    pub fn from_rpc(endpoint: &str, method: &str, error: RpcErrorObject) -> Self {
        let endpoint = endpoint.to_string();
        let lower = error.message.to_lowercase();

        if error.code == RPC_TIMEOUT_CODE {
            return TxError::RequestTimeout {
                endpoint,
                method: method.to_string(),
                after: Duration::ZERO,
            };
        }
        if lower.contains("insufficient funds") {
            return TxError::InsufficientFunds {
                endpoint,
                message: error.message,
            };
        }
        if error.code == RPC_REVERT_CODE || lower.contains("execution reverted") {
            let data = revert_data(error.data.as_ref());
            let reason = data
                .as_ref()
                .and_then(|d| decode_revert_reason(d))
                .or_else(|| reason_from_message(&error.message));
            return TxError::Reverted {
                endpoint,
                reason,
                data,
            };
        }
        if lower.contains("nonce too low")
            || lower.contains("replacement transaction underpriced")
            || lower.contains("already known")
        {
            return TxError::NonceConflict {
                endpoint,
                message: error.message,
            };
        }
        TxError::Rpc {
            endpoint,
            code: error.code,
            message: error.message,
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TxError::Transport { .. } => ErrorKind::Transport,
            TxError::RequestTimeout { .. } => ErrorKind::Timeout,
            TxError::Rpc { .. } => ErrorKind::Rpc,
            TxError::Reverted { .. } => ErrorKind::Reverted,
            TxError::StatusFailed { .. } => ErrorKind::StatusFailed,
            TxError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            TxError::NonceConflict { .. } => ErrorKind::NonceConflict,
            TxError::BlockRangeExceeded { .. } => ErrorKind::BlockRangeExceeded,
            TxError::ConfirmationTimeout { .. } => ErrorKind::ConfirmationTimeout,
            TxError::QueueTimeout { .. } => ErrorKind::QueueTimeout,
            TxError::Cancelled { .. } => ErrorKind::Cancelled,
            TxError::SignerMissing
            | TxError::Signing(_)
            | TxError::NoEndpoints
            | TxError::ChainMismatch { .. }
            | TxError::Config(_) => ErrorKind::Configuration,
            TxError::InvalidResponse { .. } | TxError::Dropped | TxError::Other(_) => {
                ErrorKind::Unknown
            }
        }
    }

    /// Decide how the queue treats this failure.
    ///
    /// `retry_confirmation_failures` turns block-range and confirmation
    /// timeouts from fatal into budget-retryable.
    pub fn disposition(&self, retry_confirmation_failures: bool) -> Disposition {
        match self.kind() {
            ErrorKind::Transport
            | ErrorKind::Timeout
            | ErrorKind::Rpc
            | ErrorKind::Reverted
            | ErrorKind::StatusFailed
            | ErrorKind::NonceConflict => Disposition::Retry,
            ErrorKind::InsufficientFunds => Disposition::RetryOnceMore,
            ErrorKind::BlockRangeExceeded | ErrorKind::ConfirmationTimeout => {
                if retry_confirmation_failures {
                    Disposition::Retry
                } else {
                    Disposition::Fatal
                }
            }
            ErrorKind::QueueTimeout | ErrorKind::Cancelled | ErrorKind::Configuration => {
                Disposition::Fatal
            }
            ErrorKind::Unknown => Disposition::ForceRetry,
        }
    }

    /// Whether the nonce reservation held during the failed attempt goes
    /// back to the allocator right away.
    ///
    /// Transport faults, generic RPC errors, nonce conflicts and unknown
    /// errors keep the slot until it expires: the transaction may still
    /// be travelling to the mempool.
    pub fn releases_reservation(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Reverted
                | ErrorKind::StatusFailed
                | ErrorKind::InsufficientFunds
                | ErrorKind::BlockRangeExceeded
                | ErrorKind::ConfirmationTimeout
                | ErrorKind::Configuration
        )
    }

    /// The receipt attached to a failed-status error.
    pub fn receipt(&self) -> Option<&TxReceipt> {
        match self {
            TxError::StatusFailed { receipt } => Some(receipt),
            _ => None,
        }
    }
}

/// Revert payload from the `data` member of a JSON-RPC error.
///
/// Nodes put it either directly as a hex string or nested as `{ "data": "0x.." }`.
fn revert_data(data: Option<&Value>) -> Option<Bytes> {
    let raw = match data? {
        Value::String(s) => s.as_str(),
        Value::Object(map) => map.get("data")?.as_str()?,
        _ => return None,
    };
    raw.parse::<Bytes>().ok()
}

fn reason_from_message(message: &str) -> Option<String> {
    let (_, reason) = message.split_once("execution reverted:")?;
    let reason = reason.trim();
    (!reason.is_empty()).then(|| reason.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rpc(code: i64, message: &str, data: Option<Value>) -> RpcErrorObject {
        RpcErrorObject {
            code,
            message: message.to_string(),
            data,
        }
    }

    #[test]
    fn test_insufficient_funds_classification() {
        let err = TxError::from_rpc(
            "http://a",
            "eth_sendRawTransaction",
            rpc(-32000, "insufficient funds for gas * price + value", None),
        );
        assert_eq!(err.kind(), ErrorKind::InsufficientFunds);
        assert_eq!(err.disposition(false), Disposition::RetryOnceMore);
        assert!(err.releases_reservation());
    }

    #[test]
    fn test_revert_reason_from_data() {
        // Error(string) with reason "nope"
        let data = "0x08c379a0\
            0000000000000000000000000000000000000000000000000000000000000020\
            0000000000000000000000000000000000000000000000000000000000000004\
            6e6f706500000000000000000000000000000000000000000000000000000000";
        let err = TxError::from_rpc(
            "http://a",
            "eth_estimateGas",
            rpc(3, "execution reverted", Some(json!(data))),
        );
        match &err {
            TxError::Reverted { reason, data, .. } => {
                assert_eq!(reason.as_deref(), Some("nope"));
                assert!(data.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(err.to_string(), "execution reverted: nope");
    }

    #[test]
    fn test_revert_reason_from_message() {
        let err = TxError::from_rpc(
            "http://a",
            "eth_estimateGas",
            rpc(-32000, "execution reverted: Ownable: caller is not the owner", None),
        );
        match err {
            TxError::Reverted { reason, .. } => {
                assert_eq!(reason.as_deref(), Some("Ownable: caller is not the owner"))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_gateway_timeout_code() {
        let err = TxError::from_rpc("http://a", "eth_blockNumber", rpc(-32065, "timeout", None));
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(!err.releases_reservation());
    }

    #[test]
    fn test_nonce_conflict_keeps_reservation() {
        let err = TxError::from_rpc("http://a", "eth_sendRawTransaction", rpc(-32000, "nonce too low", None));
        assert_eq!(err.kind(), ErrorKind::NonceConflict);
        assert_eq!(err.disposition(false), Disposition::Retry);
        assert!(!err.releases_reservation());
    }

    #[test]
    fn test_confirmation_failures_fatal_by_default() {
        let err = TxError::BlockRangeExceeded {
            tx_hash: TxHash::ZERO,
            limit_block: 10,
            current_block: 11,
        };
        assert_eq!(err.disposition(false), Disposition::Fatal);
        assert_eq!(err.disposition(true), Disposition::Retry);
        assert!(err.releases_reservation());
    }

    #[test]
    fn test_unknown_forces_retry() {
        let err = TxError::other("socket hang up");
        assert_eq!(err.kind(), ErrorKind::Unknown);
        assert_eq!(err.disposition(false), Disposition::ForceRetry);
    }
}
