//! Confirmation watcher.
//!
//! # Responsibilities
//! - Poll for the receipt of a submitted transaction
//! - Stop at a wall-clock deadline or after a window of blocks
//! - Produce exactly one terminal outcome per pending transaction

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::TxHash;
use tokio::time::Instant;

use crate::chain::error::{ErrorKind, TxError, TxResult};
use crate::chain::{ChainReader, TxReceipt};
use crate::config::ConfirmConfig;
use crate::observability::metrics;

/// Called with the transaction hash once the node has accepted it.
pub type HashHook = Arc<dyn Fn(TxHash) + Send + Sync>;

/// Limits for one watch, plus an optional hook told the hash as soon as
/// it is known.
#[derive(Clone)]
pub struct WatchOptions {
    pub timeout: Duration,
    /// Blocks to wait past `submitted_at_block`.
    pub block_range: u64,
    /// Block seen at submission; read from the chain when unset.
    pub submitted_at_block: Option<u64>,
    pub on_hash: Option<HashHook>,
}

impl WatchOptions {
    /// Register `hook`; it runs once per broadcast, before confirmation.
    pub fn on_hash<F>(mut self, hook: F) -> Self
    where
        F: Fn(TxHash) + Send + Sync + 'static,
    {
        self.on_hash = Some(Arc::new(hook));
        self
    }

    pub(crate) fn notify_hash(&self, tx_hash: TxHash) {
        if let Some(hook) = &self.on_hash {
            hook(tx_hash);
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn block_range(mut self, block_range: u64) -> Self {
        self.block_range = block_range;
        self
    }

    pub fn submitted_at_block(mut self, block: u64) -> Self {
        self.submitted_at_block = Some(block);
        self
    }
}

impl From<&ConfirmConfig> for WatchOptions {
    fn from(config: &ConfirmConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            block_range: config.block_range,
            submitted_at_block: None,
            on_hash: None,
        }
    }
}

impl std::fmt::Debug for WatchOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchOptions")
            .field("timeout", &self.timeout)
            .field("block_range", &self.block_range)
            .field("submitted_at_block", &self.submitted_at_block)
            .field("on_hash", &self.on_hash.is_some())
            .finish()
    }
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self::from(&ConfirmConfig::default())
    }
}

/// A transaction between acceptance by the network and its outcome.
#[derive(Debug, Clone)]
pub struct PendingTransaction {
    pub tx_hash: TxHash,
    pub submitted_at_block: u64,
    pub started: Instant,
    pub deadline: Instant,
    pub block_range_limit: u64,
    timeout: Duration,
    finished: bool,
}

impl PendingTransaction {
    pub fn new(tx_hash: TxHash, submitted_at_block: u64, timeout: Duration, block_range: u64) -> Self {
        let started = Instant::now();
        Self {
            tx_hash,
            submitted_at_block,
            started,
            deadline: started + timeout,
            block_range_limit: submitted_at_block.saturating_add(block_range),
            timeout,
            finished: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

/// Terminal state of a watch.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Confirmed(TxReceipt),
    /// Mined with a failed status.
    Reverted(TxReceipt),
    TimedOut,
    BlockRangeExceeded { current_block: u64 },
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Confirmed(_) => "confirmed",
            Outcome::Reverted(_) => "reverted",
            Outcome::TimedOut => "timed_out",
            Outcome::BlockRangeExceeded { .. } => "block_range_exceeded",
        }
    }

    /// Receipt on success, the matching error otherwise.
    pub fn into_result(self, pending: &PendingTransaction) -> TxResult<TxReceipt> {
        match self {
            Outcome::Confirmed(receipt) => Ok(receipt),
            Outcome::Reverted(receipt) => Err(TxError::StatusFailed {
                receipt: Box::new(receipt),
            }),
            Outcome::TimedOut => Err(TxError::ConfirmationTimeout {
                tx_hash: pending.tx_hash,
                after: pending.timeout,
            }),
            Outcome::BlockRangeExceeded { current_block } => Err(TxError::BlockRangeExceeded {
                tx_hash: pending.tx_hash,
                limit_block: pending.block_range_limit,
                current_block,
            }),
        }
    }
}

/// Polls the chain reader until a pending transaction resolves.
#[derive(Debug, Clone)]
pub struct ConfirmationWatcher {
    reader: Arc<ChainReader>,
    poll_interval: Duration,
    defaults: WatchOptions,
}

impl ConfirmationWatcher {
    pub fn new(reader: Arc<ChainReader>, config: &ConfirmConfig) -> Self {
        Self {
            reader,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            defaults: WatchOptions::from(config),
        }
    }

    /// Default limits from configuration.
    pub fn defaults(&self) -> WatchOptions {
        self.defaults.clone()
    }

    /// Start tracking `tx_hash`, reading the current block if needed.
    pub async fn begin(&self, tx_hash: TxHash, options: WatchOptions) -> TxResult<PendingTransaction> {
        let block = match options.submitted_at_block {
            Some(block) => block,
            None => self.reader.block_number().await?,
        };
        Ok(PendingTransaction::new(tx_hash, block, options.timeout, options.block_range))
    }

    /// Wait for `tx_hash` to resolve.
    pub async fn watch(&self, tx_hash: TxHash, options: WatchOptions) -> TxResult<TxReceipt> {
        let mut pending = self.begin(tx_hash, options).await?;
        self.wait(&mut pending).await
    }

    /// Poll until `pending` reaches a terminal state.
    pub async fn wait(&self, pending: &mut PendingTransaction) -> TxResult<TxReceipt> {
        loop {
            if let Some(outcome) = self.tick(pending).await {
                return outcome.into_result(pending);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// One poll. Returns the outcome once, `None` while still pending and
    /// on every call after the outcome was produced.
    pub async fn tick(&self, pending: &mut PendingTransaction) -> Option<Outcome> {
        if pending.finished {
            return None;
        }

        let outcome = self.evaluate(pending).await?;
        pending.finished = true;

        let elapsed = pending.started.elapsed();
        metrics::record_confirmation(outcome.label(), elapsed);
        match &outcome {
            Outcome::Confirmed(receipt) => tracing::debug!(
                tx_hash = %pending.tx_hash,
                block = ?receipt.block(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Transaction confirmed"
            ),
            other => tracing::warn!(
                tx_hash = %pending.tx_hash,
                submitted_at_block = pending.submitted_at_block,
                outcome = other.label(),
                "Transaction failed to confirm"
            ),
        }
        Some(outcome)
    }

    async fn evaluate(&self, pending: &PendingTransaction) -> Option<Outcome> {
        match self.reader.receipt(pending.tx_hash).await {
            Ok(Some(receipt)) if receipt.is_mined() => {
                return Some(if receipt.succeeded() {
                    Outcome::Confirmed(receipt)
                } else {
                    Outcome::Reverted(receipt)
                });
            }
            Ok(_) => {}
            Err(e) => log_poll_error(pending.tx_hash, "receipt", &e),
        }

        if Instant::now() >= pending.deadline {
            return Some(Outcome::TimedOut);
        }

        match self.reader.block_number().await {
            Ok(current_block) if current_block > pending.block_range_limit => {
                Some(Outcome::BlockRangeExceeded { current_block })
            }
            Ok(_) => None,
            Err(e) => {
                log_poll_error(pending.tx_hash, "block_number", &e);
                None
            }
        }
    }

    /// Single receipt check, `Some` only for a mined transaction.
    pub async fn find_receipt(&self, tx_hash: TxHash) -> TxResult<Option<TxReceipt>> {
        Ok(self
            .reader
            .receipt(tx_hash)
            .await?
            .filter(TxReceipt::is_mined))
    }
}

fn log_poll_error(tx_hash: TxHash, read: &str, error: &TxError) {
    if error.kind() == ErrorKind::Timeout {
        tracing::warn!(%tx_hash, read, error = %error, "Confirmation poll timed out");
    } else {
        tracing::error!(%tx_hash, read, error = %error, "Confirmation poll failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChainConfig;
    use crate::router::test_support::scripted;
    use crate::router::{EndpointRouter, SwitchMode};
    use serde_json::json;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn watcher(block: Arc<AtomicU64>, receipt: serde_json::Value) -> ConfirmationWatcher {
        let endpoint = scripted("node", 1, move |req| match req.method.as_str() {
            "eth_blockNumber" => Ok(json!(format!("{:#x}", block.fetch_add(1, Ordering::SeqCst)))),
            "eth_getTransactionReceipt" => Ok(receipt.clone()),
            other => Err((-32601, format!("method {other} not found"))),
        });
        let router = EndpointRouter::new(vec![endpoint], SwitchMode::Random).unwrap();
        let reader = ChainReader::new(Arc::new(router), &ChainConfig::default());
        ConfirmationWatcher::new(Arc::new(reader), &ConfirmConfig::default())
    }

    fn receipt(status: &str) -> serde_json::Value {
        json!({
            "transactionHash": TxHash::repeat_byte(1),
            "blockHash": TxHash::repeat_byte(2),
            "blockNumber": "0x65",
            "status": status,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_range_exceeded() {
        let block = Arc::new(AtomicU64::new(101));
        let watcher = watcher(block.clone(), serde_json::Value::Null);
        let options = WatchOptions::default().block_range(2).submitted_at_block(100);

        let err = watcher.watch(TxHash::repeat_byte(1), options).await.unwrap_err();
        match err {
            TxError::BlockRangeExceeded { limit_block, current_block, .. } => {
                assert_eq!(limit_block, 102);
                assert_eq!(current_block, 103);
            }
            other => panic!("unexpected {other:?}"),
        }
        // 101, 102, 103 read; nothing after the terminal state
        assert_eq!(block.load(Ordering::SeqCst), 104);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_status() {
        let watcher = watcher(Arc::new(AtomicU64::new(100)), receipt("0x0"));
        let err = watcher
            .watch(TxHash::repeat_byte(1), WatchOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StatusFailed);
        assert!(err.receipt().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline() {
        let watcher = watcher(Arc::new(AtomicU64::new(100)), serde_json::Value::Null);
        let options = WatchOptions::default()
            .timeout(Duration::from_secs(25))
            .block_range(1_000);
        let err = watcher.watch(TxHash::repeat_byte(1), options).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfirmationTimeout);
    }

    #[tokio::test]
    async fn test_single_outcome() {
        let watcher = watcher(Arc::new(AtomicU64::new(100)), receipt("0x1"));
        let mut pending = watcher
            .begin(TxHash::repeat_byte(1), WatchOptions::default())
            .await
            .unwrap();
        assert!(matches!(watcher.tick(&mut pending).await, Some(Outcome::Confirmed(_))));
        assert!(pending.is_finished());
        assert!(watcher.tick(&mut pending).await.is_none());
    }
}
