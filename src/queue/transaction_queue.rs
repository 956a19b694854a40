//! Transaction queue.
//!
//! # Responsibilities
//! - Partition submissions by account, FIFO within an account
//! - Keep at most one item per account executing
//! - Own the retry and back-off state machine
//! - Surface only the final classified outcome to callers

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use dashmap::DashMap;

use crate::chain::error::{TxError, TxResult};
use crate::config::QueueConfig;
use crate::nonce::{NonceAllocator, Reservation};
use crate::observability::metrics;
use crate::queue::item::{ItemId, PushOptions, QueueItem, Submission};
use crate::queue::worker::{drain, AccountQueue};

/// Loop timing and classification switches.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub retry_delay: Duration,
    pub max_retry_delay: Duration,
    pub idle_poll: Duration,
    pub retry_on_confirmation_failure: bool,
}

impl From<&QueueConfig> for QueueSettings {
    fn from(config: &QueueConfig) -> Self {
        Self {
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            max_retry_delay: Duration::from_millis(config.max_retry_delay_ms),
            idle_poll: Duration::from_millis(config.idle_poll_ms),
            retry_on_confirmation_failure: config.retry_on_confirmation_failure,
        }
    }
}

#[derive(Debug)]
pub(crate) struct QueueInner {
    pub allocator: Arc<NonceAllocator>,
    pub accounts: DashMap<Address, AccountQueue>,
    /// Item id to account, for every item not yet resolved.
    pub index: DashMap<ItemId, Address>,
    pub settings: QueueSettings,
    next_id: AtomicU64,
}

impl QueueInner {
    /// Give back the slot a discarded item kept from an earlier attempt.
    pub(crate) fn release_held(&self, item: &mut QueueItem) {
        if let Some(held) = item.held.take() {
            self.allocator.release(item.account, held.nonce);
        }
    }
}

/// Per-account submission queues sharing one nonce allocator.
#[derive(Debug, Clone)]
pub struct TransactionQueue {
    inner: Arc<QueueInner>,
}

impl TransactionQueue {
    pub fn new(allocator: Arc<NonceAllocator>, settings: QueueSettings) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                allocator,
                accounts: DashMap::new(),
                index: DashMap::new(),
                settings,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.inner.settings
    }

    /// Enqueue `work` for `options.account`.
    ///
    /// `work` runs once per attempt with the nonce reservation granted for
    /// that attempt. Must be called within a tokio runtime.
    pub fn push<T, W, Fut>(&self, options: PushOptions, work: W) -> Submission<T>
    where
        T: Send + 'static,
        W: FnMut(Reservation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TxResult<T>> + Send + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let account = options.account;
        let (item, submission) = QueueItem::new(id, &options, self.inner.settings.retry_delay, work);

        self.inner.index.insert(id, account);

        let (start, depth) = {
            let mut queue = self.inner.accounts.entry(account).or_default();
            queue.items.push_back(item);
            let start = !queue.running;
            queue.running = true;
            (start, queue.items.len())
        };
        metrics::set_queue_depth(account, depth);

        tracing::debug!(
            %account,
            item_id = id,
            retry = options.retry,
            timeout = ?options.timeout,
            depth,
            "Item queued"
        );

        if start {
            tokio::spawn(drain(self.inner.clone(), account));
        }
        submission
    }

    /// Cancel an item that has not been dequeued yet.
    ///
    /// A nonce slot the item kept from a failed attempt is released.
    /// Returns `false` once the item is executing or already resolved.
    pub fn cancel(&self, id: ItemId) -> bool {
        let Some(account) = self.inner.index.get(&id).map(|entry| *entry) else {
            return false;
        };

        let item = {
            let Some(mut queue) = self.inner.accounts.get_mut(&account) else {
                return false;
            };
            let Some(pos) = queue.items.iter().position(|item| item.id == id) else {
                return false;
            };
            let item = queue.items.remove(pos);
            metrics::set_queue_depth(account, queue.items.len());
            item
        };

        let Some(mut item) = item else {
            return false;
        };
        self.inner.index.remove(&id);
        self.inner.release_held(&mut item);
        metrics::record_queue_item("cancelled");
        tracing::info!(%account, item_id = id, "Queued item cancelled");
        item.reject(TxError::Cancelled { id });
        true
    }

    /// Items waiting (not executing) for `account`.
    pub fn pending(&self, account: Address) -> usize {
        self.inner
            .accounts
            .get(&account)
            .map(|queue| queue.items.len())
            .unwrap_or(0)
    }

    /// Whether a dequeue loop is alive for `account`.
    pub fn is_running(&self, account: Address) -> bool {
        self.inner
            .accounts
            .get(&account)
            .map(|queue| queue.running)
            .unwrap_or(false)
    }

    /// Items pushed and not yet resolved, across all accounts.
    pub fn unresolved(&self) -> usize {
        self.inner.index.len()
    }

    pub fn allocator(&self) -> &Arc<NonceAllocator> {
        &self.inner.allocator
    }
}
