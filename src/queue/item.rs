//! Queue items and the caller-side handle.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use alloy::primitives::Address;
use futures_util::future::BoxFuture;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::chain::error::{TxError, TxResult};
use crate::nonce::Reservation;

/// Identifier handed back by `push`, used for `cancel`.
pub type ItemId = u64;

/// Per-item submission settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushOptions {
    pub account: Address,
    /// Retries allowed after the first attempt.
    pub retry: u32,
    /// Base retry delay; the queue default applies when unset.
    pub retry_delay: Option<Duration>,
    /// Deadline for the item to start executing, measured from `push`.
    pub timeout: Option<Duration>,
    /// Lifetime of the nonce reservation taken for each attempt.
    pub reservation_ttl: Option<Duration>,
}

impl PushOptions {
    pub fn new(account: Address) -> Self {
        Self {
            account,
            retry: 0,
            retry_delay: None,
            timeout: None,
            reservation_ttl: None,
        }
    }

    pub fn retry(mut self, retry: u32) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn reservation_ttl(mut self, ttl: Duration) -> Self {
        self.reservation_ttl = Some(ttl);
        self
    }
}

/// Type-erased caller work plus its reply channel.
pub(crate) trait Job: Send + Sync {
    /// Run one attempt. A successful attempt resolves the caller.
    fn attempt(&mut self, reservation: Reservation) -> BoxFuture<'_, TxResult<()>>;

    /// Reject the caller with a terminal error.
    fn reject(self: Box<Self>, error: TxError);

    /// Whether the caller stopped waiting.
    fn is_abandoned(&self) -> bool;
}

struct TypedJob<T, W> {
    work: W,
    reply: Option<oneshot::Sender<TxResult<T>>>,
}

impl<T, W, Fut> Job for TypedJob<T, W>
where
    T: Send + 'static,
    W: FnMut(Reservation) -> Fut + Send + Sync,
    Fut: Future<Output = TxResult<T>> + Send + 'static,
{
    fn attempt(&mut self, reservation: Reservation) -> BoxFuture<'_, TxResult<()>> {
        let fut = (self.work)(reservation);
        Box::pin(async move {
            let value = fut.await?;
            if let Some(reply) = self.reply.take() {
                let _ = reply.send(Ok(value));
            }
            Ok(())
        })
    }

    fn reject(mut self: Box<Self>, error: TxError) {
        if let Some(reply) = self.reply.take() {
            let _ = reply.send(Err(error));
        }
    }

    fn is_abandoned(&self) -> bool {
        self.reply.as_ref().map_or(true, |reply| reply.is_closed())
    }
}

/// One pending submission, owned by its account queue.
pub(crate) struct QueueItem {
    pub id: ItemId,
    pub account: Address,
    /// Retries left under the normal budget.
    pub retries_left: u32,
    /// Set once the insufficient-funds extra attempt has been spent.
    pub extra_attempt_used: bool,
    pub attempts: u32,
    pub retry_delay: Duration,
    pub not_before: Instant,
    pub deadline: Option<Instant>,
    pub reservation_ttl: Option<Duration>,
    /// Slot kept from a failed attempt, reused by the next one.
    pub held: Option<Reservation>,
    pub job: Box<dyn Job>,
}

impl QueueItem {
    pub fn new<T, W, Fut>(
        id: ItemId,
        options: &PushOptions,
        default_retry_delay: Duration,
        work: W,
    ) -> (Self, Submission<T>)
    where
        T: Send + 'static,
        W: FnMut(Reservation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TxResult<T>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let now = Instant::now();
        let item = Self {
            id,
            account: options.account,
            retries_left: options.retry,
            extra_attempt_used: false,
            attempts: 0,
            retry_delay: options.retry_delay.unwrap_or(default_retry_delay),
            not_before: now,
            deadline: options.timeout.map(|t| now + t),
            reservation_ttl: options.reservation_ttl,
            held: None,
            job: Box::new(TypedJob {
                work,
                reply: Some(tx),
            }),
        };
        (item, Submission { id, rx })
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| d <= now)
    }

    pub fn reject(self, error: TxError) {
        self.job.reject(error);
    }
}

impl std::fmt::Debug for QueueItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueItem")
            .field("id", &self.id)
            .field("account", &self.account)
            .field("retries_left", &self.retries_left)
            .field("attempts", &self.attempts)
            .field("not_before", &self.not_before)
            .field("deadline", &self.deadline)
            .field("held", &self.held.as_ref().map(|r| r.nonce))
            .finish()
    }
}

/// Caller handle for a pushed item. Resolves with the work's value or the
/// final classified error.
#[derive(Debug)]
pub struct Submission<T> {
    id: ItemId,
    rx: oneshot::Receiver<TxResult<T>>,
}

impl<T> Submission<T> {
    pub fn id(&self) -> ItemId {
        self.id
    }
}

impl<T> Future for Submission<T> {
    type Output = TxResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(TxError::Dropped)),
            Poll::Pending => Poll::Pending,
        }
    }
}
