//! Per-account dequeue loop.
//!
//! One task runs per account while its queue has items. The task is the
//! only caller of `NonceAllocator::reserve` for that account, so slots are
//! granted in dequeue order.

use std::collections::VecDeque;
use std::sync::Arc;

use alloy::primitives::Address;
use tokio::time::{sleep_until, Instant};

use crate::chain::error::{Disposition, TxError, TxResult};
use crate::nonce::Reservation;
use crate::observability::metrics;
use crate::queue::item::QueueItem;
use crate::queue::transaction_queue::QueueInner;
use crate::resilience::backoff::calculate_backoff;

/// Items of one account plus the flag that keeps a single loop alive.
#[derive(Debug, Default)]
pub(crate) struct AccountQueue {
    pub items: VecDeque<QueueItem>,
    pub running: bool,
}

enum Step {
    Exit,
    Idle(Instant),
    Run(QueueItem),
}

/// Drain `account`'s queue until it is empty.
pub(crate) async fn drain(inner: Arc<QueueInner>, account: Address) {
    tracing::debug!(%account, "Dequeue loop started");

    loop {
        let step = next_step(&inner, account);
        let mut item = match step {
            Step::Exit => break,
            Step::Idle(until) => {
                sleep_until(until).await;
                continue;
            }
            Step::Run(item) => item,
        };

        let reservation = match acquire(&inner, &mut item).await {
            Ok(Some(reservation)) => reservation,
            Ok(None) => {
                tracing::debug!(%account, item_id = item.id, "No nonce slot free, waiting");
                requeue_front(&inner, item);
                tokio::time::sleep(inner.settings.idle_poll).await;
                continue;
            }
            Err(e) => {
                tracing::warn!(%account, item_id = item.id, error = %e, "Nonce reservation failed");
                requeue_front(&inner, item);
                tokio::time::sleep(inner.settings.idle_poll).await;
                continue;
            }
        };

        item.attempts += 1;
        tracing::debug!(
            %account,
            item_id = item.id,
            nonce = reservation.nonce,
            attempt = item.attempts,
            "Executing queued item"
        );

        match item.job.attempt(reservation.clone()).await {
            Ok(()) => {
                inner.index.remove(&item.id);
                metrics::record_queue_item("resolved");
                tracing::debug!(%account, item_id = item.id, nonce = reservation.nonce, "Queued item resolved");
            }
            Err(e) => handle_failure(&inner, item, reservation, e),
        }
    }

    tracing::debug!(%account, "Dequeue loop stopped");
}

/// Reuse the slot kept from the previous attempt, else reserve a new one.
async fn acquire(inner: &QueueInner, item: &mut QueueItem) -> TxResult<Option<Reservation>> {
    if let Some(previous) = item.held.take() {
        match inner.allocator.renew(&previous, item.reservation_ttl).await {
            Ok(Some(renewed)) => return Ok(Some(renewed)),
            Ok(None) => tracing::debug!(
                account = %item.account,
                item_id = item.id,
                nonce = previous.nonce,
                "Previous nonce slot gone, reserving a new one"
            ),
            Err(e) => {
                item.held = Some(previous);
                return Err(e);
            }
        }
    }
    inner.allocator.reserve(item.account, item.reservation_ttl).await
}

/// Decide what the loop does next while holding the account's shard lock.
fn next_step(inner: &QueueInner, account: Address) -> Step {
    let now = Instant::now();

    let (abandoned, expired, step) = {
        let Some(mut queue) = inner.accounts.get_mut(&account) else {
            return Step::Exit;
        };

        let mut abandoned = Vec::new();
        let mut expired = Vec::new();
        let mut kept = VecDeque::with_capacity(queue.items.len());
        for item in queue.items.drain(..) {
            if item.job.is_abandoned() {
                abandoned.push(item);
            } else if item.is_expired(now) {
                expired.push(item);
            } else {
                kept.push_back(item);
            }
        }
        queue.items = kept;
        metrics::set_queue_depth(account, queue.items.len());

        let step = match queue.items.front() {
            None => None,
            Some(head) if head.not_before > now => {
                let earliest_deadline = queue.items.iter().filter_map(|i| i.deadline).min();
                let until = earliest_deadline.map_or(head.not_before, |d| d.min(head.not_before));
                Some(Step::Idle(until))
            }
            Some(_) => queue.items.pop_front().map(Step::Run),
        };
        (abandoned, expired, step)
    };

    for mut item in abandoned {
        tracing::debug!(%account, item_id = item.id, "Dropping item nobody awaits");
        inner.index.remove(&item.id);
        inner.release_held(&mut item);
    }

    for mut item in expired {
        inner.index.remove(&item.id);
        inner.release_held(&mut item);
        metrics::record_queue_item("timed_out");
        tracing::warn!(%account, item_id = item.id, "Queued item timed out before execution");
        let id = item.id;
        item.reject(TxError::QueueTimeout { id });
    }

    match step {
        Some(step) => step,
        None => {
            // Remove only if still empty; a concurrent push then starts a new loop.
            if inner
                .accounts
                .remove_if(&account, |_, queue| queue.items.is_empty())
                .is_some()
            {
                Step::Exit
            } else {
                Step::Idle(now)
            }
        }
    }
}

fn requeue_front(inner: &QueueInner, mut item: QueueItem) {
    match inner.accounts.get_mut(&item.account) {
        Some(mut queue) => queue.items.push_front(item),
        None => {
            inner.index.remove(&item.id);
            inner.release_held(&mut item);
            item.reject(TxError::Dropped);
        }
    }
}

fn handle_failure(inner: &QueueInner, mut item: QueueItem, reservation: Reservation, error: TxError) {
    let account = item.account;

    let keeps_slot = !error.releases_reservation();
    if !keeps_slot {
        inner.allocator.release(account, reservation.nonce);
    }

    let disposition = error.disposition(inner.settings.retry_on_confirmation_failure);
    let retry = match disposition {
        Disposition::Retry => spend_retry(&mut item),
        Disposition::RetryOnceMore => {
            spend_retry(&mut item) || !std::mem::replace(&mut item.extra_attempt_used, true)
        }
        Disposition::ForceRetry => {
            tracing::warn!(
                %account,
                item_id = item.id,
                nonce = reservation.nonce,
                error = ?error,
                "Unclassified failure, forcing retry"
            );
            true
        }
        Disposition::Fatal => false,
    };

    let now = Instant::now();
    if retry && !item.is_expired(now) {
        let delay = calculate_backoff(item.attempts, item.retry_delay, inner.settings.max_retry_delay);
        item.not_before = now + delay;
        if keeps_slot {
            item.held = Some(reservation.clone());
        }
        tracing::info!(
            %account,
            item_id = item.id,
            nonce = reservation.nonce,
            kind = %error.kind(),
            retries_left = item.retries_left,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Retrying queued item"
        );
        metrics::record_queue_retry(error.kind().as_str());

        match inner.accounts.get_mut(&account) {
            Some(mut queue) => {
                queue.items.push_back(item);
                return;
            }
            None => {
                inner.index.remove(&item.id);
                inner.release_held(&mut item);
                item.reject(error);
                return;
            }
        }
    }

    inner.index.remove(&item.id);
    metrics::record_queue_item("rejected");
    tracing::warn!(
        %account,
        item_id = item.id,
        nonce = reservation.nonce,
        kind = %error.kind(),
        attempts = item.attempts,
        error = %error,
        "Queued item rejected"
    );
    item.reject(error);
}

fn spend_retry(item: &mut QueueItem) -> bool {
    if item.retries_left > 0 {
        item.retries_left -= 1;
        true
    } else {
        false
    }
}
