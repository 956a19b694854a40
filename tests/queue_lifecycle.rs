//! Queue, allocator and retry behaviour against an in-memory node.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::primitives::{Address, TxHash};
use tx_lifecycle::nonce::Reservation;
use tx_lifecycle::{ErrorKind, PushOptions, TxError, TxReceipt};

mod common;

use common::{manager, test_config, FakeNode};

const ACCOUNT: Address = Address::repeat_byte(0xaa);

fn rpc_error() -> TxError {
    TxError::Rpc {
        endpoint: "fake://node".into(),
        code: -32000,
        message: "header not found".into(),
    }
}

fn transport_error() -> TxError {
    TxError::Transport {
        endpoint: "fake://node".into(),
        message: "connection reset".into(),
    }
}

fn held_nonces(manager: &tx_lifecycle::TxManager) -> Vec<u64> {
    manager.allocator().held(ACCOUNT).iter().map(|r| r.nonce).collect()
}

fn failed_receipt() -> TxReceipt {
    serde_json::from_value(serde_json::json!({
        "transactionHash": TxHash::repeat_byte(9),
        "blockHash": TxHash::repeat_byte(8),
        "blockNumber": "0x65",
        "status": "0x0",
    }))
    .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_back_to_back_pushes_get_consecutive_nonces() {
    let node = FakeNode::new();
    node.set_nonce(ACCOUNT, 5);
    let manager = manager(&node, &test_config());
    let queue = manager.queue();

    let first = queue.push(PushOptions::new(ACCOUNT), |r: Reservation| async move { Ok(r.nonce) });
    let second = queue.push(PushOptions::new(ACCOUNT), |r: Reservation| async move { Ok(r.nonce) });

    let (a, b) = tokio::join!(second, first);
    assert_eq!(b.unwrap(), 5);
    assert_eq!(a.unwrap(), 6);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_pushes_are_gap_free() {
    let node = FakeNode::new();
    node.set_nonce(ACCOUNT, 40);
    let manager = manager(&node, &test_config());

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let queue = manager.queue().clone();
            tokio::spawn(async move {
                queue
                    .push(PushOptions::new(ACCOUNT), |r: Reservation| async move { Ok(r.nonce) })
                    .await
            })
        })
        .collect();

    let mut nonces = Vec::new();
    for handle in handles {
        nonces.push(handle.await.unwrap().unwrap());
    }
    nonces.sort_unstable();
    assert_eq!(nonces, (40..50).collect::<Vec<u64>>());
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_item_never_reserves() {
    let node = FakeNode::new();
    node.set_nonce(ACCOUNT, 5);
    let manager = manager(&node, &test_config());
    let queue = manager.queue();

    let slow = queue.push(PushOptions::new(ACCOUNT), |r: Reservation| async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok(r.nonce)
    });

    let ran = Arc::new(AtomicU32::new(0));
    let seen = ran.clone();
    let late = queue.push(
        PushOptions::new(ACCOUNT).timeout(Duration::from_secs(1)),
        move |r: Reservation| {
            seen.fetch_add(1, Ordering::SeqCst);
            async move { Ok(r.nonce) }
        },
    );

    let err = late.await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::QueueTimeout);
    assert_eq!(slow.await.unwrap(), 5);
    assert_eq!(ran.load(Ordering::SeqCst), 0);

    let held: Vec<u64> = manager.allocator().held(ACCOUNT).iter().map(|r| r.nonce).collect();
    assert_eq!(held, vec![5]);
}

async fn attempts_until_rejected(error: TxError, retry: u32) -> (u32, TxError) {
    let node = FakeNode::new();
    let manager = manager(&node, &test_config());
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = attempts.clone();

    let result: Result<(), TxError> = manager
        .queue()
        .push(PushOptions::new(ACCOUNT).retry(retry), move |_r: Reservation| {
            counter.fetch_add(1, Ordering::SeqCst);
            let error = error.clone();
            async move { Err(error) }
        })
        .await;

    (attempts.load(Ordering::SeqCst), result.unwrap_err())
}

#[tokio::test(start_paused = true)]
async fn test_retry_budget_exhausted() {
    let (attempts, err) = attempts_until_rejected(rpc_error(), 1).await;
    assert_eq!(attempts, 2);
    assert_eq!(err.kind(), ErrorKind::Rpc);
}

#[tokio::test(start_paused = true)]
async fn test_insufficient_funds_gets_one_extra_attempt() {
    let funds = TxError::InsufficientFunds {
        endpoint: "fake://node".into(),
        message: "insufficient funds for gas * price + value".into(),
    };
    let (generic, _) = attempts_until_rejected(rpc_error(), 2).await;
    let (attempts, err) = attempts_until_rejected(funds, 2).await;
    assert_eq!(attempts, generic + 1);
    assert_eq!(err.kind(), ErrorKind::InsufficientFunds);
}

#[tokio::test(start_paused = true)]
async fn test_confirmation_failure_fatal_by_default() {
    let exceeded = TxError::BlockRangeExceeded {
        tx_hash: TxHash::ZERO,
        limit_block: 102,
        current_block: 103,
    };
    let (attempts, err) = attempts_until_rejected(exceeded, 3).await;
    assert_eq!(attempts, 1);
    assert_eq!(err.kind(), ErrorKind::BlockRangeExceeded);
}

#[tokio::test(start_paused = true)]
async fn test_confirmation_failure_retryable_when_enabled() {
    let node = FakeNode::new();
    let mut config = test_config();
    config.queue.retry_on_confirmation_failure = true;
    let manager = manager(&node, &config);
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = attempts.clone();

    let result: Result<(), TxError> = manager
        .queue()
        .push(PushOptions::new(ACCOUNT).retry(2), move |_r: Reservation| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                Err(TxError::ConfirmationTimeout {
                    tx_hash: TxHash::ZERO,
                    after: Duration::from_secs(300),
                })
            }
        })
        .await;

    assert_eq!(result.unwrap_err().kind(), ErrorKind::ConfirmationTimeout);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_error_forces_retry() {
    let node = FakeNode::new();
    let manager = manager(&node, &test_config());
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = attempts.clone();

    let value = manager
        .queue()
        .push(PushOptions::new(ACCOUNT), move |r: Reservation| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(TxError::other("socket hang up"))
                } else {
                    Ok(r.nonce)
                }
            }
        })
        .await
        .unwrap();

    assert_eq!(value, 0);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_status_failed_releases_reservation() {
    let node = FakeNode::new();
    node.set_nonce(ACCOUNT, 5);
    let manager = manager(&node, &test_config());

    let result: Result<(), TxError> = manager
        .queue()
        .push(PushOptions::new(ACCOUNT), |_r: Reservation| async move {
            Err(TxError::StatusFailed {
                receipt: Box::new(failed_receipt()),
            })
        })
        .await;

    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StatusFailed);
    assert!(err.receipt().is_some());
    assert!(manager.allocator().held(ACCOUNT).is_empty());

    let next = manager.allocator().reserve(ACCOUNT, None).await.unwrap().unwrap();
    assert_eq!(next.nonce, 5);
}

#[tokio::test(start_paused = true)]
async fn test_transport_failure_keeps_reservation() {
    let node = FakeNode::new();
    node.set_nonce(ACCOUNT, 5);
    let manager = manager(&node, &test_config());

    let result: Result<(), TxError> = manager
        .queue()
        .push(PushOptions::new(ACCOUNT), |_r: Reservation| async move {
            Err(TxError::Transport {
                endpoint: "fake://node".into(),
                message: "connection reset".into(),
            })
        })
        .await;

    assert_eq!(result.unwrap_err().kind(), ErrorKind::Transport);
    let held: Vec<u64> = manager.allocator().held(ACCOUNT).iter().map(|r| r.nonce).collect();
    assert_eq!(held, vec![5]);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_only_while_queued() {
    let node = FakeNode::new();
    let manager = manager(&node, &test_config());
    let queue = manager.queue();

    let started = Arc::new(tokio::sync::Notify::new());
    let signal = started.clone();
    let running = queue.push(PushOptions::new(ACCOUNT), move |r: Reservation| {
        let signal = signal.clone();
        async move {
            signal.notify_one();
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(r.nonce)
        }
    });
    let waiting = queue.push(PushOptions::new(ACCOUNT), |r: Reservation| async move { Ok(r.nonce) });

    started.notified().await;
    assert_eq!(queue.pending(ACCOUNT), 1);
    assert!(!queue.cancel(running.id()));
    assert!(queue.cancel(waiting.id()));
    assert!(!queue.cancel(waiting.id()));

    let err = waiting.await.unwrap_err();
    assert!(matches!(err, TxError::Cancelled { .. }));
    assert_eq!(running.await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_loop_stops_when_drained() {
    let node = FakeNode::new();
    let manager = manager(&node, &test_config());
    let queue = manager.queue();

    let order = Arc::new(Mutex::new(Vec::new()));
    let log = order.clone();
    queue
        .push(PushOptions::new(ACCOUNT), move |r: Reservation| {
            log.lock().unwrap().push(r.nonce);
            async move { Ok(()) }
        })
        .await
        .unwrap();

    tokio::task::yield_now().await;
    assert!(!queue.is_running(ACCOUNT));
    assert_eq!(queue.pending(ACCOUNT), 0);
    assert_eq!(queue.unresolved(), 0);
    assert_eq!(*order.lock().unwrap(), vec![0]);
}

#[tokio::test(start_paused = true)]
async fn test_accounts_do_not_block_each_other() {
    let node = FakeNode::new();
    let manager = manager(&node, &test_config());
    let queue = manager.queue();
    let other = Address::repeat_byte(0xbb);

    let slow = queue.push(PushOptions::new(ACCOUNT), |r: Reservation| async move {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(r.nonce)
    });
    let fast = queue.push(PushOptions::new(other), |r: Reservation| async move { Ok(r.nonce) });

    let start = tokio::time::Instant::now();
    assert_eq!(fast.await.unwrap(), 0);
    assert!(start.elapsed() < Duration::from_secs(60));
    assert!(queue.is_running(ACCOUNT));
    assert_eq!(slow.await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_retry_reuses_own_nonce() {
    let node = FakeNode::new();
    node.set_nonce(ACCOUNT, 7);
    let manager = manager(&node, &test_config());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();

    let nonce = manager
        .queue()
        .push(PushOptions::new(ACCOUNT).retry(3), move |r: Reservation| {
            let mut log = log.lock().unwrap();
            log.push(r.nonce);
            let fail = log.len() < 3;
            async move {
                if fail {
                    Err(TxError::Transport {
                        endpoint: "fake://node".into(),
                        message: "connection reset".into(),
                    })
                } else {
                    Ok(r.nonce)
                }
            }
        })
        .await
        .unwrap();

    assert_eq!(nonce, 7);
    assert_eq!(*seen.lock().unwrap(), vec![7, 7, 7]);
    assert_eq!(manager.allocator().held(ACCOUNT).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_after_retry_releases_kept_slot() {
    let node = FakeNode::new();
    node.set_nonce(ACCOUNT, 5);
    let manager = manager(&node, &test_config());
    let queue = manager.queue();

    let failed = Arc::new(tokio::sync::Notify::new());
    let signal = failed.clone();
    let retried = queue.push(PushOptions::new(ACCOUNT).retry(3), move |_r: Reservation| {
        signal.notify_one();
        async move { Err::<u64, TxError>(transport_error()) }
    });

    failed.notified().await;
    assert_eq!(held_nonces(&manager), vec![5]);
    assert_eq!(queue.pending(ACCOUNT), 1);

    assert!(queue.cancel(retried.id()));
    assert!(matches!(retried.await, Err(TxError::Cancelled { .. })));
    assert!(held_nonces(&manager).is_empty());

    let next = queue.push(PushOptions::new(ACCOUNT), |r: Reservation| async move { Ok(r.nonce) });
    assert_eq!(next.await.unwrap(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_after_retry_releases_kept_slot() {
    let node = FakeNode::new();
    node.set_nonce(ACCOUNT, 5);
    let manager = manager(&node, &test_config());
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = attempts.clone();

    let options = PushOptions::new(ACCOUNT)
        .retry(3)
        .retry_delay(Duration::from_secs(5))
        .timeout(Duration::from_secs(1));
    let err = manager
        .queue()
        .push(options, move |_r: Reservation| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Err::<u64, TxError>(transport_error()) }
        })
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::QueueTimeout);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert!(held_nonces(&manager).is_empty());

    let next = manager.allocator().reserve(ACCOUNT, None).await.unwrap().unwrap();
    assert_eq!(next.nonce, 5);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_submission_releases_kept_slot() {
    let node = FakeNode::new();
    node.set_nonce(ACCOUNT, 5);
    let manager = manager(&node, &test_config());
    let queue = manager.queue();

    let attempts = Arc::new(AtomicU32::new(0));
    let counter = attempts.clone();
    let failed = Arc::new(tokio::sync::Notify::new());
    let signal = failed.clone();
    let retried = queue.push(PushOptions::new(ACCOUNT).retry(3), move |_r: Reservation| {
        counter.fetch_add(1, Ordering::SeqCst);
        signal.notify_one();
        async move { Err::<u64, TxError>(transport_error()) }
    });

    failed.notified().await;
    assert_eq!(held_nonces(&manager), vec![5]);
    drop(retried);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert!(held_nonces(&manager).is_empty());
    assert!(!queue.is_running(ACCOUNT));
    assert_eq!(queue.unresolved(), 0);
}
