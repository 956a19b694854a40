//! Retry pacing for the transaction queue.

pub mod backoff;
