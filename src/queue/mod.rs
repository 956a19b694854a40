//! Per-account submission queue with bounded retry.

pub mod item;
pub mod transaction_queue;
pub(crate) mod worker;

pub use item::{ItemId, PushOptions, Submission};
pub use transaction_queue::{QueueSettings, TransactionQueue};
