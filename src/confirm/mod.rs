//! Receipt polling until a transaction resolves.

pub mod watcher;

pub use watcher::{ConfirmationWatcher, HashHook, Outcome, PendingTransaction, WatchOptions};
