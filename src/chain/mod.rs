//! Chain access: reader, shared types and the error taxonomy.

pub mod cache;
pub mod client;
pub mod error;
pub mod revert;
pub mod types;

pub use client::ChainReader;
pub use error::{Disposition, ErrorKind, TxError, TxResult};
pub use types::{ChainId, SignedTx, TxReceipt, TxSkeleton};
