//! Configuration management.
//!
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → TxConfig
//!
//! On change:
//!     watcher.rs detects the write
//!     → loader.rs loads and validates
//!     → new TxConfig over a channel
//!     → binary swaps the router's endpoint list
//! ```

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{
    ChainConfig, ConfirmConfig, EndpointEntry, NonceConfig, ObservabilityConfig, QueueConfig,
    RouterConfig, TxConfig,
};
pub use watcher::ConfigWatcher;
