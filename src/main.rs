//! tx-lifecycle relay.
//!
//! Reads hex-encoded signed transactions from stdin, one per line,
//! broadcasts each through the endpoint router and prints the receipt
//! (or the classified error) as a JSON line.

use std::path::PathBuf;
use std::sync::Arc;

use alloy::primitives::Bytes;
use tokio::io::{AsyncBufReadExt, BufReader};

use tx_lifecycle::config::{load_config, ConfigWatcher};
use tx_lifecycle::observability::{logging, metrics};
use tx_lifecycle::router::EndpointRouter;
use tx_lifecycle::signer::LocalWallet;
use tx_lifecycle::{Shutdown, TxConfig, TxManager};

const CONFIG_ENV_VAR: &str = "TXL_CONFIG";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var(CONFIG_ENV_VAR).ok())
        .map(PathBuf::from);

    let config = match &config_path {
        Some(path) => load_config(path)?,
        None => TxConfig::default(),
    };

    logging::init_logging(&config.observability.log_level);
    tracing::info!(config = ?config_path, "tx-lifecycle v0.1.0 starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let mut manager = TxManager::from_config(&config)?;
    match LocalWallet::from_env() {
        Ok(wallet) => manager = manager.with_signer(Arc::new(wallet)),
        Err(_) => tracing::debug!("No local key configured, relaying pre-signed transactions only"),
    }

    if let Some(expected) = config.chain.chain_id {
        manager.reader().verify_chain_id(expected).await?;
        tracing::info!(chain_id = expected, "Chain id verified");
    }

    let shutdown = Shutdown::new();
    shutdown.trigger_on_ctrl_c();

    // Keep the watcher handle alive for the lifetime of the process.
    let _watcher = match &config_path {
        Some(path) => {
            let (watcher, mut updates) = ConfigWatcher::new(path);
            let router = manager.router().clone();
            let mut stop = shutdown.subscribe();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        Some(new_config) = updates.recv() => apply_endpoints(&router, &new_config),
                        _ = stop.recv() => break,
                    }
                }
            });
            Some(watcher.run()?)
        }
        None => None,
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stop = shutdown.subscribe();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = stop.recv() => break,
        };
        let Some(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let raw: Bytes = match line.parse() {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping line that is not hex");
                continue;
            }
        };

        let manager = manager.clone();
        tokio::spawn(async move {
            let output = match manager.send_signed(raw, None).await {
                Ok(receipt) => serde_json::json!({ "ok": receipt }),
                Err(e) => serde_json::json!({
                    "error": { "kind": e.kind().as_str(), "message": e.to_string() },
                    "receipt": e.receipt(),
                }),
            };
            println!("{}", output);
        });
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

fn apply_endpoints(router: &EndpointRouter, config: &TxConfig) {
    let result = EndpointRouter::endpoints_from_config(&config.router)
        .and_then(|endpoints| router.replace_endpoints(endpoints));
    match result {
        Ok(()) => {
            router.set_switch_mode(config.router.switch_mode);
            if let Err(e) = router.set_provider_index(config.router.fixed_index) {
                tracing::warn!(error = %e, "Keeping previous provider index");
            }
        }
        Err(e) => tracing::error!(error = %e, "Rejected reloaded endpoint list"),
    }
}
