//! Chain reader.
//!
//! # Responsibilities
//! - Read chain state through the endpoint router
//! - Apply a short timeout to every read
//! - Cache slow-changing values (gas price, chain id)
//! - Broadcast raw or node-signed transactions

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use alloy::primitives::{hex, Address, Bytes, TxHash, U128, U64};
use serde_json::json;

use crate::chain::cache::TtlCache;
use crate::chain::error::{TxError, TxResult};
use crate::chain::types::{ChainId, TxReceipt, TxSkeleton};
use crate::config::ChainConfig;
use crate::router::EndpointRouter;

/// Read-only façade over the endpoint router, plus broadcast.
#[derive(Debug)]
pub struct ChainReader {
    router: Arc<EndpointRouter>,
    block_timeout: Duration,
    read_timeout: Duration,
    send_timeout: Duration,
    default_gas_price: u128,
    gas_price: TtlCache<u128>,
    chain_id: OnceLock<u64>,
}

impl ChainReader {
    pub fn new(router: Arc<EndpointRouter>, config: &ChainConfig) -> Self {
        Self {
            router,
            block_timeout: Duration::from_secs(config.block_number_timeout_secs),
            read_timeout: Duration::from_secs(config.read_timeout_secs),
            send_timeout: Duration::from_secs(config.send_timeout_secs),
            default_gas_price: config.default_gas_price,
            gas_price: TtlCache::new(Duration::from_secs(config.gas_price_cache_secs)),
            chain_id: OnceLock::new(),
        }
    }

    pub fn router(&self) -> &Arc<EndpointRouter> {
        &self.router
    }

    /// Latest block number.
    pub async fn block_number(&self) -> TxResult<u64> {
        let n: U64 = self
            .router
            .request_within("eth_blockNumber", json!([]), self.block_timeout)
            .await?;
        Ok(n.to::<u64>())
    }

    /// Current gas price. A node reporting zero gets the configured default.
    pub async fn gas_price(&self) -> TxResult<u128> {
        if let Some(price) = self.gas_price.get() {
            return Ok(price);
        }
        let price: U128 = self
            .router
            .request_within("eth_gasPrice", json!([]), self.read_timeout)
            .await?;
        let price = match price.to::<u128>() {
            0 => self.default_gas_price,
            p => p,
        };
        self.gas_price.put(price);
        Ok(price)
    }

    /// Chain id, read once and kept.
    pub async fn chain_id(&self) -> TxResult<ChainId> {
        if let Some(id) = self.chain_id.get() {
            return Ok(ChainId(*id));
        }
        let id: U64 = self
            .router
            .request_within("eth_chainId", json!([]), self.read_timeout)
            .await?;
        let id = *self.chain_id.get_or_init(|| id.to::<u64>());
        Ok(ChainId(id))
    }

    /// Fail unless the endpoints serve `expected`.
    pub async fn verify_chain_id(&self, expected: u64) -> TxResult<()> {
        let actual = self.chain_id().await?.0;
        if actual != expected {
            return Err(TxError::ChainMismatch { expected, actual });
        }
        Ok(())
    }

    /// Next nonce for `address` from the latest block.
    pub async fn nonce_at(&self, address: Address) -> TxResult<u64> {
        let n: U64 = self
            .router
            .request_within(
                "eth_getTransactionCount",
                json!([address, "latest"]),
                self.read_timeout,
            )
            .await?;
        Ok(n.to::<u64>())
    }

    /// Receipt for `hash`, `None` while the transaction is pending or unknown.
    pub async fn receipt(&self, hash: TxHash) -> TxResult<Option<TxReceipt>> {
        self.router
            .request_within("eth_getTransactionReceipt", json!([hash]), self.read_timeout)
            .await
    }

    pub async fn estimate_gas(&self, skeleton: &TxSkeleton) -> TxResult<u64> {
        let gas: U64 = self
            .router
            .request_within("eth_estimateGas", json!([skeleton.to_rpc_value()]), self.read_timeout)
            .await?;
        Ok(gas.to::<u64>())
    }

    /// Node-managed accounts.
    pub async fn accounts(&self) -> TxResult<Vec<Address>> {
        self.router
            .request_within("eth_accounts", json!([]), self.read_timeout)
            .await
    }

    /// Broadcast a signed transaction.
    pub async fn send_raw_transaction(&self, raw: &Bytes) -> TxResult<TxHash> {
        self.router
            .request_within(
                "eth_sendRawTransaction",
                json!([hex::encode_prefixed(raw)]),
                self.send_timeout,
            )
            .await
    }

    /// Let the node sign and broadcast with one of its own accounts.
    pub async fn send_transaction(&self, skeleton: &TxSkeleton) -> TxResult<TxHash> {
        self.router
            .request_within(
                "eth_sendTransaction",
                json!([skeleton.to_rpc_value()]),
                self.send_timeout,
            )
            .await
    }
}
