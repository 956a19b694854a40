//! Transaction manager.
//!
//! Wires the router, chain reader, nonce allocator, queue and watcher into
//! the operations callers use: send a signed transaction, sign a skeleton,
//! post a skeleton through the queue, reserve a nonce, watch a hash.

use std::sync::Arc;

use alloy::consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy::eips::eip2718::Encodable2718;
use alloy::primitives::{keccak256, Address, Bytes, TxKind, U256};

use crate::chain::error::{ErrorKind, TxError, TxResult};
use crate::chain::revert::{RevertDecoder, StandardRevertDecoder};
use crate::chain::{ChainReader, SignedTx, TxReceipt, TxSkeleton};
use crate::config::TxConfig;
use crate::confirm::{ConfirmationWatcher, WatchOptions};
use crate::nonce::{NonceAllocator, Reservation};
use crate::queue::{ItemId, PushOptions, QueueSettings, Submission, TransactionQueue};
use crate::router::EndpointRouter;
use crate::signer::Signer;

/// Entry point for submitting and tracking transactions.
#[derive(Clone)]
pub struct TxManager {
    router: Arc<EndpointRouter>,
    reader: Arc<ChainReader>,
    allocator: Arc<NonceAllocator>,
    queue: TransactionQueue,
    watcher: ConfirmationWatcher,
    signer: Option<Arc<dyn Signer>>,
    revert_decoder: Arc<dyn RevertDecoder>,
    default_account: Option<Address>,
    default_retry: u32,
    gas_limit_multiplier: f64,
}

impl TxManager {
    /// Build every component from configuration.
    pub fn from_config(config: &TxConfig) -> TxResult<Self> {
        let router = EndpointRouter::from_config(&config.router)?;
        Ok(Self::new(Arc::new(router), config))
    }

    /// Build on an existing router.
    pub fn new(router: Arc<EndpointRouter>, config: &TxConfig) -> Self {
        let reader = Arc::new(ChainReader::new(router.clone(), &config.chain));
        let allocator = Arc::new(NonceAllocator::new(reader.clone(), &config.nonce));
        let queue = TransactionQueue::new(allocator.clone(), QueueSettings::from(&config.queue));
        let watcher = ConfirmationWatcher::new(reader.clone(), &config.confirm);

        Self {
            router,
            reader,
            allocator,
            queue,
            watcher,
            signer: None,
            revert_decoder: Arc::new(StandardRevertDecoder),
            default_account: config.default_account,
            default_retry: config.queue.default_retry,
            gas_limit_multiplier: config.chain.gas_limit_multiplier,
        }
    }

    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Replace the decoder used for revert payloads without a standard reason.
    pub fn with_revert_decoder(mut self, decoder: Arc<dyn RevertDecoder>) -> Self {
        self.revert_decoder = decoder;
        self
    }

    pub fn router(&self) -> &Arc<EndpointRouter> {
        &self.router
    }

    pub fn reader(&self) -> &Arc<ChainReader> {
        &self.reader
    }

    pub fn allocator(&self) -> &Arc<NonceAllocator> {
        &self.allocator
    }

    pub fn queue(&self) -> &TransactionQueue {
        &self.queue
    }

    pub fn watcher(&self) -> &ConfirmationWatcher {
        &self.watcher
    }

    /// Configured account, else the signer's first, else the node's first.
    pub async fn default_account(&self) -> TxResult<Address> {
        if let Some(account) = self.default_account {
            return Ok(account);
        }
        if let Some(account) = self.signer.as_ref().and_then(|s| s.accounts().first().copied()) {
            return Ok(account);
        }
        self.reader
            .accounts()
            .await?
            .first()
            .copied()
            .ok_or_else(|| TxError::Config("no default account available".to_string()))
    }

    /// Reserve a nonce slot for `account`.
    ///
    /// The reservation is taken by the account's dequeue loop, in order
    /// with queued submissions, and stays held until the chain nonce
    /// passes it or its TTL runs out.
    pub async fn get_nonce(
        &self,
        account: Option<Address>,
        ttl: Option<std::time::Duration>,
    ) -> TxResult<Reservation> {
        let account = match account {
            Some(account) => account,
            None => self.default_account().await?,
        };
        let mut options = PushOptions::new(account);
        if let Some(ttl) = ttl {
            options = options.reservation_ttl(ttl);
        }
        self.queue
            .push(options, |reservation: Reservation| async move { Ok(reservation) })
            .await
    }

    /// Cancel a queued item that has not started executing.
    pub fn cancel(&self, id: ItemId) -> bool {
        self.queue.cancel(id)
    }

    /// Wait for a known transaction hash to resolve.
    pub async fn watch(&self, tx_hash: alloy::primitives::TxHash, options: Option<WatchOptions>) -> TxResult<TxReceipt> {
        self.watcher
            .watch(tx_hash, options.unwrap_or_else(|| self.watcher.defaults()))
            .await
    }

    /// Fill unset fields of `skeleton` from the chain.
    ///
    /// Gas limit is the estimate scaled by the configured multiplier; a
    /// zero market gas price falls back to the configured default.
    pub async fn fill_skeleton(&self, mut skeleton: TxSkeleton) -> TxResult<TxSkeleton> {
        let from = match skeleton.from {
            Some(from) => from,
            None => self.default_account().await?,
        };
        skeleton.from = Some(from);
        if skeleton.nonce.is_none() {
            skeleton.nonce = Some(self.reader.nonce_at(from).await?);
        }
        if skeleton.chain_id.is_none() {
            skeleton.chain_id = Some(self.reader.chain_id().await?.0);
        }
        skeleton.value.get_or_insert(U256::ZERO);
        skeleton.data.get_or_insert_with(Bytes::new);

        if skeleton.gas.is_none() {
            let estimate = self
                .reader
                .estimate_gas(&skeleton)
                .await
                .map_err(|e| self.decode_revert(e))?;
            skeleton.gas = Some((estimate as f64 * self.gas_limit_multiplier) as u64);
        }
        if skeleton.gas_price.is_none() {
            skeleton.gas_price = Some(self.reader.gas_price().await?);
        }
        Ok(skeleton)
    }

    /// Fill defaults and sign `skeleton` as a legacy (EIP-155) transaction.
    pub async fn sign_tx(&self, skeleton: TxSkeleton) -> TxResult<SignedTx> {
        let signer = self.signer.clone().ok_or(TxError::SignerMissing)?;
        let filled = self.fill_skeleton(skeleton).await?;

        let (Some(from), Some(nonce), Some(gas_limit), Some(gas_price)) =
            (filled.from, filled.nonce, filled.gas, filled.gas_price)
        else {
            return Err(TxError::other("skeleton incomplete after filling defaults"));
        };

        let tx = TxLegacy {
            chain_id: filled.chain_id,
            nonce,
            gas_price,
            gas_limit,
            to: filled.to.map_or(TxKind::Create, TxKind::Call),
            value: filled.value.unwrap_or_default(),
            input: filled.data.unwrap_or_default(),
        };

        let signature = signer
            .sign(tx.signature_hash(), from)
            .await?
            .to_signature()?;
        let envelope = TxEnvelope::from(tx.into_signed(signature));
        let hash = *envelope.tx_hash();

        tracing::debug!(%from, nonce, tx_hash = %hash, "Transaction signed");
        Ok(SignedTx {
            raw: Bytes::from(envelope.encoded_2718()),
            hash,
        })
    }

    /// Broadcast a signed transaction and wait for its outcome.
    ///
    /// `options.on_hash` runs as soon as the node accepts the transaction.
    ///
    /// The block number is read before broadcasting so the block-range
    /// window covers the whole submission. If the broadcast fails at the
    /// transport level, the receipt is checked once under the locally
    /// computed hash before the error is returned.
    pub async fn send_signed(&self, raw: Bytes, options: Option<WatchOptions>) -> TxResult<TxReceipt> {
        let mut options = options.unwrap_or_else(|| self.watcher.defaults());
        if options.submitted_at_block.is_none() {
            options.submitted_at_block = Some(self.reader.block_number().await?);
        }
        let expected = keccak256(&raw);

        let tx_hash = match self.reader.send_raw_transaction(&raw).await {
            Ok(hash) => hash,
            Err(e) if is_already_known(&e) => {
                tracing::info!(tx_hash = %expected, "Transaction already known to the node, watching");
                expected
            }
            Err(e) if matches!(e.kind(), ErrorKind::Transport | ErrorKind::Timeout) => {
                tracing::warn!(tx_hash = %expected, error = %e, "Broadcast failed, checking for a receipt");
                return match self.watcher.find_receipt(expected).await {
                    Ok(Some(receipt)) => {
                        options.notify_hash(expected);
                        if receipt.succeeded() {
                            Ok(receipt)
                        } else {
                            Err(TxError::StatusFailed {
                                receipt: Box::new(receipt),
                            })
                        }
                    }
                    Ok(None) => Err(e),
                    Err(check) => {
                        tracing::warn!(tx_hash = %expected, error = %check, "Receipt check failed");
                        Err(e)
                    }
                };
            }
            Err(e) => return Err(self.decode_revert(e)),
        };

        tracing::debug!(%tx_hash, submitted_at_block = ?options.submitted_at_block, "Transaction broadcast");
        options.notify_hash(tx_hash);
        self.watcher.watch(tx_hash, options).await
    }

    /// Let the node sign with one of its own accounts, then wait.
    pub async fn send_unsigned(&self, skeleton: TxSkeleton, options: Option<WatchOptions>) -> TxResult<TxReceipt> {
        let mut options = options.unwrap_or_else(|| self.watcher.defaults());
        if options.submitted_at_block.is_none() {
            options.submitted_at_block = Some(self.reader.block_number().await?);
        }
        let filled = self.fill_skeleton(skeleton).await?;
        let tx_hash = self
            .reader
            .send_transaction(&filled)
            .await
            .map_err(|e| self.decode_revert(e))?;

        tracing::debug!(%tx_hash, "Transaction sent through node account");
        options.notify_hash(tx_hash);
        self.watcher.watch(tx_hash, options).await
    }

    /// Queue `skeleton` for its sender.
    ///
    /// Each attempt takes the reserved nonce, raises the gas price to the
    /// reservation's floor, then signs and broadcasts (or lets the node
    /// sign when no signer is configured) and waits for the outcome.
    pub async fn post(
        &self,
        skeleton: TxSkeleton,
        push: Option<PushOptions>,
        watch: Option<WatchOptions>,
    ) -> TxResult<Submission<TxReceipt>> {
        let push = match push {
            Some(push) => push,
            None => {
                let account = match skeleton.from {
                    Some(from) => from,
                    None => self.default_account().await?,
                };
                PushOptions::new(account).retry(self.default_retry)
            }
        };
        let watch = watch.unwrap_or_else(|| self.watcher.defaults());
        let this = self.clone();

        Ok(self.queue.push(push, move |reservation: Reservation| {
            let this = this.clone();
            let mut tx = skeleton.clone();
            let watch = watch.clone();
            async move {
                tx.from = Some(reservation.account);
                tx.nonce = Some(reservation.nonce);
                tx.gas_price = Some(
                    tx.gas_price
                        .map_or(reservation.gas_price_floor, |p| p.max(reservation.gas_price_floor)),
                );
                if this.signer.is_some() {
                    let signed = this.sign_tx(tx).await?;
                    this.send_signed(signed.raw, Some(watch)).await
                } else {
                    this.send_unsigned(tx, Some(watch)).await
                }
            }
        }))
    }

    fn decode_revert(&self, error: TxError) -> TxError {
        match error {
            TxError::Reverted {
                endpoint,
                reason: None,
                data: Some(data),
            } => TxError::Reverted {
                reason: self.revert_decoder.decode(&data),
                endpoint,
                data: Some(data),
            },
            other => other,
        }
    }
}

impl std::fmt::Debug for TxManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxManager")
            .field("router", &self.router)
            .field("signer", &self.signer.is_some())
            .field("default_account", &self.default_account)
            .finish()
    }
}

fn is_already_known(error: &TxError) -> bool {
    matches!(error, TxError::NonceConflict { message, .. } if message.to_lowercase().contains("already known"))
}
