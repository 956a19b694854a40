//! Nonce allocator.
//!
//! # Responsibilities
//! - Turn the chain's next nonce plus local reservations into a gap-free run
//! - Reclaim expired reservations before stacking new ones
//! - Keep one reservation table per account in an explicit registry

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::chain::error::TxResult;
use crate::chain::ChainReader;
use crate::config::NonceConfig;
use crate::nonce::reservation::{Claim, ClaimRequest, Reservation, ReservationTable};
use crate::observability::metrics;

/// Hands out nonce reservations per account.
#[derive(Debug)]
pub struct NonceAllocator {
    reader: Arc<ChainReader>,
    tables: DashMap<Address, ReservationTable>,
    default_ttl: Duration,
    gas_bump_percent: u32,
    max_in_flight: usize,
}

impl NonceAllocator {
    pub fn new(reader: Arc<ChainReader>, config: &NonceConfig) -> Self {
        Self {
            reader,
            tables: DashMap::new(),
            default_ttl: Duration::from_secs(config.reservation_ttl_secs),
            gas_bump_percent: config.gas_bump_percent,
            max_in_flight: config.max_in_flight,
        }
    }

    /// Reserve the next slot for `account`.
    ///
    /// Returns `None` when `max_in_flight` slots are held and none expired.
    /// Calls for one account must not overlap; within the crate only that
    /// account's dequeue loop reserves.
    pub async fn reserve(&self, account: Address, ttl: Option<Duration>) -> TxResult<Option<Reservation>> {
        self.claim(account, ttl, true).await
    }

    /// Non-greedy reserve: an expired slot, or the chain-nonce slot if nobody
    /// holds it. Never stacks a reservation on top of held ones.
    pub async fn probe(&self, account: Address) -> TxResult<Option<Reservation>> {
        self.claim(account, None, false).await
    }

    async fn claim(&self, account: Address, ttl: Option<Duration>, greedy: bool) -> TxResult<Option<Reservation>> {
        let chain_nonce = self.reader.nonce_at(account).await?;
        let market_gas_price = self.reader.gas_price().await?;

        let mut table = self
            .tables
            .entry(account)
            .or_insert_with(|| ReservationTable::new(account));

        let committed = table.commit_below(chain_nonce);
        if committed > 0 {
            tracing::debug!(%account, chain_nonce, committed, "Discarded committed reservations");
        }

        let claimed = table.claim(ClaimRequest {
            chain_nonce,
            market_gas_price,
            ttl: ttl.unwrap_or(self.default_ttl),
            now: Instant::now(),
            gas_bump_percent: self.gas_bump_percent,
            max_in_flight: self.max_in_flight,
            greedy,
        });
        let held = table.len();
        drop(table);

        match claimed {
            Some((reservation, Claim::New)) => {
                metrics::record_nonce_reservation("new");
                tracing::debug!(
                    %account,
                    nonce = reservation.nonce,
                    gas_price_floor = reservation.gas_price_floor,
                    held,
                    "Nonce reserved"
                );
                Ok(Some(reservation))
            }
            Some((reservation, Claim::Reissued)) => {
                metrics::record_nonce_reservation("reissued");
                tracing::info!(
                    %account,
                    nonce = reservation.nonce,
                    gas_price_floor = reservation.gas_price_floor,
                    "Expired nonce reservation reissued"
                );
                Ok(Some(reservation))
            }
            None => {
                tracing::debug!(%account, chain_nonce, held, greedy, "No nonce slot available");
                Ok(None)
            }
        }
    }

    /// Extend `reservation` for another attempt by the same holder.
    ///
    /// `None` when the slot was committed on chain or is no longer held
    /// by this reservation.
    pub async fn renew(&self, reservation: &Reservation, ttl: Option<Duration>) -> TxResult<Option<Reservation>> {
        let account = reservation.account;
        let chain_nonce = self.reader.nonce_at(account).await?;

        let Some(mut table) = self.tables.get_mut(&account) else {
            return Ok(None);
        };
        table.commit_below(chain_nonce);
        let renewed = table.renew(reservation, Instant::now() + ttl.unwrap_or(self.default_ttl));
        drop(table);

        if let Some(renewed) = &renewed {
            tracing::debug!(%account, nonce = renewed.nonce, "Nonce reservation renewed");
        }
        Ok(renewed)
    }

    /// Return a slot whose transaction never consumed its nonce on chain.
    pub fn release(&self, account: Address, nonce: u64) -> bool {
        let released = self
            .tables
            .get_mut(&account)
            .map(|mut table| table.release(nonce))
            .unwrap_or(false);
        if released {
            metrics::record_nonce_reservation("released");
            tracing::debug!(%account, nonce, "Nonce reservation released");
        }
        released
    }

    /// Snapshot of the slots held for `account`.
    pub fn held(&self, account: Address) -> Vec<Reservation> {
        self.tables
            .get(&account)
            .map(|table| table.held())
            .unwrap_or_default()
    }

    /// Drop all local state for `account`.
    pub fn forget(&self, account: Address) -> bool {
        self.tables.remove(&account).is_some()
    }
}
