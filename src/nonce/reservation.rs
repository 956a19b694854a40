//! Per-account reservation table.

use std::collections::BTreeMap;
use std::time::Duration;

use alloy::primitives::Address;
use tokio::time::Instant;

/// A nonce slot held by one caller until `reserved_until`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub account: Address,
    pub nonce: u64,
    /// Lowest gas price the holder may broadcast with.
    pub gas_price_floor: u128,
    pub reserved_until: Instant,
}

impl Reservation {
    pub fn is_expired(&self, now: Instant) -> bool {
        self.reserved_until <= now
    }
}

/// How a slot was handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// Fresh slot past the held run (or at the chain nonce).
    New,
    /// Expired slot given out again with a refreshed expiry.
    Reissued,
}

/// Inputs for one [`ReservationTable::claim`] call.
#[derive(Debug, Clone, Copy)]
pub struct ClaimRequest {
    pub chain_nonce: u64,
    pub market_gas_price: u128,
    pub ttl: Duration,
    pub now: Instant,
    pub gas_bump_percent: u32,
    pub max_in_flight: usize,
    /// A non-greedy claim never stacks a slot beyond the chain nonce.
    pub greedy: bool,
}

/// Reservations of one account, keyed by nonce.
///
/// Held slots always form a run starting at the last chain nonce seen by
/// [`commit_below`](Self::commit_below). Released slots leave a hole that
/// the next claim fills first.
#[derive(Debug)]
pub struct ReservationTable {
    account: Address,
    slots: BTreeMap<u64, Reservation>,
}

impl ReservationTable {
    pub fn new(account: Address) -> Self {
        Self {
            account,
            slots: BTreeMap::new(),
        }
    }

    /// Drop slots below the chain nonce; those transactions are on chain.
    pub fn commit_below(&mut self, chain_nonce: u64) -> usize {
        let keep = self.slots.split_off(&chain_nonce);
        let committed = self.slots.len();
        self.slots = keep;
        committed
    }

    /// Walk the held run from the chain nonce and hand out the first
    /// expired slot, or a new slot one past the run.
    pub fn claim(&mut self, req: ClaimRequest) -> Option<(Reservation, Claim)> {
        let mut nonce = req.chain_nonce;
        while let Some(slot) = self.slots.get_mut(&nonce) {
            if slot.is_expired(req.now) {
                let bumped = slot.gas_price_floor.saturating_mul(100 + req.gas_bump_percent as u128) / 100;
                slot.gas_price_floor = bumped.max(req.market_gas_price);
                slot.reserved_until = req.now + req.ttl;
                return Some((slot.clone(), Claim::Reissued));
            }
            nonce += 1;
        }

        let depth = (nonce - req.chain_nonce) as usize;
        if !req.greedy && depth > 0 {
            return None;
        }
        if depth >= req.max_in_flight {
            return None;
        }

        let reservation = Reservation {
            account: self.account,
            nonce,
            gas_price_floor: req.market_gas_price,
            reserved_until: req.now + req.ttl,
        };
        self.slots.insert(nonce, reservation.clone());
        Some((reservation, Claim::New))
    }

    /// Extend a slot still held by the same reservation.
    ///
    /// Returns `None` if the slot was committed, released or handed to
    /// someone else in the meantime.
    pub fn renew(&mut self, reservation: &Reservation, until: Instant) -> Option<Reservation> {
        let slot = self.slots.get_mut(&reservation.nonce)?;
        if slot != reservation {
            return None;
        }
        slot.reserved_until = until;
        Some(slot.clone())
    }

    /// Give a slot back. Returns whether it was held.
    pub fn release(&mut self, nonce: u64) -> bool {
        self.slots.remove(&nonce).is_some()
    }

    pub fn held(&self) -> Vec<Reservation> {
        self.slots.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
