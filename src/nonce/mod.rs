//! Per-account nonce reservations.

pub mod allocator;
pub mod reservation;

pub use allocator::NonceAllocator;
pub use reservation::Reservation;
