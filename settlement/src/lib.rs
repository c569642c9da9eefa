//! Liquidity-constrained settlement
//!
//! Deferred payouts for when a pool's locker cannot cover a claim.
//!
//! # Architecture

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]
//!
//! A payout attempt either pays in full or moves the whole amount into the
//! account's pending entry:
//!
//! 1. **Defer**: liquidity short, amount added to the pending entry, no transfer
//! 2. **Replenish**: borrower repayment or admin deposit refills the locker
//! 3. **Conclude**: a privileged settler pays the entire entry and zeros it
//!
//! Conclude is all-or-nothing per account and commits the queue update before
//! funds leave the locker.

pub mod types;
pub mod custody;
pub mod queue;
pub mod error;

// Re-exports
pub use error::{Error, Result};
pub use types::*;
pub use custody::{Custody, Locker};
pub use queue::SettlementQueue;
