//! Share ledger and per-share distribution accounting
//!
//! Tracks fungible pool shares and divides externally supplied amounts
//! (rewards, yields, losses) across every current and future holder.
//!
//! # Architecture
//!
//! - **ShareLedger**: balances and total supply; every mint, burn and transfer
//!   updates the attached accumulators before returning
//! - **DistributionAccumulator**: running per-share value plus per-account
//!   corrections, O(1) per distribution and per query
//!
//! # Invariants
//!
//! - Supply conservation: Σ(balances) == total supply for all time
//! - Order independence: an account's `owed` depends only on its own balance
//!   history and the sequence of distributions
//! - Bounded dust: at most one unit per holder, with the division remainder
//!   carried into the next distribution
//! - Loss follows shares: a transfer hands owed loss to the receiver

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod types;
pub mod accumulator;
pub mod shares;
pub mod error;

// Re-exports
pub use error::{Error, Result};
pub use types::{AccountId, Amount, AssetId, BalanceChange, Channel, Distribution};
pub use accumulator::{DistributionAccumulator, SCALE};
pub use shares::ShareLedger;
