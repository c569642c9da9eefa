//! Error types for settlement

use crate::types::SettlementKind;
use ledger_core::Amount;
use thiserror::Error;

/// Result type for settlement operations
pub type Result<T> = std::result::Result<T, Error>;

/// Settlement errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Ledger error
    #[error("Ledger error: {0}")]
    Ledger(#[from] ledger_core::Error),

    /// Locker cannot cover the amount
    #[error("Insufficient liquidity: available {available}, required {required}")]
    InsufficientLiquidity {
        /// Locker balance
        available: Amount,
        /// Amount needed
        required: Amount,
    },

    /// Nothing pending for the account
    #[error("No pending {kind} for {account}")]
    NothingPending {
        /// Account queried
        account: String,
        /// Settlement kind
        kind: SettlementKind,
    },

    /// Locker refused the transfer
    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    /// Pending amount left its representable range
    #[error("Arithmetic overflow: {0}")]
    Overflow(&'static str),
}
