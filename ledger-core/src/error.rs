//! Error types for the share ledger

use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Distribution attempted with no shares outstanding
    #[error("Cannot distribute with zero total supply")]
    ZeroSupply,

    /// Burn or transfer exceeds holdings
    #[error("Insufficient balance for {account}: has {available}, needs {requested}")]
    InsufficientBalance {
        /// Account being debited
        account: String,
        /// Current balance
        available: u64,
        /// Requested amount
        requested: u64,
    },

    /// Channel not attached to this ledger
    #[error("Unknown distribution channel: {0}")]
    UnknownChannel(String),

    /// Fixed-point arithmetic left its representable range
    #[error("Arithmetic overflow: {0}")]
    Overflow(&'static str),

    /// Invariant violation (supply conservation, etc.)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}
