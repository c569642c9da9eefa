//! Error types for lending pools

use ledger_core::Amount;
use settlement::SettlementKind;
use thiserror::Error;

/// Result type for pool operations
pub type Result<T> = std::result::Result<T, Error>;

/// Pool errors
///
/// Every variant aborts the operation with no partial state change. Liquidity
/// shortfalls on claims and withdrawals are not errors; they surface as
/// [`Payout::Deferred`](settlement::Payout::Deferred).
#[derive(Error, Debug)]
pub enum Error {
    /// Distribution attempted with no shares outstanding
    #[error("Cannot distribute with zero total supply")]
    ZeroSupply,

    /// Deposit leaves the locker below the minimum investment
    #[error("Below minimum investment: resulting balance {resulting}, minimum {minimum}")]
    BelowMinimum {
        /// Locker balance after the deposit
        resulting: Amount,
        /// Configured minimum
        minimum: Amount,
    },

    /// Deposit would exceed pool capacity
    #[error("Exceeds capacity: supply would be {requested}, capacity {capacity}")]
    ExceedsCapacity {
        /// Total supply after the deposit
        requested: Amount,
        /// Configured capacity
        capacity: Amount,
    },

    /// Withdrawal before the lockup elapsed
    #[error("Tokens locked: {unlocked} unlocked, {requested} requested")]
    TokensLocked {
        /// Amount currently withdrawable
        unlocked: Amount,
        /// Amount requested
        requested: Amount,
    },

    /// Withdrawal or transfer exceeds holdings
    #[error("Insufficient balance for {account}: has {available}, needs {requested}")]
    InsufficientBalance {
        /// Account being debited
        account: String,
        /// Current balance
        available: Amount,
        /// Requested amount
        requested: Amount,
    },

    /// Locker lacks funds for a direct fund move
    #[error("Insufficient liquidity: available {available}, required {required}")]
    InsufficientLiquidity {
        /// Locker balance
        available: Amount,
        /// Amount needed
        required: Amount,
    },

    /// Operation invalid for the pool lifecycle state
    #[error("Bad state: {0}")]
    BadState(String),

    /// Capability check failed
    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    /// Protocol-wide pause is active
    #[error("Protocol paused")]
    ProtocolPaused,

    /// Zero or otherwise unusable amount
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Asset not on the protocol allow-list
    #[error("Invalid asset: {0}")]
    InvalidAsset(String),

    /// Pools or lockers hold different assets
    #[error("Asset mismatch: expected {expected}, got {actual}")]
    AssetMismatch {
        /// Asset required
        expected: String,
        /// Asset found
        actual: String,
    },

    /// No pool with this identifier
    #[error("Unknown pool: {0}")]
    UnknownPool(String),

    /// Pool identifier already taken
    #[error("Duplicate pool: {0}")]
    DuplicatePool(String),

    /// Set-once value already set
    #[error("Already configured: {0}")]
    AlreadyConfigured(String),

    /// Nothing pending to conclude
    #[error("No pending {kind} for {account}")]
    NothingPending {
        /// Account queried
        account: String,
        /// Settlement kind
        kind: SettlementKind,
    },

    /// Ledger error
    #[error("Ledger error: {0}")]
    Ledger(ledger_core::Error),

    /// Settlement error
    #[error("Settlement error: {0}")]
    Settlement(settlement::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// JSON encoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ledger_core::Error> for Error {
    fn from(err: ledger_core::Error) -> Self {
        match err {
            ledger_core::Error::ZeroSupply => Error::ZeroSupply,
            ledger_core::Error::InsufficientBalance {
                account,
                available,
                requested,
            } => Error::InsufficientBalance {
                account,
                available,
                requested,
            },
            other => Error::Ledger(other),
        }
    }
}

impl From<settlement::Error> for Error {
    fn from(err: settlement::Error) -> Self {
        match err {
            settlement::Error::Ledger(inner) => inner.into(),
            settlement::Error::InsufficientLiquidity { available, required } => {
                Error::InsufficientLiquidity { available, required }
            }
            settlement::Error::NothingPending { account, kind } => Error::NothingPending { account, kind },
            other => Error::Settlement(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_errors_flatten() {
        let err: Error = ledger_core::Error::ZeroSupply.into();
        assert!(matches!(err, Error::ZeroSupply));

        let err: Error = settlement::Error::Ledger(ledger_core::Error::InsufficientBalance {
            account: "alice".to_string(),
            available: 1,
            requested: 2,
        })
        .into();
        assert!(matches!(err, Error::InsufficientBalance { available: 1, requested: 2, .. }));
    }

    #[test]
    fn test_liquidity_error_flattens() {
        let err: Error = settlement::Error::InsufficientLiquidity {
            available: 3,
            required: 4,
        }
        .into();
        assert_eq!(err.to_string(), "Insufficient liquidity: available 3, required 4");
    }
}
