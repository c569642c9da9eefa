//! Pool events
//!
//! Events are recorded as part of a pool's transactional state, so an
//! operation that fails records nothing.

use chrono::{DateTime, Utc};
use ledger_core::{AccountId, Amount, Channel};
use serde::{Deserialize, Serialize};
use settlement::SettlementKind;
use uuid::Uuid;

use crate::pool::PoolState;

/// Recorded pool event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolEvent {
    /// Unique event ID (UUIDv7 for time-ordering)
    pub event_id: Uuid,

    /// Pool that recorded the event
    pub pool: AccountId,

    /// What happened
    pub kind: PoolEventKind,

    /// Operation timestamp
    pub recorded_at: DateTime<Utc>,
}

impl PoolEvent {
    /// Create event
    pub fn new(pool: AccountId, kind: PoolEventKind, recorded_at: DateTime<Utc>) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            pool,
            kind,
            recorded_at,
        }
    }
}

/// Event payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PoolEventKind {
    /// Shares minted against a deposit
    Deposited {
        /// Depositor
        account: AccountId,
        /// Amount deposited
        amount: Amount,
    },

    /// Shares burned for a withdrawal
    Withdrawn {
        /// Withdrawing account
        account: AccountId,
        /// Shares burned
        burned: Amount,
        /// Loss recognized against the withdrawal
        loss: Amount,
        /// Amount transferred now
        paid: Amount,
    },

    /// Share balance changed
    BalanceUpdated {
        /// Account
        account: AccountId,
        /// New balance
        balance: Amount,
    },

    /// Amount distributed on a channel (requested amount, before rounding)
    Distributed {
        /// Channel
        channel: Channel,
        /// Requested amount
        amount: Amount,
    },

    /// Reward or yield paid out
    Claimed {
        /// Claiming account
        account: AccountId,
        /// Channel
        channel: Channel,
        /// Amount paid
        amount: Amount,
    },

    /// Payout moved into the settlement queue
    PendingCreated {
        /// Account owed
        account: AccountId,
        /// Settlement kind
        kind: SettlementKind,
        /// Amount added
        amount: Amount,
        /// Pending total after the addition
        pending: Amount,
    },

    /// Pending entry paid and cleared
    PendingConcluded {
        /// Account paid
        account: AccountId,
        /// Settlement kind
        kind: SettlementKind,
        /// Amount paid
        amount: Amount,
    },

    /// Borrower drew liquidity
    Borrowed {
        /// Borrower
        borrower: AccountId,
        /// Amount drawn
        amount: Amount,
        /// Principal outstanding after the draw
        principal: Amount,
    },

    /// Borrower repaid
    Repaid {
        /// Borrower
        borrower: AccountId,
        /// Amount received
        amount: Amount,
        /// Principal cleared
        principal_repaid: Amount,
        /// Surplus distributed as reward
        surplus: Amount,
    },

    /// Withdrawal shortfall covered by the backstop pool
    Compensated {
        /// Withdrawing account
        account: AccountId,
        /// Amount supplied by the backstop
        shortfall: Amount,
        /// Backstop pool that received shares
        backstop: AccountId,
    },

    /// Liquidity sent to a registered pool
    AssetsRequested {
        /// Requesting pool
        pool: AccountId,
        /// Amount sent
        amount: Amount,
    },

    /// Lifecycle transition
    StateChanged {
        /// New state
        state: PoolState,
    },

    /// Privileged liquidity top-up without shares
    AdminDeposited {
        /// Admin
        admin: AccountId,
        /// Amount
        amount: Amount,
    },

    /// Pool admin granted or revoked
    AdminChanged {
        /// Admin account
        admin: AccountId,
        /// Whether the capability is held
        enabled: bool,
    },

    /// Backstop pool reference set
    BlendedPoolSet {
        /// Backstop pool
        pool: AccountId,
    },
}
