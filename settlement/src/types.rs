//! Core types for settlement

use ledger_core::{AccountId, Amount};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a pending entry pays out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SettlementKind {
    /// Principal withdrawal
    Withdrawal,
    /// Reward claim
    Reward,
    /// Yield claim
    Yield,
}

impl fmt::Display for SettlementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SettlementKind::Withdrawal => "withdrawal",
            SettlementKind::Reward => "reward",
            SettlementKind::Yield => "yield",
        };
        write!(f, "{}", name)
    }
}

/// Pending entry for one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingEntry {
    /// Account owed the amount
    pub account: AccountId,
    /// Settlement kind
    pub kind: SettlementKind,
    /// Amount owed
    pub amount: Amount,
}

/// How a payout attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payout {
    /// Transferred in full
    Paid(Amount),
    /// Moved into the pending entry; carries the new pending total
    Deferred(Amount),
    /// Nothing was owed
    Nothing,
}

impl Payout {
    /// Whether funds reached the account now
    pub fn is_paid(&self) -> bool {
        matches!(self, Payout::Paid(_) | Payout::Nothing)
    }

    /// Amount transferred now
    pub fn paid_amount(&self) -> Amount {
        match self {
            Payout::Paid(amount) => *amount,
            _ => 0,
        }
    }
}
