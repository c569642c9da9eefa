//! Core types for the share ledger
//!
//! Amounts are integer base units of the pooled asset. Shares are minted 1:1
//! with deposits, so share amounts use the same type.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Asset or share amount in base units
pub type Amount = u64;

/// Account identifier (depositor, borrower, pool address, etc.)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(String);

impl AccountId {
    /// Create new account ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the asset a pool holds
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetId(String);

impl AssetId {
    /// Create new asset ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Distribution channel attached to a ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Channel {
    /// Rewards (repayment surplus, admin rewards)
    Reward,
    /// Yields (aggregated returns from other pools)
    Yield,
    /// Losses (written-off principal)
    Loss,
}

impl Channel {
    /// Channels every pool carries
    pub const ALL: [Channel; 3] = [Channel::Reward, Channel::Yield, Channel::Loss];

    /// Whether amounts on this channel reduce an account's entitlement
    pub fn is_loss(&self) -> bool {
        matches!(self, Channel::Loss)
    }

    /// Stable name
    pub fn name(&self) -> &'static str {
        match self {
            Channel::Reward => "reward",
            Channel::Yield => "yield",
            Channel::Loss => "loss",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Balance change notification for off-ledger bookkeeping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceChange {
    /// Account whose balance changed
    pub account: AccountId,
    /// Balance before the change
    pub previous: Amount,
    /// Balance after the change
    pub current: Amount,
}

impl BalanceChange {
    /// Size of the change
    pub fn delta(&self) -> Amount {
        self.current.abs_diff(self.previous)
    }

    /// Whether the balance grew
    pub fn is_increase(&self) -> bool {
        self.current > self.previous
    }
}

/// Result of a distribution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Distribution {
    /// Channel distributed on
    pub channel: Channel,
    /// Amount requested by the caller (audit value, pre-rounding)
    pub requested: Amount,
    /// Increment applied to the scaled per-share value
    pub per_share_increment: u128,
    /// Total supply at distribution time
    pub total_supply: Amount,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balance_change_direction() {
        let change = BalanceChange {
            account: AccountId::new("alice"),
            previous: 100,
            current: 40,
        };
        assert_eq!(change.delta(), 60);
        assert!(!change.is_increase());
    }

    #[test]
    fn test_channel_loss_flag() {
        assert!(Channel::Loss.is_loss());
        assert!(!Channel::Reward.is_loss());
        assert_eq!(Channel::Yield.to_string(), "yield");
    }
}
