//! Capability and admin context
//!
//! Governance, the pause switch, the asset allow-list and the clock live
//! outside the pools. Every operation receives them explicitly.

use chrono::{DateTime, Duration, Utc};
use ledger_core::{AccountId, AssetId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Protocol-wide capabilities queried at the start of every operation
pub trait Globals {
    /// Whether `account` holds the governor capability
    fn is_governor(&self, account: &AccountId) -> bool;

    /// Whether the protocol-wide pause is active
    fn protocol_paused(&self) -> bool;

    /// Whether pools may hold `asset`
    fn is_valid_asset(&self, asset: &AssetId) -> bool;

    /// Current time
    fn now(&self) -> DateTime<Utc>;
}

/// In-memory capability context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolContext {
    governor: AccountId,
    paused: bool,
    valid_assets: BTreeSet<AssetId>,
    now: DateTime<Utc>,
}

impl ProtocolContext {
    /// Create context with a governor and a fixed clock
    pub fn new(governor: AccountId, now: DateTime<Utc>) -> Self {
        Self {
            governor,
            paused: false,
            valid_assets: BTreeSet::new(),
            now,
        }
    }

    /// Allow an asset
    pub fn with_asset(mut self, asset: AssetId) -> Self {
        self.valid_assets.insert(asset);
        self
    }

    /// Governor account
    pub fn governor(&self) -> &AccountId {
        &self.governor
    }

    /// Toggle the pause switch
    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    /// Move the clock forward
    pub fn advance(&mut self, by: Duration) {
        self.now += by;
    }

    /// Set the clock
    pub fn set_now(&mut self, now: DateTime<Utc>) {
        self.now = now;
    }
}

impl Globals for ProtocolContext {
    fn is_governor(&self, account: &AccountId) -> bool {
        *account == self.governor
    }

    fn protocol_paused(&self) -> bool {
        self.paused
    }

    fn is_valid_asset(&self, asset: &AssetId) -> bool {
        self.valid_assets.contains(asset)
    }

    fn now(&self) -> DateTime<Utc> {
        self.now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_capabilities() {
        let start = Utc::now();
        let mut ctx = ProtocolContext::new(AccountId::new("gov"), start).with_asset(AssetId::new("USDC"));

        assert!(ctx.is_governor(&AccountId::new("gov")));
        assert!(!ctx.is_governor(&AccountId::new("alice")));
        assert!(ctx.is_valid_asset(&AssetId::new("USDC")));
        assert!(!ctx.is_valid_asset(&AssetId::new("DAI")));

        ctx.set_paused(true);
        assert!(ctx.protocol_paused());

        ctx.advance(Duration::hours(1));
        assert_eq!(ctx.now() - start, Duration::hours(1));
    }
}
