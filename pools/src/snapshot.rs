//! Persisted pool records
//!
//! A snapshot is the structured record of a pool's accounting state: supply,
//! balances, per-channel accumulator terms, pending entries, lockup dates,
//! principal outstanding and lifecycle state. Encoded with bincode and hashed
//! with SHA-256 so two records can be compared for audit.

use crate::{pool::PoolCore, pool::PoolState, Error, Result};
use chrono::{DateTime, Utc};
use ledger_core::{AccountId, Amount, Channel};
use num_bigint::BigInt;
use serde::{Deserialize, Serialize};
use settlement::{Custody, PendingEntry, SettlementKind};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Accumulator terms for one channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    /// Scaled per-share value
    pub per_share: BigInt,
    /// Scaled division remainder carried into the next distribution
    pub remainder: u128,
    /// Per-account corrections
    pub corrections: BTreeMap<AccountId, BigInt>,
    /// Per-account recognized totals
    pub recognized: BTreeMap<AccountId, Amount>,
}

/// Persisted pool state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    /// Pool address
    pub pool: AccountId,
    /// Lifecycle state
    pub state: PoolState,
    /// Total shares
    pub total_supply: Amount,
    /// Non-zero balances
    pub balances: BTreeMap<AccountId, Amount>,
    /// Accumulator terms per channel
    pub channels: BTreeMap<Channel, ChannelSnapshot>,
    /// Pending settlements of every kind
    pub pending: Vec<PendingEntry>,
    /// Weighted deposit dates
    pub deposit_dates: BTreeMap<AccountId, DateTime<Utc>>,
    /// Principal lent out
    pub principal_outstanding: Amount,
}

impl PoolSnapshot {
    /// Capture a pool's current state
    pub fn capture<C: Custody>(pool: &PoolCore<C>) -> Self {
        let shares = pool.shares();

        let channels = shares
            .channels()
            .filter_map(|channel| {
                shares.accumulator(channel).map(|acc| {
                    (
                        channel,
                        ChannelSnapshot {
                            per_share: acc.per_share().clone(),
                            remainder: acc.remainder(),
                            corrections: acc.corrections().map(|(a, c)| (a.clone(), c.clone())).collect(),
                            recognized: acc.recognized_amounts().map(|(a, r)| (a.clone(), r)).collect(),
                        },
                    )
                })
            })
            .collect();

        let pending = [SettlementKind::Withdrawal, SettlementKind::Reward, SettlementKind::Yield]
            .into_iter()
            .flat_map(|kind| pool.queue().entries(kind))
            .collect();

        Self {
            pool: pool.address().clone(),
            state: pool.state(),
            total_supply: shares.total_supply(),
            balances: shares.holders().map(|(a, b)| (a.clone(), b)).collect(),
            channels,
            pending,
            deposit_dates: pool.book.deposit_dates.clone(),
            principal_outstanding: pool.principal_outstanding(),
        }
    }

    /// Encode with bincode
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode from bincode, rejecting records whose balances do not sum to the supply
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let snapshot: Self = bincode::deserialize(bytes)?;

        let sum = snapshot
            .balances
            .values()
            .try_fold(0u64, |acc, b| acc.checked_add(*b));
        if sum != Some(snapshot.total_supply) {
            return Err(Error::Ledger(ledger_core::Error::InvariantViolation(format!(
                "snapshot of {} has balances summing to {:?}, supply {}",
                snapshot.pool, sum, snapshot.total_supply
            ))));
        }

        Ok(snapshot)
    }

    /// SHA-256 over the encoding
    pub fn digest(&self) -> Result<[u8; 32]> {
        let mut hasher = Sha256::new();
        hasher.update(self.encode()?);
        Ok(hasher.finalize().into())
    }

    /// Hex form of [`PoolSnapshot::digest`]
    pub fn digest_hex(&self) -> Result<String> {
        let mut hasher = Sha256::new();
        hasher.update(self.encode()?);
        Ok(format!("{:x}", hasher.finalize()))
    }
}

impl<C: Custody> PoolCore<C> {
    /// Capture the persisted record of this pool
    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot::capture(self)
    }
}
