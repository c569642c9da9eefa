//! Pending settlement queue
//!
//! Per account and per kind: `None -> Pending -> None`. Deferring adds to the
//! entry (never overwrites); concluding pays the whole entry or nothing.

use crate::{
    custody::Custody,
    types::{PendingEntry, SettlementKind},
    Error, Result,
};
use ledger_core::{AccountId, Amount};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Pending payouts awaiting liquidity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementQueue {
    entries: BTreeMap<SettlementKind, BTreeMap<AccountId, Amount>>,
}

impl SettlementQueue {
    /// Create empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Pending amount for an account
    pub fn pending(&self, kind: SettlementKind, account: &AccountId) -> Amount {
        self.entries
            .get(&kind)
            .and_then(|accounts| accounts.get(account))
            .copied()
            .unwrap_or(0)
    }

    /// Sum of pending amounts of one kind
    pub fn total_pending(&self, kind: SettlementKind) -> u128 {
        self.entries
            .get(&kind)
            .map(|accounts| accounts.values().map(|amount| u128::from(*amount)).sum())
            .unwrap_or(0)
    }

    /// All pending entries of one kind, in account order
    pub fn entries(&self, kind: SettlementKind) -> Vec<PendingEntry> {
        self.entries
            .get(&kind)
            .map(|accounts| {
                accounts
                    .iter()
                    .map(|(account, amount)| PendingEntry {
                        account: account.clone(),
                        kind,
                        amount: *amount,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether anything is pending at all
    pub fn is_empty(&self) -> bool {
        self.entries.values().all(BTreeMap::is_empty)
    }

    /// Add to an account's pending entry, returning the new total
    pub fn defer(&mut self, kind: SettlementKind, account: &AccountId, amount: Amount) -> Result<Amount> {
        let total = self
            .pending(kind, account)
            .checked_add(amount)
            .ok_or(Error::Overflow("pending amount"))?;

        if total > 0 {
            self.entries
                .entry(kind)
                .or_default()
                .insert(account.clone(), total);
        }

        tracing::warn!("Deferred {} {} for {} (pending {})", amount, kind, account, total);
        Ok(total)
    }

    /// Pay an account's whole pending entry from `custody`
    ///
    /// The entry is zeroed before funds move; if the transfer fails the entry
    /// is restored and the error returned.
    pub fn conclude<C: Custody + ?Sized>(
        &mut self,
        kind: SettlementKind,
        account: &AccountId,
        custody: &mut C,
    ) -> Result<Amount> {
        let amount = self.pending(kind, account);
        if amount == 0 {
            return Err(Error::NothingPending {
                account: account.to_string(),
                kind,
            });
        }

        let available = custody.balance();
        if available < amount {
            return Err(Error::InsufficientLiquidity {
                available,
                required: amount,
            });
        }

        self.clear(kind, account);

        if let Err(err) = custody.transfer(account, amount) {
            self.entries
                .entry(kind)
                .or_default()
                .insert(account.clone(), amount);
            return Err(err);
        }

        tracing::info!("Concluded pending {} of {} for {}", kind, amount, account);
        Ok(amount)
    }

    fn clear(&mut self, kind: SettlementKind, account: &AccountId) {
        if let Some(accounts) = self.entries.get_mut(&kind) {
            accounts.remove(account);
            if accounts.is_empty() {
                self.entries.remove(&kind);
            }
        }
    }
}
