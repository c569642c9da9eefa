//! Locker custody interface
//!
//! A locker physically holds a pool's liquid funds. Only the owning pool moves
//! funds out of it, and always after its own accounting has been updated.

use crate::{Error, Result};
use ledger_core::{AccountId, Amount, AssetId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Custody collaborator consumed by pools
pub trait Custody: fmt::Debug {
    /// Address funds are sent to
    fn address(&self) -> &AccountId;

    /// Asset held
    fn asset(&self) -> &AssetId;

    /// Available liquidity
    fn balance(&self) -> Amount;

    /// Move funds out; atomic, either the full amount moves or nothing does
    fn transfer(&mut self, to: &AccountId, amount: Amount) -> Result<()>;

    /// Record funds arriving
    fn receive(&mut self, from: &AccountId, amount: Amount) -> Result<()>;

    /// Allow `spender` to pull up to `amount`
    fn approve(&mut self, spender: &AccountId, amount: Amount) -> Result<()>;

    /// Current allowance for `spender`
    fn allowance(&self, spender: &AccountId) -> Amount;
}

/// In-memory locker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locker {
    address: AccountId,
    asset: AssetId,
    balance: Amount,

    /// Cumulative amounts sent to each account
    paid_out: BTreeMap<AccountId, Amount>,

    /// Cumulative amounts received from each account
    received: BTreeMap<AccountId, Amount>,

    allowances: BTreeMap<AccountId, Amount>,

    /// Refuse outgoing transfers (custodian outage)
    frozen: bool,
}

impl Locker {
    /// Create empty locker
    pub fn new(address: AccountId, asset: AssetId) -> Self {
        Self {
            address,
            asset,
            balance: 0,
            paid_out: BTreeMap::new(),
            received: BTreeMap::new(),
            allowances: BTreeMap::new(),
            frozen: false,
        }
    }

    /// Total ever sent to an account
    pub fn paid_to(&self, account: &AccountId) -> Amount {
        self.paid_out.get(account).copied().unwrap_or(0)
    }

    /// Total ever received from an account
    pub fn received_from(&self, account: &AccountId) -> Amount {
        self.received.get(account).copied().unwrap_or(0)
    }

    /// Freeze or unfreeze outgoing transfers
    pub fn set_frozen(&mut self, frozen: bool) {
        self.frozen = frozen;
    }
}

impl Custody for Locker {
    fn address(&self) -> &AccountId {
        &self.address
    }

    fn asset(&self) -> &AssetId {
        &self.asset
    }

    fn balance(&self) -> Amount {
        self.balance
    }

    fn transfer(&mut self, to: &AccountId, amount: Amount) -> Result<()> {
        if self.frozen {
            return Err(Error::TransferFailed(format!("locker {} is frozen", self.address)));
        }
        if amount > self.balance {
            return Err(Error::InsufficientLiquidity {
                available: self.balance,
                required: amount,
            });
        }

        let paid = self
            .paid_to(to)
            .checked_add(amount)
            .ok_or(Error::Overflow("locker payout total"))?;

        self.balance -= amount;
        self.paid_out.insert(to.clone(), paid);

        tracing::debug!("Locker {} sent {} {} to {}", self.address, amount, self.asset, to);
        Ok(())
    }

    fn receive(&mut self, from: &AccountId, amount: Amount) -> Result<()> {
        let balance = self
            .balance
            .checked_add(amount)
            .ok_or(Error::Overflow("locker balance"))?;
        let received = self
            .received_from(from)
            .checked_add(amount)
            .ok_or(Error::Overflow("locker receipt total"))?;

        self.balance = balance;
        self.received.insert(from.clone(), received);
        Ok(())
    }

    fn approve(&mut self, spender: &AccountId, amount: Amount) -> Result<()> {
        if amount == 0 {
            self.allowances.remove(spender);
        } else {
            self.allowances.insert(spender.clone(), amount);
        }
        Ok(())
    }

    fn allowance(&self, spender: &AccountId) -> Amount {
        self.allowances.get(spender).copied().unwrap_or(0)
    }
}
