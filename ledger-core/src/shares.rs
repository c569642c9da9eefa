//! Share ledger
//!
//! Balances, total supply and the distribution channels attached to them.
//! Every balance mutation stages the correction for each attached
//! accumulator first and only then commits balances and corrections together,
//! so a failed operation leaves the ledger untouched.

use crate::{
    accumulator::{scaled, DistributionAccumulator},
    types::{AccountId, Amount, BalanceChange, Channel, Distribution},
    Error, Result,
};
use num_bigint::BigInt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Share balances with attached distribution accumulators
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareLedger {
    /// Non-zero balances
    balances: BTreeMap<AccountId, Amount>,

    /// Sum of all balances
    total_supply: Amount,

    /// One accumulator per attached channel
    accumulators: BTreeMap<Channel, DistributionAccumulator>,
}

impl ShareLedger {
    /// Create ledger with the given channels attached
    pub fn new(channels: impl IntoIterator<Item = Channel>) -> Self {
        Self {
            balances: BTreeMap::new(),
            total_supply: 0,
            accumulators: channels
                .into_iter()
                .map(|channel| (channel, DistributionAccumulator::new()))
                .collect(),
        }
    }

    /// Create ledger with every channel attached
    pub fn with_all_channels() -> Self {
        Self::new(Channel::ALL)
    }

    /// Balance of an account
    pub fn balance_of(&self, account: &AccountId) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }

    /// Total supply
    pub fn total_supply(&self) -> Amount {
        self.total_supply
    }

    /// Accounts holding shares, in identifier order
    pub fn holders(&self) -> impl Iterator<Item = (&AccountId, Amount)> {
        self.balances.iter().map(|(account, balance)| (account, *balance))
    }

    /// Number of accounts holding shares
    pub fn holder_count(&self) -> usize {
        self.balances.len()
    }

    /// Attached channels
    pub fn channels(&self) -> impl Iterator<Item = Channel> + '_ {
        self.accumulators.keys().copied()
    }

    /// Accumulator for a channel
    pub fn accumulator(&self, channel: Channel) -> Option<&DistributionAccumulator> {
        self.accumulators.get(&channel)
    }

    fn accumulator_ref(&self, channel: Channel) -> Result<&DistributionAccumulator> {
        self.accumulators
            .get(&channel)
            .ok_or_else(|| Error::UnknownChannel(channel.to_string()))
    }

    fn accumulator_mut(&mut self, channel: Channel) -> Result<&mut DistributionAccumulator> {
        self.accumulators
            .get_mut(&channel)
            .ok_or_else(|| Error::UnknownChannel(channel.to_string()))
    }

    /// Stage corrections for one account across all channels
    fn stage(&self, account: &AccountId, delta: Amount, is_increase: bool) -> Vec<(Channel, BigInt)> {
        self.accumulators
            .iter()
            .map(|(channel, acc)| (*channel, acc.correction_after(account, delta, is_increase)))
            .collect()
    }

    fn commit(&mut self, account: &AccountId, staged: Vec<(Channel, BigInt)>, balance: Amount) {
        for (channel, correction) in staged {
            if let Some(acc) = self.accumulators.get_mut(&channel) {
                acc.set_correction(account, correction);
            }
        }

        if balance == 0 {
            self.balances.remove(account);
        } else {
            self.balances.insert(account.clone(), balance);
        }
    }

    fn check_balance(&self, account: &AccountId, amount: Amount) -> Result<Amount> {
        let available = self.balance_of(account);
        if available < amount {
            return Err(Error::InsufficientBalance {
                account: account.to_string(),
                available,
                requested: amount,
            });
        }
        Ok(available)
    }

    /// Mint shares to an account
    pub fn mint(&mut self, account: &AccountId, amount: Amount) -> Result<BalanceChange> {
        let previous = self.balance_of(account);
        let current = previous
            .checked_add(amount)
            .ok_or(Error::Overflow("account balance"))?;
        let total_supply = self
            .total_supply
            .checked_add(amount)
            .ok_or(Error::Overflow("total supply"))?;

        let staged = self.stage(account, amount, true);
        self.commit(account, staged, current);
        self.total_supply = total_supply;

        tracing::debug!("Minted {} shares to {}", amount, account);

        Ok(BalanceChange {
            account: account.clone(),
            previous,
            current,
        })
    }

    /// Burn shares from an account
    pub fn burn(&mut self, account: &AccountId, amount: Amount) -> Result<BalanceChange> {
        let previous = self.check_balance(account, amount)?;
        let current = previous - amount;

        let staged = self.stage(account, amount, false);
        self.commit(account, staged, current);
        self.total_supply -= amount;

        tracing::debug!("Burned {} shares from {}", amount, account);

        Ok(BalanceChange {
            account: account.clone(),
            previous,
            current,
        })
    }

    /// Loss the sender hands over with `amount` of its `balance` shares
    ///
    /// Pro rata share of the owed loss, rounded up so splitting a position
    /// never sheds loss.
    fn loss_carried(&self, channel: Channel, from: &AccountId, balance: Amount, amount: Amount) -> Result<Amount> {
        if balance == 0 || amount == 0 {
            return Ok(0);
        }

        let owed = u128::from(self.owed(channel, from)?);
        let balance = u128::from(balance);
        let carried = (owed * u128::from(amount) + balance - 1) / balance;

        Amount::try_from(carried).map_err(|_| Error::Overflow("carried loss"))
    }

    /// Transfer shares between accounts
    ///
    /// Both corrections use the current per-share value, so rewards and
    /// yields accrued before the transfer stay with the sender. Owed loss is
    /// a charge against the shares themselves and moves with them.
    pub fn transfer(&mut self, from: &AccountId, to: &AccountId, amount: Amount) -> Result<[BalanceChange; 2]> {
        let from_previous = self.check_balance(from, amount)?;

        if from == to {
            let unchanged = BalanceChange {
                account: from.clone(),
                previous: from_previous,
                current: from_previous,
            };
            return Ok([unchanged.clone(), unchanged]);
        }

        let to_previous = self.balance_of(to);
        let to_current = to_previous
            .checked_add(amount)
            .ok_or(Error::Overflow("account balance"))?;

        let mut staged_from = self.stage(from, amount, false);
        let mut staged_to = self.stage(to, amount, true);

        for ((channel, from_correction), (_, to_correction)) in staged_from.iter_mut().zip(staged_to.iter_mut()) {
            if !channel.is_loss() {
                continue;
            }
            let carried = self.loss_carried(*channel, from, from_previous, amount)?;
            if carried > 0 {
                *from_correction -= scaled(carried);
                *to_correction += scaled(carried);
                tracing::debug!("Transfer moves {} owed loss from {} to {}", carried, from, to);
            }
        }

        self.commit(from, staged_from, from_previous - amount);
        self.commit(to, staged_to, to_current);

        tracing::debug!("Transferred {} shares from {} to {}", amount, from, to);

        Ok([
            BalanceChange {
                account: from.clone(),
                previous: from_previous,
                current: from_previous - amount,
            },
            BalanceChange {
                account: to.clone(),
                previous: to_previous,
                current: to_current,
            },
        ])
    }

    /// Distribute an amount on a channel across current holders
    pub fn distribute(&mut self, channel: Channel, amount: Amount) -> Result<Distribution> {
        let total_supply = self.total_supply;
        let per_share_increment = self.accumulator_mut(channel)?.distribute(amount, total_supply)?;

        tracing::debug!(
            "Distributed {} on {} channel across {} shares",
            amount,
            channel,
            total_supply
        );

        Ok(Distribution {
            channel,
            requested: amount,
            per_share_increment,
            total_supply,
        })
    }

    /// Amount owed to (or, on the loss channel, chargeable to) an account
    ///
    /// Losses are clamped to the account's current balance.
    pub fn owed(&self, channel: Channel, account: &AccountId) -> Result<Amount> {
        let balance = self.balance_of(account);
        let owed = self.accumulator_ref(channel)?.owed(account, balance)?;

        Ok(if channel.is_loss() { owed.min(balance) } else { owed })
    }

    /// Recognize everything owed on a channel
    pub fn recognize(&mut self, channel: Channel, account: &AccountId) -> Result<Amount> {
        self.recognize_up_to(channel, account, Amount::MAX)
    }

    /// Recognize at most `cap` on a channel
    pub fn recognize_up_to(&mut self, channel: Channel, account: &AccountId, cap: Amount) -> Result<Amount> {
        let balance = self.balance_of(account);
        let cap = if channel.is_loss() { cap.min(balance) } else { cap };

        self.accumulator_mut(channel)?.recognize_up_to(account, balance, cap)
    }

    /// Verify Σ(balances) == total supply
    pub fn check_invariants(&self) -> Result<()> {
        let sum = self
            .balances
            .values()
            .try_fold(0u64, |acc, balance| acc.checked_add(*balance))
            .ok_or(Error::Overflow("balance sum"))?;

        if sum != self.total_supply {
            return Err(Error::InvariantViolation(format!(
                "sum of balances {} != total supply {}",
                sum, self.total_supply
            )));
        }

        Ok(())
    }
}
