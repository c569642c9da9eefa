//! Per-share distribution accumulator
//!
//! Converts "distribute X across all holders" into a single increment of a
//! scaled per-share value. Each account carries a signed correction so that
//! balance changes neither claim distributions made before the change nor
//! forfeit distributions made while the old balance was held:
//!
//! ```text
//! accumulated(a) = (per_share * balance(a) + correction(a)) / SCALE
//! owed(a)        = accumulated(a) - recognized(a)
//! ```
//!
//! The per-share value and corrections are arbitrary-precision integers, so
//! the products above cannot overflow however large the per-share value grows
//! or however many shares are minted later.
//!
//! # Dust
//!
//! The integer-division remainder of each distribution is carried into the
//! next one instead of being dropped. With `N` holders, the amount never
//! recognized is at most `N` units, and strictly below `N` whenever
//! [`DistributionAccumulator::remainder`] is zero.
//!
//! The accumulator never sees balances directly; the owning
//! [`ShareLedger`](crate::ShareLedger) passes them in and calls
//! [`DistributionAccumulator::on_balance_change`] on every mint, burn and
//! transfer.

use crate::{AccountId, Amount, Error, Result};
use num_bigint::{BigInt, Sign};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Fixed-point multiplier applied to the per-share value
pub const SCALE: u128 = 1_000_000_000_000_000_000;

/// `amount * SCALE` as a correction term
pub(crate) fn scaled(amount: Amount) -> BigInt {
    BigInt::from(amount) * BigInt::from(SCALE)
}

/// Running per-share accumulator for one distribution channel
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionAccumulator {
    /// Accumulated amount per unit share, scaled by [`SCALE`]
    per_share: BigInt,

    /// Scaled amount left over from the last integer division, below the supply it was divided by
    remainder: u128,

    /// Signed per-account corrections, scaled by [`SCALE`]
    corrections: BTreeMap<AccountId, BigInt>,

    /// Amounts already pulled out of `owed`, never decremented
    recognized: BTreeMap<AccountId, Amount>,

    /// Sum of requested distribution amounts (audit value)
    total_requested: u128,
}

impl DistributionAccumulator {
    /// Create empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Current scaled per-share value
    pub fn per_share(&self) -> &BigInt {
        &self.per_share
    }

    /// Scaled remainder carried into the next distribution
    pub fn remainder(&self) -> u128 {
        self.remainder
    }

    /// Correction term for an account
    pub fn correction(&self, account: &AccountId) -> BigInt {
        self.corrections.get(account).cloned().unwrap_or_default()
    }

    /// Amount already recognized by an account
    pub fn recognized(&self, account: &AccountId) -> Amount {
        self.recognized.get(account).copied().unwrap_or(0)
    }

    /// Sum of all requested distributions
    pub fn total_requested(&self) -> u128 {
        self.total_requested
    }

    /// Accounts with a non-zero correction
    pub fn corrections(&self) -> impl Iterator<Item = (&AccountId, &BigInt)> {
        self.corrections.iter()
    }

    /// Accounts with a recognized amount
    pub fn recognized_amounts(&self) -> impl Iterator<Item = (&AccountId, Amount)> {
        self.recognized.iter().map(|(account, r)| (account, *r))
    }

    /// Distribute `amount` across `total_supply` shares
    ///
    /// Returns the scaled per-share increment. The part of `amount * SCALE`
    /// the supply does not divide is kept and added to the next distribution.
    pub fn distribute(&mut self, amount: Amount, total_supply: Amount) -> Result<u128> {
        if total_supply == 0 {
            return Err(Error::ZeroSupply);
        }
        if amount == 0 {
            return Ok(0);
        }

        let numerator = u128::from(amount)
            .checked_mul(SCALE)
            .and_then(|value| value.checked_add(self.remainder))
            .ok_or(Error::Overflow("distribution amount * SCALE"))?;
        let supply = u128::from(total_supply);
        let increment = numerator / supply;

        self.per_share += BigInt::from(increment);
        self.remainder = numerator % supply;
        self.total_requested = self.total_requested.saturating_add(u128::from(amount));

        Ok(increment)
    }

    /// Correction an account would carry after a balance change
    ///
    /// Pure staging step so a ledger can prepare every attached accumulator
    /// before committing any of them.
    pub fn correction_after(&self, account: &AccountId, delta: Amount, is_increase: bool) -> BigInt {
        let magnitude = &self.per_share * BigInt::from(delta);
        let current = self.correction(account);

        if is_increase {
            current - magnitude
        } else {
            current + magnitude
        }
    }

    /// Commit a staged correction
    pub(crate) fn set_correction(&mut self, account: &AccountId, correction: BigInt) {
        if correction.sign() == Sign::NoSign {
            self.corrections.remove(account);
        } else {
            self.corrections.insert(account.clone(), correction);
        }
    }

    /// Apply a balance change to an account's correction
    pub fn on_balance_change(&mut self, account: &AccountId, delta: Amount, is_increase: bool) {
        let correction = self.correction_after(account, delta, is_increase);
        self.set_correction(account, correction);
    }

    /// Everything an account has accrued over its lifetime
    pub fn accumulated(&self, account: &AccountId, balance: Amount) -> Result<Amount> {
        let gross = &self.per_share * BigInt::from(balance) + self.correction(account);

        if gross.sign() == Sign::Minus {
            debug_assert!(gross.sign() != Sign::Minus, "negative accumulation for {account}: {gross}");
            tracing::error!("Negative accumulation for {}: {}, clamping to zero", account, gross);
            return Ok(0);
        }

        Amount::try_from(&(gross / BigInt::from(SCALE))).map_err(|_| Error::Overflow("accumulated amount"))
    }

    /// Accrued but not yet recognized
    pub fn owed(&self, account: &AccountId, balance: Amount) -> Result<Amount> {
        let accumulated = self.accumulated(account, balance)?;
        let recognized = self.recognized(account);

        if recognized > accumulated {
            debug_assert!(
                recognized <= accumulated,
                "recognized {recognized} exceeds accumulated {accumulated} for {account}"
            );
            tracing::error!(
                "Recognized {} exceeds accumulated {} for {}, clamping to zero",
                recognized,
                accumulated,
                account
            );
            return Ok(0);
        }

        Ok(accumulated - recognized)
    }

    /// Move everything owed into the recognized total and return it
    pub fn recognize(&mut self, account: &AccountId, balance: Amount) -> Result<Amount> {
        self.recognize_up_to(account, balance, Amount::MAX)
    }

    /// Recognize at most `cap` of what is owed
    pub fn recognize_up_to(&mut self, account: &AccountId, balance: Amount, cap: Amount) -> Result<Amount> {
        let amount = self.owed(account, balance)?.min(cap);
        if amount == 0 {
            return Ok(0);
        }

        let recognized = self
            .recognized(account)
            .checked_add(amount)
            .ok_or(Error::Overflow("recognized amount"))?;
        self.recognized.insert(account.clone(), recognized);

        Ok(amount)
    }
}
