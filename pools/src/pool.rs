//! Shared pool machinery
//!
//! A pool owns a share ledger with reward, yield and loss accumulators, a
//! settlement queue, per-account lockup dates and a borrow ledger. All of it
//! lives in [`PoolBook`], which is checkpointed before every operation and
//! restored if the operation fails.
//!
//! Funds move last: every transfer out of the locker happens after the burn,
//! recognition or pending increment that accounts for it.

use crate::{
    config::PoolConfig,
    events::{PoolEvent, PoolEventKind},
    globals::Globals,
    Error, Result,
};
use chrono::{DateTime, Utc};
use ledger_core::{AccountId, Amount, AssetId, BalanceChange, Channel, Distribution, ShareLedger};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use settlement::{Custody, Locker, Payout, SettlementKind, SettlementQueue};
use std::collections::{BTreeMap, BTreeSet};

/// Pool lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolState {
    /// Accepting deposits and loans
    Active,
    /// Winding down: exits and claims only
    Deactivated,
}

/// Transactional pool state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolBook {
    pub(crate) shares: ShareLedger,
    pub(crate) queue: SettlementQueue,
    pub(crate) deposit_dates: BTreeMap<AccountId, DateTime<Utc>>,
    pub(crate) principal_outstanding: Amount,
    pub(crate) state: PoolState,
    pub(crate) admins: BTreeSet<AccountId>,
    pub(crate) events: Vec<PoolEvent>,
}

impl PoolBook {
    fn new() -> Self {
        Self {
            shares: ShareLedger::with_all_channels(),
            queue: SettlementQueue::new(),
            deposit_dates: BTreeMap::new(),
            principal_outstanding: 0,
            state: PoolState::Active,
            admins: BTreeSet::new(),
            events: Vec::new(),
        }
    }
}

/// Outcome of a withdrawal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalReceipt {
    /// Shares burned
    pub burned: Amount,
    /// Loss recognized against the withdrawal
    pub loss: Amount,
    /// Amount supplied by the backstop pool
    pub compensated: Amount,
    /// Paid now, or deferred into the settlement queue
    pub payout: Payout,
}

/// Point-in-time pool figures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolSummary {
    /// Pool address
    pub address: AccountId,
    /// Lifecycle state
    pub state: PoolState,
    /// Total shares
    pub total_supply: Amount,
    /// Number of holders
    pub holders: usize,
    /// Locker balance
    pub liquidity: Amount,
    /// Principal lent out
    pub principal_outstanding: Amount,
    /// Pending withdrawals
    pub pending_withdrawals: u128,
    /// Pending reward and yield claims
    pub pending_claims: u128,
    /// Lent share of pool assets
    pub utilization: Decimal,
}

/// Validated withdrawal
#[derive(Debug, Clone, Copy)]
pub(crate) struct WithdrawalPlan {
    pub(crate) amount: Amount,
    pub(crate) loss: Amount,
    pub(crate) payout: Amount,
}

/// Pool core shared by regional and blended pools
#[derive(Debug)]
pub struct PoolCore<C: Custody = Locker> {
    address: AccountId,
    borrower: AccountId,
    config: PoolConfig,
    pub(crate) book: PoolBook,
    pub(crate) custody: C,
}

impl<C: Custody> PoolCore<C> {
    /// Create pool over a locker
    pub fn new(address: AccountId, borrower: AccountId, config: PoolConfig, custody: C) -> Result<Self> {
        config.validate()?;

        if *custody.asset() != config.asset {
            return Err(Error::AssetMismatch {
                expected: config.asset.to_string(),
                actual: custody.asset().to_string(),
            });
        }

        Ok(Self {
            address,
            borrower,
            config,
            book: PoolBook::new(),
            custody,
        })
    }

    // ----- Queries -----

    /// Pool address
    pub fn address(&self) -> &AccountId {
        &self.address
    }

    /// Borrower allowed to draw liquidity
    pub fn borrower(&self) -> &AccountId {
        &self.borrower
    }

    /// Pool asset
    pub fn asset(&self) -> &AssetId {
        &self.config.asset
    }

    /// Pool parameters
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Lifecycle state
    pub fn state(&self) -> PoolState {
        self.book.state
    }

    /// Locker
    pub fn custody(&self) -> &C {
        &self.custody
    }

    /// Locker, for custodian-side operations
    pub fn custody_mut(&mut self) -> &mut C {
        &mut self.custody
    }

    /// Share ledger
    pub fn shares(&self) -> &ShareLedger {
        &self.book.shares
    }

    /// Settlement queue
    pub fn queue(&self) -> &SettlementQueue {
        &self.book.queue
    }

    /// Share balance
    pub fn balance_of(&self, account: &AccountId) -> Amount {
        self.book.shares.balance_of(account)
    }

    /// Share holders in identifier order
    pub fn holders(&self) -> impl Iterator<Item = (&AccountId, Amount)> {
        self.book.shares.holders()
    }

    /// Total shares
    pub fn total_supply(&self) -> Amount {
        self.book.shares.total_supply()
    }

    /// Locker balance
    pub fn liquidity(&self) -> Amount {
        self.custody.balance()
    }

    /// Principal lent out
    pub fn principal_outstanding(&self) -> Amount {
        self.book.principal_outstanding
    }

    /// Amount accrued but not recognized on a channel
    pub fn owed(&self, channel: Channel, account: &AccountId) -> Result<Amount> {
        Ok(self.book.shares.owed(channel, account)?)
    }

    /// Pending settlement for an account
    pub fn pending(&self, kind: SettlementKind, account: &AccountId) -> Amount {
        self.book.queue.pending(kind, account)
    }

    /// Weighted deposit date
    pub fn deposit_date(&self, account: &AccountId) -> Option<DateTime<Utc>> {
        self.book.deposit_dates.get(account).copied()
    }

    /// Shares whose lockup has elapsed
    pub fn unlocked_to_withdraw(&self, ctx: &dyn Globals, account: &AccountId) -> Amount {
        let balance = self.balance_of(account);
        match self.deposit_date(account) {
            Some(date) if ctx.now() < date + self.config.lockup_period() => 0,
            _ => balance,
        }
    }

    /// Whether `account` holds the pool admin capability
    pub fn is_admin(&self, account: &AccountId) -> bool {
        self.book.admins.contains(account)
    }

    /// Recorded events, oldest first
    pub fn events(&self) -> &[PoolEvent] {
        &self.book.events
    }

    /// Audit trail as JSON lines
    pub fn events_json_lines(&self) -> Result<String> {
        let mut out = String::new();
        for event in &self.book.events {
            out.push_str(&serde_json::to_string(event)?);
            out.push('\n');
        }
        Ok(out)
    }

    /// Lent share of pool assets
    pub fn utilization(&self) -> Decimal {
        let principal = Decimal::from(self.book.principal_outstanding);
        let assets = principal + Decimal::from(self.liquidity());
        if assets.is_zero() {
            Decimal::ZERO
        } else {
            principal / assets
        }
    }

    /// Point-in-time figures
    pub fn summary(&self) -> PoolSummary {
        let queue = &self.book.queue;
        PoolSummary {
            address: self.address.clone(),
            state: self.book.state,
            total_supply: self.total_supply(),
            holders: self.book.shares.holder_count(),
            liquidity: self.liquidity(),
            principal_outstanding: self.book.principal_outstanding,
            pending_withdrawals: queue.total_pending(SettlementKind::Withdrawal),
            pending_claims: queue.total_pending(SettlementKind::Reward) + queue.total_pending(SettlementKind::Yield),
            utilization: self.utilization(),
        }
    }

    // ----- Guards -----

    pub(crate) fn ensure_not_paused(ctx: &dyn Globals) -> Result<()> {
        if ctx.protocol_paused() {
            return Err(Error::ProtocolPaused);
        }
        Ok(())
    }

    pub(crate) fn ensure_governor(ctx: &dyn Globals, caller: &AccountId) -> Result<()> {
        if !ctx.is_governor(caller) {
            return Err(Error::NotAuthorized(format!("{} is not the governor", caller)));
        }
        Ok(())
    }

    pub(crate) fn ensure_admin(&self, ctx: &dyn Globals, caller: &AccountId) -> Result<()> {
        if !self.is_admin(caller) && !ctx.is_governor(caller) {
            return Err(Error::NotAuthorized(format!(
                "{} is not an admin of pool {}",
                caller, self.address
            )));
        }
        Ok(())
    }

    fn ensure_borrower(&self, caller: &AccountId) -> Result<()> {
        if *caller != self.borrower {
            return Err(Error::NotAuthorized(format!(
                "{} is not the borrower of pool {}",
                caller, self.address
            )));
        }
        Ok(())
    }

    fn ensure_active(&self, operation: &str) -> Result<()> {
        if self.book.state != PoolState::Active {
            return Err(Error::BadState(format!(
                "{} requires an active pool, {} is {:?}",
                operation, self.address, self.book.state
            )));
        }
        Ok(())
    }

    fn ensure_positive(amount: Amount, operation: &str) -> Result<()> {
        if amount == 0 {
            return Err(Error::InvalidAmount(format!("{} amount must be positive", operation)));
        }
        Ok(())
    }

    // ----- Transactions -----

    /// Run `op` against the book; restore the checkpoint if it fails
    ///
    /// Locker calls inside `op` must come after every fallible book update,
    /// since the checkpoint covers the book only.
    pub(crate) fn atomically<T>(&mut self, op: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let checkpoint = self.book.clone();
        let result = op(self);
        if result.is_err() {
            self.book = checkpoint;
        }
        result
    }

    pub(crate) fn record(&mut self, ctx: &dyn Globals, kind: PoolEventKind) {
        let event = PoolEvent::new(self.address.clone(), kind, ctx.now());
        self.book.events.push(event);
    }

    fn record_balance(&mut self, ctx: &dyn Globals, change: &BalanceChange) {
        self.record(
            ctx,
            PoolEventKind::BalanceUpdated {
                account: change.account.clone(),
                balance: change.current,
            },
        );
    }

    /// `previous + (incoming - previous) * amount / (balance + amount)`
    fn weighted_date(
        previous: Option<DateTime<Utc>>,
        balance: Amount,
        incoming: DateTime<Utc>,
        amount: Amount,
    ) -> DateTime<Utc> {
        let previous = match previous {
            Some(date) if balance > 0 => date,
            _ => return incoming,
        };

        let total = i128::from(balance) + i128::from(amount);
        if total == 0 {
            return previous;
        }

        let elapsed = i128::from((incoming - previous).num_seconds());
        let shift = elapsed * i128::from(amount) / total;
        previous + chrono::Duration::seconds(shift as i64)
    }

    /// Mint shares and fold the incoming lockup date into the account's
    pub(crate) fn mint_shares(
        &mut self,
        ctx: &dyn Globals,
        account: &AccountId,
        amount: Amount,
        incoming: DateTime<Utc>,
    ) -> Result<BalanceChange> {
        let previous = self.deposit_date(account);
        let change = self.book.shares.mint(account, amount)?;

        let date = Self::weighted_date(previous, change.previous, incoming, amount);
        self.book.deposit_dates.insert(account.clone(), date);
        self.record_balance(ctx, &change);

        Ok(change)
    }

    fn burn_shares(&mut self, ctx: &dyn Globals, account: &AccountId, amount: Amount) -> Result<BalanceChange> {
        let change = self.book.shares.burn(account, amount)?;
        if change.current == 0 {
            self.book.deposit_dates.remove(account);
        }
        self.record_balance(ctx, &change);
        Ok(change)
    }

    // ----- Depositor operations -----

    /// Deposit and mint shares 1:1
    pub fn deposit(&mut self, ctx: &dyn Globals, caller: &AccountId, amount: Amount) -> Result<Amount> {
        Self::ensure_not_paused(ctx)?;
        self.ensure_active("deposit")?;
        Self::ensure_positive(amount, "deposit")?;

        if !ctx.is_valid_asset(self.asset()) {
            return Err(Error::InvalidAsset(self.asset().to_string()));
        }

        let requested = self
            .total_supply()
            .checked_add(amount)
            .filter(|supply| *supply <= self.config.capacity)
            .ok_or(Error::ExceedsCapacity {
                requested: self.total_supply().saturating_add(amount),
                capacity: self.config.capacity,
            })?;

        let resulting = self.liquidity().saturating_add(amount);
        if resulting < self.config.min_investment {
            return Err(Error::BelowMinimum {
                resulting,
                minimum: self.config.min_investment,
            });
        }

        self.atomically(|pool| {
            pool.mint_shares(ctx, caller, amount, ctx.now())?;
            pool.record(
                ctx,
                PoolEventKind::Deposited {
                    account: caller.clone(),
                    amount,
                },
            );
            pool.custody.receive(caller, amount)?;
            Ok(())
        })?;

        tracing::info!(
            "Deposit of {} into {} by {} (supply {})",
            amount,
            self.address,
            caller,
            requested
        );

        Ok(amount)
    }

    /// Validate a withdrawal and price it against recognized losses
    pub(crate) fn plan_withdrawal(&self, ctx: &dyn Globals, caller: &AccountId, amount: Amount) -> Result<WithdrawalPlan> {
        Self::ensure_not_paused(ctx)?;
        Self::ensure_positive(amount, "withdrawal")?;

        let available = self.balance_of(caller);
        if available < amount {
            return Err(Error::InsufficientBalance {
                account: caller.to_string(),
                available,
                requested: amount,
            });
        }

        let unlocked = self.unlocked_to_withdraw(ctx, caller);
        if unlocked < amount {
            return Err(Error::TokensLocked {
                unlocked,
                requested: amount,
            });
        }

        let loss = self.owed(Channel::Loss, caller)?.min(amount);

        Ok(WithdrawalPlan {
            amount,
            loss,
            payout: amount - loss,
        })
    }

    /// Burn shares and either pay or defer, optionally after crediting a backstop
    ///
    /// `compensation` mints shares to the backstop pool for liquidity it has
    /// already delivered to this pool's locker.
    pub(crate) fn settle_withdrawal(
        &mut self,
        ctx: &dyn Globals,
        caller: &AccountId,
        plan: WithdrawalPlan,
        compensation: Option<(&AccountId, Amount)>,
    ) -> Result<WithdrawalReceipt> {
        let receipt = self.atomically(|pool| {
            let mut compensated = 0;
            if let Some((backstop, shortfall)) = compensation {
                pool.mint_shares(ctx, backstop, shortfall, ctx.now())?;
                pool.record(
                    ctx,
                    PoolEventKind::Compensated {
                        account: caller.clone(),
                        shortfall,
                        backstop: backstop.clone(),
                    },
                );
                compensated = shortfall;
            }

            let loss = pool
                .book
                .shares
                .recognize_up_to(Channel::Loss, caller, plan.loss)?;
            pool.burn_shares(ctx, caller, plan.amount)?;

            let payout = if plan.payout <= pool.liquidity() {
                pool.record(
                    ctx,
                    PoolEventKind::Withdrawn {
                        account: caller.clone(),
                        burned: plan.amount,
                        loss,
                        paid: plan.payout,
                    },
                );
                if plan.payout > 0 {
                    pool.custody.transfer(caller, plan.payout)?;
                }
                Payout::Paid(plan.payout)
            } else {
                let pending = pool.book.queue.defer(SettlementKind::Withdrawal, caller, plan.payout)?;
                pool.record(
                    ctx,
                    PoolEventKind::Withdrawn {
                        account: caller.clone(),
                        burned: plan.amount,
                        loss,
                        paid: 0,
                    },
                );
                pool.record(
                    ctx,
                    PoolEventKind::PendingCreated {
                        account: caller.clone(),
                        kind: SettlementKind::Withdrawal,
                        amount: plan.payout,
                        pending,
                    },
                );
                Payout::Deferred(pending)
            };

            Ok(WithdrawalReceipt {
                burned: plan.amount,
                loss,
                compensated,
                payout,
            })
        })?;

        match receipt.payout {
            Payout::Deferred(pending) => tracing::warn!(
                "Withdrawal of {} from {} by {} deferred (pending {})",
                plan.amount,
                self.address,
                caller,
                pending
            ),
            _ => tracing::info!(
                "Withdrawal of {} from {} by {} paid {} (loss {})",
                plan.amount,
                self.address,
                caller,
                receipt.payout.paid_amount(),
                receipt.loss
            ),
        }

        Ok(receipt)
    }

    /// Withdraw without backstop compensation
    ///
    /// A liquidity shortfall defers the whole payout into the settlement queue.
    pub fn withdraw(&mut self, ctx: &dyn Globals, caller: &AccountId, amount: Amount) -> Result<WithdrawalReceipt> {
        let plan = self.plan_withdrawal(ctx, caller, amount)?;
        self.settle_withdrawal(ctx, caller, plan, None)
    }

    /// Claim everything owed on a reward or yield channel
    ///
    /// Returns [`Payout::Deferred`] when the locker cannot cover the claim;
    /// the amount is recognized either way, so it cannot be claimed twice.
    pub fn claim(&mut self, ctx: &dyn Globals, caller: &AccountId, channel: Channel) -> Result<Payout> {
        Self::ensure_not_paused(ctx)?;

        let kind = match channel {
            Channel::Reward => SettlementKind::Reward,
            Channel::Yield => SettlementKind::Yield,
            Channel::Loss => {
                return Err(Error::InvalidAmount("losses cannot be claimed".to_string()));
            }
        };

        let owed = self.owed(channel, caller)?;
        if owed == 0 {
            return Ok(Payout::Nothing);
        }

        let payout = self.atomically(|pool| {
            let amount = pool.book.shares.recognize(channel, caller)?;

            if amount <= pool.liquidity() {
                pool.record(
                    ctx,
                    PoolEventKind::Claimed {
                        account: caller.clone(),
                        channel,
                        amount,
                    },
                );
                pool.custody.transfer(caller, amount)?;
                Ok(Payout::Paid(amount))
            } else {
                let pending = pool.book.queue.defer(kind, caller, amount)?;
                pool.record(
                    ctx,
                    PoolEventKind::PendingCreated {
                        account: caller.clone(),
                        kind,
                        amount,
                        pending,
                    },
                );
                Ok(Payout::Deferred(pending))
            }
        })?;

        tracing::info!("Claim of {} {} from {} by {}: {:?}", owed, channel, self.address, caller, payout);
        Ok(payout)
    }

    /// Claim rewards
    pub fn claim_reward(&mut self, ctx: &dyn Globals, caller: &AccountId) -> Result<Payout> {
        self.claim(ctx, caller, Channel::Reward)
    }

    /// Claim yields
    pub fn claim_yield(&mut self, ctx: &dyn Globals, caller: &AccountId) -> Result<Payout> {
        self.claim(ctx, caller, Channel::Yield)
    }

    /// Transfer shares
    ///
    /// Accrued rewards and yields stay with the sender; owed loss moves with
    /// the shares. Lockup is averaged into the receiver.
    pub fn transfer_shares(
        &mut self,
        ctx: &dyn Globals,
        caller: &AccountId,
        to: &AccountId,
        amount: Amount,
    ) -> Result<()> {
        Self::ensure_not_paused(ctx)?;
        Self::ensure_positive(amount, "transfer")?;

        let sender_date = self.deposit_date(caller).unwrap_or_else(|| ctx.now());
        let receiver_date = self.deposit_date(to);

        self.atomically(|pool| {
            let [from_change, to_change] = pool.book.shares.transfer(caller, to, amount)?;
            if from_change.current == 0 {
                pool.book.deposit_dates.remove(caller);
            }
            let date = Self::weighted_date(receiver_date, to_change.previous, sender_date, amount);
            pool.book.deposit_dates.insert(to.clone(), date);

            pool.record_balance(ctx, &from_change);
            pool.record_balance(ctx, &to_change);
            Ok(())
        })?;

        tracing::info!("Transferred {} shares of {} from {} to {}", amount, self.address, caller, to);
        Ok(())
    }

    // ----- Privileged operations -----

    /// Pay an account's whole pending entry
    pub fn conclude(
        &mut self,
        ctx: &dyn Globals,
        settler: &AccountId,
        kind: SettlementKind,
        account: &AccountId,
    ) -> Result<Amount> {
        Self::ensure_not_paused(ctx)?;
        self.ensure_admin(ctx, settler)?;

        self.atomically(|pool| {
            let amount = pool.book.queue.conclude(kind, account, &mut pool.custody)?;
            pool.record(
                ctx,
                PoolEventKind::PendingConcluded {
                    account: account.clone(),
                    kind,
                    amount,
                },
            );
            Ok(amount)
        })
    }

    /// Conclude a pending withdrawal
    pub fn conclude_pending_withdrawal(
        &mut self,
        ctx: &dyn Globals,
        settler: &AccountId,
        account: &AccountId,
    ) -> Result<Amount> {
        self.conclude(ctx, settler, SettlementKind::Withdrawal, account)
    }

    /// Conclude a pending reward
    pub fn conclude_pending_reward(
        &mut self,
        ctx: &dyn Globals,
        settler: &AccountId,
        account: &AccountId,
    ) -> Result<Amount> {
        self.conclude(ctx, settler, SettlementKind::Reward, account)
    }

    /// Add liquidity to the locker without minting shares
    pub fn admin_deposit(&mut self, ctx: &dyn Globals, caller: &AccountId, amount: Amount) -> Result<()> {
        Self::ensure_not_paused(ctx)?;
        self.ensure_admin(ctx, caller)?;
        Self::ensure_positive(amount, "admin deposit")?;

        self.atomically(|pool| {
            pool.record(
                ctx,
                PoolEventKind::AdminDeposited {
                    admin: caller.clone(),
                    amount,
                },
            );
            pool.custody.receive(caller, amount)?;
            Ok(())
        })?;

        tracing::info!("Admin deposit of {} into {} by {}", amount, self.address, caller);
        Ok(())
    }

    pub(crate) fn distribute_unchecked(
        &mut self,
        ctx: &dyn Globals,
        channel: Channel,
        amount: Amount,
    ) -> Result<Distribution> {
        self.atomically(|pool| {
            if channel.is_loss() {
                if amount > pool.book.principal_outstanding {
                    return Err(Error::InvalidAmount(format!(
                        "loss {} exceeds principal outstanding {}",
                        amount, pool.book.principal_outstanding
                    )));
                }
                pool.book.principal_outstanding -= amount;
            }

            let distribution = pool.book.shares.distribute(channel, amount)?;
            if amount > 0 {
                pool.record(ctx, PoolEventKind::Distributed { channel, amount });
            }
            Ok(distribution)
        })
    }

    /// Distribute on a channel across current holders
    pub fn distribute(
        &mut self,
        ctx: &dyn Globals,
        caller: &AccountId,
        channel: Channel,
        amount: Amount,
    ) -> Result<Distribution> {
        Self::ensure_not_paused(ctx)?;
        self.ensure_admin(ctx, caller)?;

        let distribution = self.distribute_unchecked(ctx, channel, amount)?;
        tracing::info!(
            "Distributed {} on {} channel of {} across {} shares",
            amount,
            channel,
            self.address,
            distribution.total_supply
        );
        Ok(distribution)
    }

    /// Distribute rewards
    pub fn distribute_rewards(&mut self, ctx: &dyn Globals, caller: &AccountId, amount: Amount) -> Result<Distribution> {
        self.distribute(ctx, caller, Channel::Reward, amount)
    }

    /// Distribute yields
    pub fn distribute_yields(&mut self, ctx: &dyn Globals, caller: &AccountId, amount: Amount) -> Result<Distribution> {
        self.distribute(ctx, caller, Channel::Yield, amount)
    }

    /// Write off principal and distribute it as loss
    pub fn distribute_losses(&mut self, ctx: &dyn Globals, caller: &AccountId, amount: Amount) -> Result<Distribution> {
        self.distribute(ctx, caller, Channel::Loss, amount)
    }

    /// Grant or revoke the pool admin capability
    pub fn set_admin(&mut self, ctx: &dyn Globals, caller: &AccountId, admin: &AccountId, enabled: bool) -> Result<()> {
        Self::ensure_not_paused(ctx)?;
        Self::ensure_governor(ctx, caller)?;

        let changed = if enabled {
            self.book.admins.insert(admin.clone())
        } else {
            self.book.admins.remove(admin)
        };

        if changed {
            self.record(
                ctx,
                PoolEventKind::AdminChanged {
                    admin: admin.clone(),
                    enabled,
                },
            );
            tracing::info!("Admin {} of {} set to {}", admin, self.address, enabled);
        }
        Ok(())
    }

    /// Stop accepting deposits and loans
    pub fn deactivate(&mut self, ctx: &dyn Globals, caller: &AccountId) -> Result<()> {
        Self::ensure_not_paused(ctx)?;
        Self::ensure_governor(ctx, caller)?;
        self.ensure_active("deactivate")?;

        self.book.state = PoolState::Deactivated;
        self.record(
            ctx,
            PoolEventKind::StateChanged {
                state: PoolState::Deactivated,
            },
        );

        tracing::info!("Pool {} deactivated", self.address);
        Ok(())
    }

    // ----- Borrower operations -----

    /// Draw liquidity against the pool
    pub fn borrow(&mut self, ctx: &dyn Globals, caller: &AccountId, amount: Amount) -> Result<Amount> {
        Self::ensure_not_paused(ctx)?;
        self.ensure_borrower(caller)?;
        self.ensure_active("borrow")?;
        Self::ensure_positive(amount, "borrow")?;

        let available = self.liquidity();
        if amount > available {
            return Err(Error::InsufficientLiquidity {
                available,
                required: amount,
            });
        }

        let principal = self.atomically(|pool| {
            let principal = pool
                .book
                .principal_outstanding
                .checked_add(amount)
                .ok_or_else(|| Error::InvalidAmount("principal outstanding overflow".to_string()))?;
            pool.book.principal_outstanding = principal;
            pool.record(
                ctx,
                PoolEventKind::Borrowed {
                    borrower: caller.clone(),
                    amount,
                    principal,
                },
            );
            pool.custody.transfer(caller, amount)?;
            Ok(principal)
        })?;

        tracing::info!("Borrowed {} from {} (principal {})", amount, self.address, principal);
        Ok(principal)
    }

    /// Repay all outstanding principal; any surplus is distributed as reward
    pub fn repay(&mut self, ctx: &dyn Globals, caller: &AccountId, amount: Amount) -> Result<Amount> {
        Self::ensure_not_paused(ctx)?;
        self.ensure_borrower(caller)?;
        Self::ensure_positive(amount, "repay")?;

        let principal = self.book.principal_outstanding;
        if amount < principal {
            return Err(Error::InvalidAmount(format!(
                "repayment {} does not cover principal outstanding {}",
                amount, principal
            )));
        }
        let surplus = amount - principal;

        self.atomically(|pool| {
            pool.book.principal_outstanding = 0;
            if surplus > 0 {
                pool.book.shares.distribute(Channel::Reward, surplus)?;
                pool.record(
                    ctx,
                    PoolEventKind::Distributed {
                        channel: Channel::Reward,
                        amount: surplus,
                    },
                );
            }
            pool.record(
                ctx,
                PoolEventKind::Repaid {
                    borrower: caller.clone(),
                    amount,
                    principal_repaid: principal,
                    surplus,
                },
            );
            pool.custody.receive(caller, amount)?;
            Ok(())
        })?;

        tracing::info!(
            "Repaid {} to {} (principal {}, surplus {})",
            amount,
            self.address,
            principal,
            surplus
        );
        Ok(surplus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::globals::ProtocolContext;
    use chrono::Duration;

    fn account(name: &str) -> AccountId {
        AccountId::new(name)
    }

    fn setup() -> (ProtocolContext, PoolCore) {
        let config = PoolConfig {
            asset: AssetId::new("USDC"),
            lockup_period_secs: 86_400,
            capacity: 10_000,
            min_investment: 50,
        };
        let ctx = ProtocolContext::new(account("gov"), Utc::now()).with_asset(config.asset.clone());
        let locker = Locker::new(account("pool/locker"), config.asset.clone());
        let pool = PoolCore::new(account("pool"), account("borrower"), config, locker).unwrap();
        (ctx, pool)
    }

    #[test]
    fn test_deposit_mints_one_to_one() {
        let (ctx, mut pool) = setup();
        pool.deposit(&ctx, &account("alice"), 100).unwrap();

        assert_eq!(pool.balance_of(&account("alice")), 100);
        assert_eq!(pool.total_supply(), 100);
        assert_eq!(pool.liquidity(), 100);
        assert_eq!(pool.deposit_date(&account("alice")), Some(ctx.now()));
    }

    #[test]
    fn test_deposit_bounds() {
        let (ctx, mut pool) = setup();
        assert!(matches!(
            pool.deposit(&ctx, &account("alice"), 49),
            Err(Error::BelowMinimum { resulting: 49, minimum: 50 })
        ));
        assert!(matches!(
            pool.deposit(&ctx, &account("alice"), 10_001),
            Err(Error::ExceedsCapacity { capacity: 10_000, .. })
        ));
        assert!(matches!(pool.deposit(&ctx, &account("alice"), 0), Err(Error::InvalidAmount(_))));
        assert_eq!(pool.total_supply(), 0);
        assert!(pool.events().is_empty());
    }

    #[test]
    fn test_deposit_rejects_unlisted_asset() {
        let (_, mut pool) = setup();
        let ctx = ProtocolContext::new(account("gov"), Utc::now());
        assert!(matches!(pool.deposit(&ctx, &account("alice"), 100), Err(Error::InvalidAsset(_))));
    }

    #[test]
    fn test_top_up_partially_extends_lockup() {
        let (mut ctx, mut pool) = setup();
        let start = ctx.now();
        pool.deposit(&ctx, &account("alice"), 300).unwrap();

        ctx.advance(Duration::seconds(4_000));
        pool.deposit(&ctx, &account("alice"), 100).unwrap();

        // 300 old units and 100 new units: date moves a quarter of the way
        assert_eq!(pool.deposit_date(&account("alice")), Some(start + Duration::seconds(1_000)));
    }

    #[test]
    fn test_withdraw_respects_lockup() {
        let (mut ctx, mut pool) = setup();
        pool.deposit(&ctx, &account("alice"), 100).unwrap();

        assert!(matches!(
            pool.withdraw(&ctx, &account("alice"), 100),
            Err(Error::TokensLocked { unlocked: 0, requested: 100 })
        ));

        ctx.advance(Duration::days(1));
        let receipt = pool.withdraw(&ctx, &account("alice"), 100).unwrap();
        assert_eq!(receipt.payout, Payout::Paid(100));
        assert_eq!(pool.custody().paid_to(&account("alice")), 100);
        assert_eq!(pool.deposit_date(&account("alice")), None);
    }

    #[test]
    fn test_withdraw_defers_when_lent_out() {
        let (mut ctx, mut pool) = setup();
        pool.deposit(&ctx, &account("alice"), 100).unwrap();
        pool.borrow(&ctx, &account("borrower"), 80).unwrap();
        ctx.advance(Duration::days(2));

        let receipt = pool.withdraw(&ctx, &account("alice"), 100).unwrap();
        assert_eq!(receipt.payout, Payout::Deferred(100));
        assert_eq!(pool.balance_of(&account("alice")), 0);
        assert_eq!(pool.pending(SettlementKind::Withdrawal, &account("alice")), 100);
        assert_eq!(pool.liquidity(), 20);
    }

    #[test]
    fn test_repay_surplus_becomes_reward() {
        let (ctx, mut pool) = setup();
        pool.deposit(&ctx, &account("alice"), 100).unwrap();
        pool.deposit(&ctx, &account("bob"), 300).unwrap();
        pool.borrow(&ctx, &account("borrower"), 200).unwrap();

        assert!(matches!(
            pool.repay(&ctx, &account("borrower"), 199),
            Err(Error::InvalidAmount(_))
        ));

        let surplus = pool.repay(&ctx, &account("borrower"), 240).unwrap();
        assert_eq!(surplus, 40);
        assert_eq!(pool.principal_outstanding(), 0);
        assert_eq!(pool.owed(Channel::Reward, &account("alice")).unwrap(), 10);
        assert_eq!(pool.owed(Channel::Reward, &account("bob")).unwrap(), 30);
        assert_eq!(pool.liquidity(), 440);
    }

    #[test]
    fn test_borrow_requires_borrower_and_liquidity() {
        let (ctx, mut pool) = setup();
        pool.deposit(&ctx, &account("alice"), 100).unwrap();

        assert!(matches!(pool.borrow(&ctx, &account("alice"), 10), Err(Error::NotAuthorized(_))));
        assert!(matches!(
            pool.borrow(&ctx, &account("borrower"), 101),
            Err(Error::InsufficientLiquidity { available: 100, required: 101 })
        ));
    }

    #[test]
    fn test_loss_reduces_withdrawal_payout() {
        let (mut ctx, mut pool) = setup();
        pool.deposit(&ctx, &account("alice"), 100).unwrap();
        pool.deposit(&ctx, &account("bob"), 100).unwrap();
        pool.borrow(&ctx, &account("borrower"), 50).unwrap();

        pool.distribute_losses(&ctx, &account("gov"), 50).unwrap();
        assert_eq!(pool.principal_outstanding(), 0);
        assert_eq!(pool.owed(Channel::Loss, &account("alice")).unwrap(), 25);

        ctx.advance(Duration::days(1));
        let receipt = pool.withdraw(&ctx, &account("alice"), 100).unwrap();
        assert_eq!(receipt.loss, 25);
        assert_eq!(receipt.payout, Payout::Paid(75));
        assert_eq!(pool.owed(Channel::Loss, &account("alice")).unwrap(), 0);
    }

    #[test]
    fn test_transferred_shares_carry_owed_loss() {
        let (mut ctx, mut pool) = setup();
        pool.deposit(&ctx, &account("alice"), 100).unwrap();
        pool.deposit(&ctx, &account("bob"), 100).unwrap();
        pool.borrow(&ctx, &account("borrower"), 50).unwrap();
        pool.distribute_losses(&ctx, &account("gov"), 50).unwrap();

        pool.transfer_shares(&ctx, &account("alice"), &account("alice2"), 100).unwrap();
        assert_eq!(pool.owed(Channel::Loss, &account("alice")).unwrap(), 0);
        assert_eq!(pool.owed(Channel::Loss, &account("alice2")).unwrap(), 25);

        ctx.advance(Duration::days(2));
        let receipt = pool.withdraw(&ctx, &account("alice2"), 100).unwrap();
        assert_eq!(receipt.loss, 25);
        assert_eq!(receipt.payout, Payout::Paid(75));

        let receipt = pool.withdraw(&ctx, &account("bob"), 100).unwrap();
        assert_eq!(receipt.loss, 25);
        assert_eq!(receipt.payout, Payout::Paid(75));
        assert_eq!(pool.liquidity(), 0);
        assert_eq!(pool.total_supply(), 0);
        assert_eq!(pool.queue().total_pending(SettlementKind::Withdrawal), 0);
    }

    #[test]
    fn test_loss_cannot_exceed_principal() {
        let (ctx, mut pool) = setup();
        pool.deposit(&ctx, &account("alice"), 100).unwrap();
        assert!(matches!(
            pool.distribute_losses(&ctx, &account("gov"), 1),
            Err(Error::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_claim_pays_or_defers() {
        let (ctx, mut pool) = setup();
        pool.deposit(&ctx, &account("alice"), 100).unwrap();
        pool.distribute_rewards(&ctx, &account("gov"), 60).unwrap();

        assert_eq!(pool.claim_reward(&ctx, &account("alice")).unwrap(), Payout::Paid(60));
        assert_eq!(pool.claim_reward(&ctx, &account("alice")).unwrap(), Payout::Nothing);

        pool.distribute_rewards(&ctx, &account("gov"), 500).unwrap();
        assert_eq!(pool.claim_reward(&ctx, &account("alice")).unwrap(), Payout::Deferred(500));
        assert_eq!(pool.owed(Channel::Reward, &account("alice")).unwrap(), 0);
        assert_eq!(pool.custody().paid_to(&account("alice")), 60);
    }

    #[test]
    fn test_claim_rejects_loss_channel() {
        let (ctx, mut pool) = setup();
        assert!(matches!(
            pool.claim(&ctx, &account("alice"), Channel::Loss),
            Err(Error::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_failed_transfer_rolls_back_book() {
        let (mut ctx, mut pool) = setup();
        pool.deposit(&ctx, &account("alice"), 100).unwrap();
        ctx.advance(Duration::days(1));
        pool.custody_mut().set_frozen(true);
        let before = pool.book.clone();

        assert!(pool.withdraw(&ctx, &account("alice"), 100).is_err());
        assert_eq!(pool.book, before);
        assert_eq!(pool.balance_of(&account("alice")), 100);
    }

    #[test]
    fn test_privileged_operations_require_admin() {
        let (ctx, mut pool) = setup();
        pool.deposit(&ctx, &account("alice"), 100).unwrap();

        assert!(matches!(
            pool.distribute_rewards(&ctx, &account("alice"), 10),
            Err(Error::NotAuthorized(_))
        ));
        assert!(matches!(
            pool.set_admin(&ctx, &account("alice"), &account("alice"), true),
            Err(Error::NotAuthorized(_))
        ));

        pool.set_admin(&ctx, &account("gov"), &account("ops"), true).unwrap();
        pool.distribute_rewards(&ctx, &account("ops"), 10).unwrap();
        pool.admin_deposit(&ctx, &account("ops"), 10).unwrap();
        assert_eq!(pool.liquidity(), 110);
    }

    #[test]
    fn test_paused_protocol_blocks_everything() {
        let (mut ctx, mut pool) = setup();
        pool.deposit(&ctx, &account("alice"), 100).unwrap();
        ctx.set_paused(true);

        assert!(matches!(pool.deposit(&ctx, &account("alice"), 100), Err(Error::ProtocolPaused)));
        assert!(matches!(pool.withdraw(&ctx, &account("alice"), 1), Err(Error::ProtocolPaused)));
        assert!(matches!(pool.claim_reward(&ctx, &account("alice")), Err(Error::ProtocolPaused)));
        assert!(matches!(
            pool.distribute_rewards(&ctx, &account("gov"), 1),
            Err(Error::ProtocolPaused)
        ));
    }

    #[test]
    fn test_deactivated_pool_allows_exits_only() {
        let (mut ctx, mut pool) = setup();
        pool.deposit(&ctx, &account("alice"), 100).unwrap();
        pool.deactivate(&ctx, &account("gov")).unwrap();

        assert!(matches!(pool.deposit(&ctx, &account("alice"), 100), Err(Error::BadState(_))));
        assert!(matches!(pool.borrow(&ctx, &account("borrower"), 1), Err(Error::BadState(_))));

        ctx.advance(Duration::days(1));
        assert!(pool.withdraw(&ctx, &account("alice"), 100).is_ok());
    }

    #[test]
    fn test_transfer_shares_moves_lockup_and_keeps_accrual() {
        let (mut ctx, mut pool) = setup();
        pool.deposit(&ctx, &account("alice"), 100).unwrap();
        pool.distribute_rewards(&ctx, &account("gov"), 10).unwrap();
        ctx.advance(Duration::hours(1));

        pool.transfer_shares(&ctx, &account("alice"), &account("bob"), 100).unwrap();
        assert_eq!(pool.owed(Channel::Reward, &account("alice")).unwrap(), 10);
        assert_eq!(pool.owed(Channel::Reward, &account("bob")).unwrap(), 0);
        assert_eq!(pool.deposit_date(&account("alice")), None);
        assert_eq!(pool.deposit_date(&account("bob")), Some(ctx.now() - Duration::hours(1)));
    }

    #[test]
    fn test_utilization() {
        let (ctx, mut pool) = setup();
        assert_eq!(pool.utilization(), Decimal::ZERO);

        pool.deposit(&ctx, &account("alice"), 400).unwrap();
        pool.borrow(&ctx, &account("borrower"), 100).unwrap();
        assert_eq!(pool.utilization(), Decimal::new(25, 2));
        assert_eq!(pool.summary().principal_outstanding, 100);
    }

    #[test]
    fn test_events_json_lines() {
        let (ctx, mut pool) = setup();
        pool.deposit(&ctx, &account("alice"), 100).unwrap();

        let lines = pool.events_json_lines().unwrap();
        assert_eq!(lines.lines().count(), pool.events().len());
        assert!(lines.contains("\"type\":\"deposited\""));
    }
}
