//! Protocol
//!
//! Owns the blended pool and every regional pool, keyed by identifier. Pools
//! never hold references to each other: calls that touch two pools
//! (compensation, harvesting, redemption, settling the blended pool's pending
//! entries) are routed here and resolve the second pool by lookup.

use crate::{
    blended::BlendedPool,
    config::Config,
    globals::Globals,
    metrics::Metrics,
    pool::{PoolBook, PoolCore, PoolSummary, WithdrawalReceipt},
    regional::RegionalPool,
    snapshot::PoolSnapshot,
    Error, Result,
};
use indexmap::IndexMap;
use ledger_core::{AccountId, Amount, Channel, Distribution};
use settlement::{Custody, Locker, Payout, SettlementKind};

/// Blended pool plus the regional pools it may back
#[derive(Debug)]
pub struct Protocol<C: Custody = Locker> {
    config: Config,
    blended: BlendedPool<C>,
    regional: IndexMap<AccountId, RegionalPool<C>>,
    metrics: Metrics,
}

impl<C: Custody> Protocol<C> {
    /// Create protocol around an existing blended pool
    pub fn new(config: Config, blended: BlendedPool<C>) -> Result<Self> {
        config.validate()?;

        tracing::info!(
            "Starting {} {} with blended pool {}",
            config.service_name,
            config.service_version,
            blended.address()
        );

        Ok(Self {
            config,
            blended,
            regional: IndexMap::new(),
            metrics: Metrics::new()?,
        })
    }

    // ----- Lookup -----

    /// Configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Metrics
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Blended pool
    pub fn blended(&self) -> &BlendedPool<C> {
        &self.blended
    }

    /// Blended pool, for registry and admin operations
    pub fn blended_mut(&mut self) -> &mut BlendedPool<C> {
        &mut self.blended
    }

    /// Regional pool by identifier
    pub fn regional(&self, pool: &AccountId) -> Result<&RegionalPool<C>> {
        self.regional
            .get(pool)
            .ok_or_else(|| Error::UnknownPool(pool.to_string()))
    }

    /// Regional pool by identifier, mutable
    pub fn regional_mut(&mut self, pool: &AccountId) -> Result<&mut RegionalPool<C>> {
        self.regional
            .get_mut(pool)
            .ok_or_else(|| Error::UnknownPool(pool.to_string()))
    }

    /// Regional pools in creation order
    pub fn regional_pools(&self) -> impl Iterator<Item = &RegionalPool<C>> {
        self.regional.values()
    }

    /// Pool core of either kind
    pub fn core(&self, pool: &AccountId) -> Result<&PoolCore<C>> {
        if pool == self.blended.address() {
            Ok(self.blended.core())
        } else {
            self.regional(pool).map(RegionalPool::core)
        }
    }

    fn core_mut(&mut self, pool: &AccountId) -> Result<&mut PoolCore<C>> {
        if pool == self.blended.address() {
            Ok(self.blended.core_mut())
        } else {
            self.regional_mut(pool).map(RegionalPool::core_mut)
        }
    }

    fn is_regional(&self, pool: &AccountId) -> bool {
        self.regional.contains_key(pool)
    }

    // ----- Factory -----

    /// Add a regional pool; identifiers are unique across the protocol
    pub fn create_regional_pool(&mut self, ctx: &dyn Globals, caller: &AccountId, pool: RegionalPool<C>) -> Result<()> {
        PoolCore::<C>::ensure_not_paused(ctx)?;
        PoolCore::<C>::ensure_governor(ctx, caller)?;

        let address = pool.address().clone();
        if self.is_regional(&address) || address == *self.blended.address() {
            return Err(Error::DuplicatePool(address.to_string()));
        }
        if !ctx.is_valid_asset(pool.core().asset()) {
            return Err(Error::InvalidAsset(pool.core().asset().to_string()));
        }

        self.regional.insert(address.clone(), pool);
        self.metrics.set_regional_pools(self.regional.len());

        tracing::info!("Created regional pool {}", address);
        Ok(())
    }

    /// Point a regional pool at the blended pool
    pub fn set_blended_pool(&mut self, ctx: &dyn Globals, caller: &AccountId, pool: &AccountId) -> Result<()> {
        let blended = self.blended.address().clone();
        self.regional_mut(pool)?.set_blended_pool(ctx, caller, &blended)
    }

    /// Let the blended pool back a regional pool
    pub fn register_regional(&mut self, ctx: &dyn Globals, caller: &AccountId, pool: &AccountId) -> Result<bool> {
        self.regional(pool)?;
        self.blended.register_regional(ctx, caller, pool)
    }

    /// Stop the blended pool backing a regional pool
    pub fn unregister_regional(&mut self, ctx: &dyn Globals, caller: &AccountId, pool: &AccountId) -> Result<bool> {
        self.blended.unregister_regional(ctx, caller, pool)
    }

    // ----- Depositor operations -----

    /// Deposit into any pool
    pub fn deposit(&mut self, ctx: &dyn Globals, pool: &AccountId, caller: &AccountId, amount: Amount) -> Result<Amount> {
        let minted = self.core_mut(pool)?.deposit(ctx, caller, amount)?;
        self.metrics.record_deposit();
        Ok(minted)
    }

    /// Withdraw from any pool; regional withdrawals may draw on the blended pool
    ///
    /// The blended pool exits regional positions through [`Protocol::redeem`].
    pub fn withdraw(
        &mut self,
        ctx: &dyn Globals,
        pool: &AccountId,
        caller: &AccountId,
        amount: Amount,
    ) -> Result<WithdrawalReceipt> {
        let receipt = if pool == self.blended.address() {
            self.blended.core_mut().withdraw(ctx, caller, amount)?
        } else {
            if caller == self.blended.address() {
                return Err(Error::NotAuthorized(format!(
                    "blended pool {} exits {} through redeem",
                    caller, pool
                )));
            }
            let regional = self
                .regional
                .get_mut(pool)
                .ok_or_else(|| Error::UnknownPool(pool.to_string()))?;
            regional.withdraw(ctx, caller, amount, Some(&mut self.blended))?
        };

        self.metrics.record_withdrawal(
            matches!(receipt.payout, Payout::Deferred(_)),
            receipt.compensated > 0,
        );
        Ok(receipt)
    }

    fn claim(&mut self, ctx: &dyn Globals, pool: &AccountId, caller: &AccountId, channel: Channel) -> Result<Payout> {
        let payout = self.core_mut(pool)?.claim(ctx, caller, channel)?;
        if let Payout::Deferred(_) = payout {
            self.metrics.record_deferred();
        }
        Ok(payout)
    }

    /// Claim rewards from any pool
    pub fn claim_reward(&mut self, ctx: &dyn Globals, pool: &AccountId, caller: &AccountId) -> Result<Payout> {
        self.claim(ctx, pool, caller, Channel::Reward)
    }

    /// Claim yields from any pool
    pub fn claim_yield(&mut self, ctx: &dyn Globals, pool: &AccountId, caller: &AccountId) -> Result<Payout> {
        self.claim(ctx, pool, caller, Channel::Yield)
    }

    /// Transfer shares within a pool
    pub fn transfer_shares(
        &mut self,
        ctx: &dyn Globals,
        pool: &AccountId,
        caller: &AccountId,
        to: &AccountId,
        amount: Amount,
    ) -> Result<()> {
        self.core_mut(pool)?.transfer_shares(ctx, caller, to, amount)
    }

    // ----- Settlement -----

    /// Conclude a pending entry
    ///
    /// Funds concluded to the blended pool from a regional pool land in the
    /// blended locker; concluded rewards and yields are redistributed to
    /// blended depositors as yield.
    pub fn conclude(
        &mut self,
        ctx: &dyn Globals,
        pool: &AccountId,
        settler: &AccountId,
        kind: SettlementKind,
        account: &AccountId,
    ) -> Result<Amount> {
        let amount = if account == self.blended.address() && self.is_regional(pool) {
            self.pay_blended(
                ctx,
                pool,
                kind,
                |core| core.conclude(ctx, settler, kind, account),
                |amount| *amount,
            )?
        } else {
            self.core_mut(pool)?.conclude(ctx, settler, kind, account)?
        };
        self.metrics.record_concluded();

        Ok(amount)
    }

    /// Conclude a pending withdrawal
    pub fn conclude_pending_withdrawal(
        &mut self,
        ctx: &dyn Globals,
        pool: &AccountId,
        settler: &AccountId,
        account: &AccountId,
    ) -> Result<Amount> {
        self.conclude(ctx, pool, settler, SettlementKind::Withdrawal, account)
    }

    /// Conclude a pending reward
    pub fn conclude_pending_reward(
        &mut self,
        ctx: &dyn Globals,
        pool: &AccountId,
        settler: &AccountId,
        account: &AccountId,
    ) -> Result<Amount> {
        self.conclude(ctx, pool, settler, SettlementKind::Reward, account)
    }

    /// Run a regional payout to the blended pool and book it on the blended side
    ///
    /// Both pools are checkpointed first. If the blended side cannot take the
    /// funds, both books are restored and the payout goes back into the
    /// regional locker.
    fn pay_blended<T>(
        &mut self,
        ctx: &dyn Globals,
        pool: &AccountId,
        kind: SettlementKind,
        pay: impl FnOnce(&mut PoolCore<C>) -> Result<T>,
        paid: impl FnOnce(&T) -> Amount,
    ) -> Result<T> {
        let regional = self
            .regional
            .get_mut(pool)
            .ok_or_else(|| Error::UnknownPool(pool.to_string()))?;
        let from = regional.core().custody().address().clone();
        let regional_checkpoint = regional.core().book.clone();
        let blended_checkpoint = self.blended.core().book.clone();

        let outcome = pay(regional.core_mut())?;
        let amount = paid(&outcome);
        if amount == 0 {
            return Ok(outcome);
        }

        if let Err(err) = self.credit_blended(ctx, &from, kind, amount) {
            self.blended.core_mut().book = blended_checkpoint;
            self.return_payout(pool, regional_checkpoint, amount);
            tracing::warn!(
                "Payout of {} from {} to blended pool reversed: {}",
                amount,
                pool,
                err
            );
            return Err(err);
        }

        Ok(outcome)
    }

    fn return_payout(&mut self, pool: &AccountId, checkpoint: PoolBook, amount: Amount) {
        let blended = self.blended.address().clone();
        let Some(regional) = self.regional.get_mut(pool) else {
            return;
        };

        if let Err(err) = regional.core_mut().custody_mut().receive(&blended, amount) {
            tracing::error!("Failed to return {} to {}: {}", amount, pool, err);
            return;
        }
        regional.core_mut().book = checkpoint;
    }

    /// Book funds arriving from a regional pool; the locker is touched last
    fn credit_blended(&mut self, ctx: &dyn Globals, from: &AccountId, kind: SettlementKind, amount: Amount) -> Result<()> {
        let distribute = kind != SettlementKind::Withdrawal;

        if distribute && self.blended.core().total_supply() == 0 {
            tracing::warn!(
                "Blended pool {} has no depositors, keeping {} as liquidity",
                self.blended.address(),
                amount
            );
        } else if distribute {
            self.blended
                .core_mut()
                .distribute_unchecked(ctx, Channel::Yield, amount)?;
        }

        self.blended.core_mut().custody_mut().receive(from, amount)?;

        if distribute && self.blended.core().total_supply() > 0 {
            self.metrics.record_distribution();
        }
        Ok(())
    }

    /// Pull the blended pool's rewards and yields out of a regional pool
    ///
    /// Paid amounts are redistributed on the blended pool's yield channel and
    /// returned; deferred amounts follow when the regional pool concludes them.
    pub fn harvest(&mut self, ctx: &dyn Globals, caller: &AccountId, pool: &AccountId) -> Result<Amount> {
        self.blended.core().ensure_admin(ctx, caller)?;

        let blended = self.blended.address().clone();
        let mut harvested: Amount = 0;

        for channel in [Channel::Reward, Channel::Yield] {
            let kind = match channel {
                Channel::Yield => SettlementKind::Yield,
                _ => SettlementKind::Reward,
            };

            let payout = self.pay_blended(
                ctx,
                pool,
                kind,
                |core| core.claim(ctx, &blended, channel),
                |payout| match payout {
                    Payout::Paid(amount) => *amount,
                    _ => 0,
                },
            )?;

            match payout {
                Payout::Paid(amount) => harvested = harvested.saturating_add(amount),
                Payout::Deferred(_) => self.metrics.record_deferred(),
                Payout::Nothing => {}
            }
        }

        tracing::info!("Harvested {} from {} into {}", harvested, pool, blended);
        Ok(harvested)
    }

    /// Withdraw the blended pool's position in a regional pool
    ///
    /// Never compensated by the blended pool itself; a shortfall defers.
    pub fn redeem(
        &mut self,
        ctx: &dyn Globals,
        caller: &AccountId,
        pool: &AccountId,
        amount: Amount,
    ) -> Result<WithdrawalReceipt> {
        self.blended.core().ensure_admin(ctx, caller)?;

        let blended = self.blended.address().clone();
        let receipt = self.pay_blended(
            ctx,
            pool,
            SettlementKind::Withdrawal,
            |core| core.withdraw(ctx, &blended, amount),
            |receipt| match receipt.payout {
                Payout::Paid(paid) => paid,
                _ => 0,
            },
        )?;

        self.metrics
            .record_withdrawal(matches!(receipt.payout, Payout::Deferred(_)), false);
        tracing::info!("Blended pool redeemed {} from {}: {:?}", amount, pool, receipt.payout);
        Ok(receipt)
    }

    // ----- Borrower and admin operations -----

    /// Borrow from any pool
    pub fn borrow(&mut self, ctx: &dyn Globals, pool: &AccountId, caller: &AccountId, amount: Amount) -> Result<Amount> {
        self.core_mut(pool)?.borrow(ctx, caller, amount)
    }

    /// Repay a pool's principal
    pub fn repay(&mut self, ctx: &dyn Globals, pool: &AccountId, caller: &AccountId, amount: Amount) -> Result<Amount> {
        let surplus = self.core_mut(pool)?.repay(ctx, caller, amount)?;
        if surplus > 0 {
            self.metrics.record_distribution();
        }
        Ok(surplus)
    }

    /// Top up a pool's liquidity without minting shares
    pub fn admin_deposit(&mut self, ctx: &dyn Globals, pool: &AccountId, caller: &AccountId, amount: Amount) -> Result<()> {
        self.core_mut(pool)?.admin_deposit(ctx, caller, amount)
    }

    /// Distribute on a channel
    pub fn distribute(
        &mut self,
        ctx: &dyn Globals,
        pool: &AccountId,
        caller: &AccountId,
        channel: Channel,
        amount: Amount,
    ) -> Result<Distribution> {
        let distribution = self.core_mut(pool)?.distribute(ctx, caller, channel, amount)?;
        self.metrics.record_distribution();
        Ok(distribution)
    }

    /// Distribute rewards
    pub fn distribute_rewards(&mut self, ctx: &dyn Globals, pool: &AccountId, caller: &AccountId, amount: Amount) -> Result<Distribution> {
        self.distribute(ctx, pool, caller, Channel::Reward, amount)
    }

    /// Distribute yields
    pub fn distribute_yields(&mut self, ctx: &dyn Globals, pool: &AccountId, caller: &AccountId, amount: Amount) -> Result<Distribution> {
        self.distribute(ctx, pool, caller, Channel::Yield, amount)
    }

    /// Write off principal as loss
    pub fn distribute_losses(&mut self, ctx: &dyn Globals, pool: &AccountId, caller: &AccountId, amount: Amount) -> Result<Distribution> {
        self.distribute(ctx, pool, caller, Channel::Loss, amount)
    }

    /// Grant or revoke a pool admin
    pub fn set_admin(
        &mut self,
        ctx: &dyn Globals,
        pool: &AccountId,
        caller: &AccountId,
        admin: &AccountId,
        enabled: bool,
    ) -> Result<()> {
        self.core_mut(pool)?.set_admin(ctx, caller, admin, enabled)
    }

    /// Deactivate a pool
    pub fn deactivate(&mut self, ctx: &dyn Globals, pool: &AccountId, caller: &AccountId) -> Result<()> {
        self.core_mut(pool)?.deactivate(ctx, caller)
    }

    // ----- Reporting -----

    /// Summaries of the blended pool followed by every regional pool
    pub fn summaries(&self) -> Vec<PoolSummary> {
        std::iter::once(self.blended.core().summary())
            .chain(self.regional.values().map(|pool| pool.core().summary()))
            .collect()
    }

    /// Persisted record of a pool
    pub fn snapshot(&self, pool: &AccountId) -> Result<PoolSnapshot> {
        Ok(self.core(pool)?.snapshot())
    }

    /// Verify every pool's ledger and the blended registry
    pub fn check_invariants(&self) -> Result<()> {
        self.blended.core().shares().check_invariants()?;
        for pool in self.regional.values() {
            pool.core().shares().check_invariants()?;
        }

        if let Some(unknown) = self.blended.regional_pools().find(|pool| !self.is_regional(pool)) {
            return Err(Error::Ledger(ledger_core::Error::InvariantViolation(format!(
                "blended pool backs unknown pool {}",
                unknown
            ))));
        }

        Ok(())
    }
}

impl Protocol<Locker> {
    /// Create protocol with in-memory lockers
    pub fn with_lockers(config: Config, blended: AccountId, borrower: AccountId) -> Result<Self> {
        let locker = Locker::new(Self::locker_address(&blended), config.blended.asset.clone());
        let pool = BlendedPool::new(blended, borrower, config.blended.clone(), locker)?;
        Self::new(config, pool)
    }

    /// Create a regional pool with an in-memory locker, backed by the blended pool
    pub fn open_regional_pool(
        &mut self,
        ctx: &dyn Globals,
        caller: &AccountId,
        address: AccountId,
        borrower: AccountId,
    ) -> Result<()> {
        let locker = Locker::new(Self::locker_address(&address), self.config.regional.asset.clone());
        let pool = RegionalPool::new(address.clone(), borrower, self.config.regional.clone(), locker)?;

        self.create_regional_pool(ctx, caller, pool)?;
        self.set_blended_pool(ctx, caller, &address)?;
        self.register_regional(ctx, caller, &address)?;
        Ok(())
    }

    fn locker_address(pool: &AccountId) -> AccountId {
        AccountId::new(format!("{}/locker", pool))
    }
}
