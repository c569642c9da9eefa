//! Regional pool
//!
//! A pool core plus an optional reference to the blended pool that backs it.
//! When a withdrawal finds the locker short, the regional pool first asks the
//! backstop for the difference and only defers the payout if that is not
//! possible.

use crate::{
    blended::BlendedPool,
    config::PoolConfig,
    events::PoolEventKind,
    globals::Globals,
    pool::{PoolCore, WithdrawalPlan, WithdrawalReceipt},
    Error, Result,
};
use ledger_core::{AccountId, Amount};
use settlement::{Custody, Locker};

/// Lending pool with optional blended-pool backstop
#[derive(Debug)]
pub struct RegionalPool<C: Custody = Locker> {
    core: PoolCore<C>,
    blended_pool: Option<AccountId>,
}

impl<C: Custody> RegionalPool<C> {
    /// Create regional pool over a locker
    pub fn new(address: AccountId, borrower: AccountId, config: PoolConfig, custody: C) -> Result<Self> {
        Ok(Self {
            core: PoolCore::new(address, borrower, config, custody)?,
            blended_pool: None,
        })
    }

    /// Pool core
    pub fn core(&self) -> &PoolCore<C> {
        &self.core
    }

    /// Pool core, for depositor, borrower and admin operations
    pub fn core_mut(&mut self) -> &mut PoolCore<C> {
        &mut self.core
    }

    /// Pool address
    pub fn address(&self) -> &AccountId {
        self.core.address()
    }

    /// Backstop pool, if configured
    pub fn blended_pool(&self) -> Option<&AccountId> {
        self.blended_pool.as_ref()
    }

    /// Set the backstop pool; can only be done once
    pub fn set_blended_pool(&mut self, ctx: &dyn Globals, caller: &AccountId, pool: &AccountId) -> Result<()> {
        PoolCore::<C>::ensure_not_paused(ctx)?;
        self.core.ensure_admin(ctx, caller)?;

        if let Some(existing) = &self.blended_pool {
            return Err(Error::AlreadyConfigured(format!(
                "blended pool of {} is already {}",
                self.address(),
                existing
            )));
        }

        self.blended_pool = Some(pool.clone());
        self.core
            .record(ctx, PoolEventKind::BlendedPoolSet { pool: pool.clone() });

        tracing::info!("Pool {} backed by {}", self.address(), pool);
        Ok(())
    }

    /// Amount the backstop would have to supply, if it can and may
    fn compensation_for<B: Custody>(
        &self,
        caller: &AccountId,
        plan: &WithdrawalPlan,
        backstop: &BlendedPool<B>,
    ) -> Option<Amount> {
        let shortfall = plan.payout.saturating_sub(self.core.liquidity());
        if shortfall == 0 {
            return None;
        }

        let eligible = self.blended_pool.as_ref() == Some(backstop.address())
            && caller != backstop.address()
            && backstop.core().asset() == self.core.asset()
            && backstop.core().liquidity() >= shortfall
            && backstop.is_registered(self.address());

        if !eligible {
            tracing::debug!(
                "Backstop {} cannot cover {} for {} on {}",
                backstop.address(),
                shortfall,
                caller,
                self.address()
            );
            return None;
        }

        Some(shortfall)
    }

    /// Withdraw, drawing any liquidity shortfall from the backstop
    ///
    /// Compensation requires the backstop to be this pool's configured blended
    /// pool, hold the same asset and enough liquidity, and have this pool in
    /// its registry; the caller must not be the backstop itself. Otherwise the
    /// payout is deferred into the settlement queue.
    pub fn withdraw<B: Custody>(
        &mut self,
        ctx: &dyn Globals,
        caller: &AccountId,
        amount: Amount,
        backstop: Option<&mut BlendedPool<B>>,
    ) -> Result<WithdrawalReceipt> {
        let plan = self.core.plan_withdrawal(ctx, caller, amount)?;

        let backstop = match backstop {
            Some(backstop) => backstop,
            None => return self.core.settle_withdrawal(ctx, caller, plan, None),
        };

        match self.compensation_for(caller, &plan, backstop) {
            Some(shortfall) => self.withdraw_compensated(ctx, caller, plan, backstop, shortfall),
            None => self.core.settle_withdrawal(ctx, caller, plan, None),
        }
    }

    fn withdraw_compensated<B: Custody>(
        &mut self,
        ctx: &dyn Globals,
        caller: &AccountId,
        plan: WithdrawalPlan,
        backstop: &mut BlendedPool<B>,
        shortfall: Amount,
    ) -> Result<WithdrawalReceipt> {
        let backstop_address = backstop.address().clone();
        let backstop_locker = backstop.core().custody().address().clone();
        let locker = self.core.custody().address().clone();
        let backstop_checkpoint = backstop.core().book.clone();

        backstop.request_assets(ctx, &self.core, shortfall)?;

        if let Err(err) = self.core.custody.receive(&backstop_locker, shortfall) {
            Self::reverse_request(backstop, backstop_checkpoint, &locker, shortfall);
            return Err(err.into());
        }

        let settled = self
            .core
            .settle_withdrawal(ctx, caller, plan, Some((&backstop_address, shortfall)));

        let err = match settled {
            Ok(receipt) => {
                tracing::info!(
                    "Backstop {} covered {} of withdrawal by {} on {}",
                    backstop_address,
                    shortfall,
                    caller,
                    self.address()
                );
                return Ok(receipt);
            }
            Err(err) => err,
        };

        match self.core.custody.transfer(&backstop_locker, shortfall) {
            Ok(()) => {
                Self::reverse_request(backstop, backstop_checkpoint, &locker, shortfall);
                tracing::warn!(
                    "Compensation of {} for {} on {} reversed: {}",
                    shortfall,
                    caller,
                    self.address(),
                    err
                );
            }
            Err(return_err) => {
                // Funds stay in this locker; book them as the backstop's deposit
                tracing::error!(
                    "Failed to return {} from {} to backstop {}: {}",
                    shortfall,
                    self.address(),
                    backstop_address,
                    return_err
                );
                self.core.atomically(|pool| {
                    pool.mint_shares(ctx, &backstop_address, shortfall, ctx.now())?;
                    pool.record(
                        ctx,
                        PoolEventKind::Deposited {
                            account: backstop_address.clone(),
                            amount: shortfall,
                        },
                    );
                    Ok(())
                })?;
            }
        }

        Err(err)
    }

    /// Undo a completed `request_assets` on the backstop
    fn reverse_request<B: Custody>(
        backstop: &mut BlendedPool<B>,
        checkpoint: crate::pool::PoolBook,
        from: &AccountId,
        amount: Amount,
    ) {
        if let Err(err) = backstop.core_mut().custody_mut().receive(from, amount) {
            tracing::error!("Failed to restore {} to backstop {}: {}", amount, backstop.address(), err);
            return;
        }
        backstop.core_mut().book = checkpoint;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::globals::ProtocolContext;
    use chrono::{Duration, Utc};
    use ledger_core::AssetId;
    use settlement::Payout;

    fn account(name: &str) -> AccountId {
        AccountId::new(name)
    }

    fn config(asset: &str) -> PoolConfig {
        PoolConfig {
            asset: AssetId::new(asset),
            lockup_period_secs: 3_600,
            capacity: 1_000_000,
            min_investment: 1,
        }
    }

    fn setup() -> (ProtocolContext, RegionalPool, BlendedPool) {
        let ctx = ProtocolContext::new(account("gov"), Utc::now())
            .with_asset(AssetId::new("USDC"))
            .with_asset(AssetId::new("EURC"));

        let mut regional = RegionalPool::new(
            account("emea"),
            account("borrower"),
            config("USDC"),
            Locker::new(account("emea/locker"), AssetId::new("USDC")),
        )
        .unwrap();
        let mut blended = BlendedPool::new(
            account("blended"),
            account("treasury"),
            config("USDC"),
            Locker::new(account("blended/locker"), AssetId::new("USDC")),
        )
        .unwrap();

        regional.set_blended_pool(&ctx, &account("gov"), &account("blended")).unwrap();
        blended.register_regional(&ctx, &account("gov"), &account("emea")).unwrap();

        regional.core_mut().deposit(&ctx, &account("alice"), 1_000).unwrap();
        regional.core_mut().borrow(&ctx, &account("borrower"), 700).unwrap();
        blended.core_mut().deposit(&ctx, &account("carol"), 5_000).unwrap();

        (ctx, regional, blended)
    }

    #[test]
    fn test_blended_pool_settable_once() {
        let (ctx, mut regional, _) = setup();
        assert!(matches!(
            regional.set_blended_pool(&ctx, &account("gov"), &account("other")),
            Err(Error::AlreadyConfigured(_))
        ));
    }

    #[test]
    fn test_shortfall_is_compensated() {
        let (mut ctx, mut regional, mut blended) = setup();
        ctx.advance(Duration::hours(2));

        let receipt = regional
            .withdraw(&ctx, &account("alice"), 1_000, Some(&mut blended))
            .unwrap();

        assert_eq!(receipt.payout, Payout::Paid(1_000));
        assert_eq!(receipt.compensated, 700);
        assert_eq!(regional.core().balance_of(&account("alice")), 0);
        assert_eq!(regional.core().balance_of(&account("blended")), 700);
        assert_eq!(regional.core().liquidity(), 0);
        assert_eq!(blended.core().liquidity(), 4_300);
        assert_eq!(regional.core().custody().paid_to(&account("alice")), 1_000);
    }

    #[test]
    fn test_unregistered_pool_defers() {
        let (mut ctx, mut regional, mut blended) = setup();
        blended.unregister_regional(&ctx, &account("gov"), &account("emea")).unwrap();
        ctx.advance(Duration::hours(2));

        let receipt = regional
            .withdraw(&ctx, &account("alice"), 1_000, Some(&mut blended))
            .unwrap();

        assert_eq!(receipt.payout, Payout::Deferred(1_000));
        assert_eq!(receipt.compensated, 0);
        assert_eq!(blended.core().liquidity(), 5_000);
    }

    #[test]
    fn test_asset_mismatch_defers() {
        let (mut ctx, mut regional, _) = setup();
        let mut euro = BlendedPool::new(
            account("blended"),
            account("treasury"),
            config("EURC"),
            Locker::new(account("blended/locker"), AssetId::new("EURC")),
        )
        .unwrap();
        euro.register_regional(&ctx, &account("gov"), &account("emea")).unwrap();
        euro.core_mut().deposit(&ctx, &account("carol"), 5_000).unwrap();
        ctx.advance(Duration::hours(2));

        let receipt = regional
            .withdraw(&ctx, &account("alice"), 1_000, Some(&mut euro))
            .unwrap();
        assert_eq!(receipt.payout, Payout::Deferred(1_000));
    }

    /// Locker that refuses payouts to one account
    #[derive(Debug)]
    struct RefusingLocker {
        inner: Locker,
        refuse: AccountId,
    }

    impl Custody for RefusingLocker {
        fn address(&self) -> &AccountId {
            self.inner.address()
        }

        fn asset(&self) -> &AssetId {
            self.inner.asset()
        }

        fn balance(&self) -> Amount {
            self.inner.balance()
        }

        fn transfer(&mut self, to: &AccountId, amount: Amount) -> settlement::Result<()> {
            if *to == self.refuse {
                return Err(settlement::Error::TransferFailed(format!("{} refused", to)));
            }
            self.inner.transfer(to, amount)
        }

        fn receive(&mut self, from: &AccountId, amount: Amount) -> settlement::Result<()> {
            self.inner.receive(from, amount)
        }

        fn approve(&mut self, spender: &AccountId, amount: Amount) -> settlement::Result<()> {
            self.inner.approve(spender, amount)
        }

        fn allowance(&self, spender: &AccountId) -> Amount {
            self.inner.allowance(spender)
        }
    }

    #[test]
    fn test_failed_payout_reverses_compensation() {
        let (mut ctx, _, mut blended) = setup();
        let mut regional = RegionalPool::new(
            account("apac"),
            account("borrower"),
            config("USDC"),
            RefusingLocker {
                inner: Locker::new(account("apac/locker"), AssetId::new("USDC")),
                refuse: account("alice"),
            },
        )
        .unwrap();
        regional.set_blended_pool(&ctx, &account("gov"), &account("blended")).unwrap();
        blended.register_regional(&ctx, &account("gov"), &account("apac")).unwrap();
        regional.core_mut().deposit(&ctx, &account("alice"), 1_000).unwrap();
        regional.core_mut().borrow(&ctx, &account("borrower"), 700).unwrap();
        let blended_events = blended.core().events().len();
        ctx.advance(Duration::hours(2));

        assert!(regional
            .withdraw(&ctx, &account("alice"), 1_000, Some(&mut blended))
            .is_err());

        assert_eq!(regional.core().balance_of(&account("alice")), 1_000);
        assert_eq!(regional.core().balance_of(&account("blended")), 0);
        assert_eq!(regional.core().liquidity(), 300);
        assert_eq!(blended.core().liquidity(), 5_000);
        assert_eq!(blended.core().events().len(), blended_events);
    }

    #[test]
    fn test_unreturnable_compensation_becomes_deposit() {
        let (mut ctx, mut regional, mut blended) = setup();
        ctx.advance(Duration::hours(2));
        regional.core_mut().custody_mut().set_frozen(true);

        assert!(regional
            .withdraw(&ctx, &account("alice"), 1_000, Some(&mut blended))
            .is_err());

        assert_eq!(regional.core().balance_of(&account("alice")), 1_000);
        assert_eq!(regional.core().balance_of(&account("blended")), 700);
        assert_eq!(regional.core().liquidity(), 1_000);
        assert_eq!(blended.core().liquidity(), 4_300);
        regional.core().shares().check_invariants().unwrap();
    }
}
