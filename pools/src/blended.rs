//! Blended pool
//!
//! Aggregates idle liquidity and backs registered regional pools. Liquidity
//! sent to a regional pool is an investment: the regional pool mints shares
//! to the blended pool's address, so blended depositors earn on it through
//! the same deposit and accumulator path as everyone else.

use crate::{
    config::PoolConfig,
    events::PoolEventKind,
    globals::Globals,
    pool::PoolCore,
    Error, Result,
};
use indexmap::IndexSet;
use ledger_core::{AccountId, Amount};
use settlement::{Custody, Locker};

/// Backstop pool with a registry of the pools it backs
#[derive(Debug)]
pub struct BlendedPool<C: Custody = Locker> {
    core: PoolCore<C>,
    regional_pools: IndexSet<AccountId>,
}

impl<C: Custody> BlendedPool<C> {
    /// Create blended pool over a locker
    pub fn new(address: AccountId, borrower: AccountId, config: PoolConfig, custody: C) -> Result<Self> {
        Ok(Self {
            core: PoolCore::new(address, borrower, config, custody)?,
            regional_pools: IndexSet::new(),
        })
    }

    /// Pool core
    pub fn core(&self) -> &PoolCore<C> {
        &self.core
    }

    /// Pool core, for depositor and admin operations
    pub fn core_mut(&mut self) -> &mut PoolCore<C> {
        &mut self.core
    }

    /// Pool address
    pub fn address(&self) -> &AccountId {
        self.core.address()
    }

    /// Whether `pool` is backed
    pub fn is_registered(&self, pool: &AccountId) -> bool {
        self.regional_pools.contains(pool)
    }

    /// Backed pools in registration order
    pub fn regional_pools(&self) -> impl Iterator<Item = &AccountId> {
        self.regional_pools.iter()
    }

    /// Number of backed pools
    pub fn regional_pool_count(&self) -> usize {
        self.regional_pools.len()
    }

    /// Start backing a regional pool
    ///
    /// Returns `false` if it was already registered.
    pub fn register_regional(&mut self, ctx: &dyn Globals, caller: &AccountId, pool: &AccountId) -> Result<bool> {
        PoolCore::<C>::ensure_not_paused(ctx)?;
        PoolCore::<C>::ensure_governor(ctx, caller)?;

        let added = self.regional_pools.insert(pool.clone());
        if added {
            tracing::info!("Blended pool {} now backs {}", self.address(), pool);
        }
        Ok(added)
    }

    /// Stop backing a regional pool
    ///
    /// Returns `false` if it was not registered.
    pub fn unregister_regional(&mut self, ctx: &dyn Globals, caller: &AccountId, pool: &AccountId) -> Result<bool> {
        PoolCore::<C>::ensure_not_paused(ctx)?;
        PoolCore::<C>::ensure_governor(ctx, caller)?;

        // shift_remove keeps the registration order of the remaining pools
        let removed = self.regional_pools.shift_remove(pool);
        if removed {
            tracing::info!("Blended pool {} no longer backs {}", self.address(), pool);
        }
        Ok(removed)
    }

    /// Send liquidity to a registered regional pool's locker
    ///
    /// Only reachable through a regional pool's compensated withdrawal, which
    /// mints the matching shares to this pool. Funds always go to the
    /// requester's own locker. A shortfall is a hard failure: this is a
    /// direct fund move, not a claim, so nothing is deferred.
    pub(crate) fn request_assets<R: Custody>(
        &mut self,
        ctx: &dyn Globals,
        requester: &PoolCore<R>,
        amount: Amount,
    ) -> Result<()> {
        PoolCore::<C>::ensure_not_paused(ctx)?;

        let pool = requester.address();
        if !self.is_registered(pool) {
            return Err(Error::NotAuthorized(format!(
                "{} is not backed by blended pool {}",
                pool,
                self.address()
            )));
        }
        if requester.asset() != self.core.asset() {
            return Err(Error::InvalidAsset(requester.asset().to_string()));
        }
        if amount == 0 {
            return Err(Error::InvalidAmount("requested amount must be positive".to_string()));
        }

        let available = self.core.liquidity();
        if available < amount {
            return Err(Error::InsufficientLiquidity {
                available,
                required: amount,
            });
        }

        let locker = requester.custody().address();
        self.core.atomically(|core| {
            core.record(
                ctx,
                PoolEventKind::AssetsRequested {
                    pool: pool.clone(),
                    amount,
                },
            );
            core.custody.transfer(locker, amount)?;
            Ok(())
        })?;

        tracing::info!("Blended pool {} sent {} to {}", self.address(), amount, pool);
        Ok(())
    }
}
