//! Pooled lending accounting
//!
//! Regional pools accept deposits, lend to a borrower and return rewards and
//! losses to depositors pro rata. A blended pool aggregates idle liquidity and
//! backstops regional pools by depositing into them when a withdrawal would
//! otherwise wait for liquidity.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]
//!
//! # Architecture
//!
//! - **PoolCore**: share ledger, accumulators, settlement queue, lockups and
//!   the borrow ledger behind one transactional boundary
//! - **RegionalPool**: a core plus an optional backstop reference, used for
//!   automatic compensation on withdrawal
//! - **BlendedPool**: a core plus the ordered registry of pools it backs
//! - **Protocol**: looks pools up by identifier and routes calls that touch
//!   more than one pool
//!
//! Every operation takes an explicit [`Globals`] context (governor, pause
//! switch, asset allow-list, clock) instead of reading ambient state.
//!
//! # Example
//!
//! ```no_run
//! use lending_pools::{AccountId, Config, Protocol, ProtocolContext};
//!
//! fn main() -> lending_pools::Result<()> {
//!     let config = Config::default();
//!     let governor = AccountId::new("governor");
//!     let ctx = ProtocolContext::new(governor.clone(), chrono::Utc::now())
//!         .with_asset(config.regional.asset.clone());
//!
//!     let mut protocol = Protocol::with_lockers(
//!         config,
//!         AccountId::new("blended"),
//!         AccountId::new("treasury"),
//!     )?;
//!     let pool = AccountId::new("emea");
//!     protocol.open_regional_pool(&ctx, &governor, pool.clone(), AccountId::new("borrower"))?;
//!     protocol.deposit(&ctx, &pool, &AccountId::new("alice"), 1_000_000)?;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod globals;
pub mod pool;
pub mod regional;
pub mod blended;
pub mod protocol;
pub mod metrics;
pub mod snapshot;
pub mod telemetry;

// Re-exports
pub use config::{Config, PoolConfig, TelemetryConfig};
pub use error::{Error, Result};
pub use events::{PoolEvent, PoolEventKind};
pub use globals::{Globals, ProtocolContext};
pub use pool::{PoolCore, PoolState, PoolSummary, WithdrawalReceipt};
pub use regional::RegionalPool;
pub use blended::BlendedPool;
pub use protocol::Protocol;
pub use metrics::Metrics;
pub use snapshot::{ChannelSnapshot, PoolSnapshot};
pub use telemetry::init_tracing;

pub use ledger_core::{AccountId, Amount, AssetId, Channel};
pub use settlement::{Custody, Locker, Payout, SettlementKind};
