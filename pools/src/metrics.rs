//! Metrics collection for observability
//!
//! # Metrics
//!
//! - `pools_deposits_total` - Deposits accepted
//! - `pools_withdrawals_total` - Withdrawals processed (paid or deferred)
//! - `pools_deferred_settlements_total` - Payouts moved into a settlement queue
//! - `pools_concluded_settlements_total` - Pending entries paid out
//! - `pools_compensations_total` - Withdrawals covered by the blended pool
//! - `pools_distributions_total` - Distributions on any channel
//! - `pools_regional_pools` - Regional pools known to the protocol

use crate::Result;
use prometheus::{
    register_int_counter_with_registry, register_int_gauge_with_registry, Encoder, IntCounter,
    IntGauge, Registry, TextEncoder,
};
use std::fmt;

/// Metrics collector
///
/// Owns its registry so several protocols can live in one process.
#[derive(Clone)]
pub struct Metrics {
    /// Deposits accepted
    pub deposits_total: IntCounter,

    /// Withdrawals processed
    pub withdrawals_total: IntCounter,

    /// Payouts deferred
    pub deferred_total: IntCounter,

    /// Pending entries concluded
    pub concluded_total: IntCounter,

    /// Compensated withdrawals
    pub compensations_total: IntCounter,

    /// Distributions
    pub distributions_total: IntCounter,

    /// Regional pools
    pub regional_pools: IntGauge,

    registry: Registry,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let deposits_total =
            register_int_counter_with_registry!("pools_deposits_total", "Deposits accepted", registry)?;

        let withdrawals_total = register_int_counter_with_registry!(
            "pools_withdrawals_total",
            "Withdrawals processed, paid or deferred",
            registry
        )?;

        let deferred_total = register_int_counter_with_registry!(
            "pools_deferred_settlements_total",
            "Payouts moved into a settlement queue",
            registry
        )?;

        let concluded_total = register_int_counter_with_registry!(
            "pools_concluded_settlements_total",
            "Pending entries paid out",
            registry
        )?;

        let compensations_total = register_int_counter_with_registry!(
            "pools_compensations_total",
            "Withdrawals covered by the blended pool",
            registry
        )?;

        let distributions_total = register_int_counter_with_registry!(
            "pools_distributions_total",
            "Distributions on any channel",
            registry
        )?;

        let regional_pools = register_int_gauge_with_registry!(
            "pools_regional_pools",
            "Regional pools known to the protocol",
            registry
        )?;

        Ok(Self {
            deposits_total,
            withdrawals_total,
            deferred_total,
            concluded_total,
            compensations_total,
            distributions_total,
            regional_pools,
            registry,
        })
    }

    /// Record a deposit
    pub fn record_deposit(&self) {
        self.deposits_total.inc();
    }

    /// Record a withdrawal
    pub fn record_withdrawal(&self, deferred: bool, compensated: bool) {
        self.withdrawals_total.inc();
        if deferred {
            self.deferred_total.inc();
        }
        if compensated {
            self.compensations_total.inc();
        }
    }

    /// Record a claim that went into the settlement queue
    pub fn record_deferred(&self) {
        self.deferred_total.inc();
    }

    /// Record a concluded pending entry
    pub fn record_concluded(&self) {
        self.concluded_total.inc();
    }

    /// Record a distribution
    pub fn record_distribution(&self) {
        self.distributions_total.inc();
    }

    /// Update the regional pool count
    pub fn set_regional_pools(&self, count: usize) {
        self.regional_pools.set(count as i64);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render all metrics in the Prometheus text format
    pub fn gather_text(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

impl fmt::Debug for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metrics")
            .field("deposits_total", &self.deposits_total.get())
            .field("withdrawals_total", &self.withdrawals_total.get())
            .field("deferred_total", &self.deferred_total.get())
            .field("concluded_total", &self.concluded_total.get())
            .field("compensations_total", &self.compensations_total.get())
            .field("distributions_total", &self.distributions_total.get())
            .field("regional_pools", &self.regional_pools.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.deposits_total.get(), 0);
        assert_eq!(metrics.regional_pools.get(), 0);
    }

    #[test]
    fn test_independent_registries() {
        let first = Metrics::new().unwrap();
        let second = Metrics::new().unwrap();
        first.record_deposit();

        assert_eq!(first.deposits_total.get(), 1);
        assert_eq!(second.deposits_total.get(), 0);
    }

    #[test]
    fn test_record_withdrawal() {
        let metrics = Metrics::new().unwrap();
        metrics.record_withdrawal(true, false);
        metrics.record_withdrawal(false, true);

        assert_eq!(metrics.withdrawals_total.get(), 2);
        assert_eq!(metrics.deferred_total.get(), 1);
        assert_eq!(metrics.compensations_total.get(), 1);
    }

    #[test]
    fn test_gather_text() {
        let metrics = Metrics::new().unwrap();
        metrics.set_regional_pools(3);

        let text = metrics.gather_text().unwrap();
        assert!(text.contains("pools_regional_pools 3"));
        assert!(text.contains("pools_deposits_total 0"));
    }
}
