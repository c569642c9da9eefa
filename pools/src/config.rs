//! Configuration for lending pools

use crate::{Error, Result};
use ledger_core::{Amount, AssetId};
use serde::{Deserialize, Serialize};

/// Protocol configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Blended pool parameters
    pub blended: PoolConfig,

    /// Defaults for newly opened regional pools
    pub regional: PoolConfig,

    /// Logging configuration
    pub telemetry: TelemetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "lending-pools".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            blended: PoolConfig {
                capacity: 100_000_000_000_000, // 100M at 6 decimals
                lockup_period_secs: 7 * 86_400,
                ..PoolConfig::default()
            },
            regional: PoolConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

/// Per-pool parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Asset the pool holds
    pub asset: AssetId,

    /// Lockup after deposit (seconds)
    pub lockup_period_secs: u64,

    /// Maximum total supply
    pub capacity: Amount,

    /// Minimum locker balance after a deposit
    pub min_investment: Amount,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            asset: AssetId::new("USDC"),
            lockup_period_secs: 30 * 86_400, // 30 days
            capacity: 10_000_000_000_000,    // 10M at 6 decimals
            min_investment: 1_000_000,       // 1 unit at 6 decimals
        }
    }
}

impl PoolConfig {
    /// Lockup as a duration
    pub fn lockup_period(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.lockup_period_secs).unwrap_or(i64::MAX))
    }

    /// Reject unusable parameters
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(Error::Config("capacity must be positive".to_string()));
        }
        if self.min_investment > self.capacity {
            return Err(Error::Config(format!(
                "minimum investment {} exceeds capacity {}",
                self.min_investment, self.capacity
            )));
        }
        if i64::try_from(self.lockup_period_secs).is_err() {
            return Err(Error::Config("lockup period out of range".to_string()));
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Emit JSON lines instead of human-readable output
    pub json: bool,

    /// Default filter when `RUST_LOG` is unset
    pub filter: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            json: false,
            filter: "info".to_string(),
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();

        if let Ok(secs) = std::env::var("POOLS_LOCKUP_SECS") {
            config.regional.lockup_period_secs = parse_env("POOLS_LOCKUP_SECS", &secs)?;
        }

        if let Ok(capacity) = std::env::var("POOLS_CAPACITY") {
            config.regional.capacity = parse_env("POOLS_CAPACITY", &capacity)?;
        }

        if let Ok(minimum) = std::env::var("POOLS_MIN_INVESTMENT") {
            config.regional.min_investment = parse_env("POOLS_MIN_INVESTMENT", &minimum)?;
        }

        if let Ok(json) = std::env::var("POOLS_LOG_JSON") {
            config.telemetry.json = parse_env("POOLS_LOG_JSON", &json)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate both pool sections
    pub fn validate(&self) -> Result<()> {
        self.blended.validate()?;
        self.regional.validate()
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| Error::Config(format!("{}={}: {}", name, value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service_name, "lending-pools");
        assert_eq!(config.regional.asset, AssetId::new("USDC"));
        assert_eq!(config.regional.lockup_period(), chrono::Duration::days(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_minimum_above_capacity() {
        let pool = PoolConfig {
            capacity: 10,
            min_investment: 11,
            ..PoolConfig::default()
        };
        assert!(matches!(pool.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let config = Config {
            service_name: "pools-test".to_string(),
            ..Config::default()
        };
        write!(file, "{}", toml::to_string(&config).unwrap()).unwrap();

        let loaded = Config::from_file(file.path()).unwrap();
        assert_eq!(loaded.service_name, "pools-test");
        assert_eq!(loaded.blended, config.blended);
    }

    #[test]
    fn test_from_file_rejects_garbage() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "service_name = [").unwrap();
        assert!(matches!(Config::from_file(file.path()), Err(Error::Config(_))));
    }
}
