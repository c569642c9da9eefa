//! Tracing setup

use crate::{config::TelemetryConfig, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global tracing subscriber
///
/// `RUST_LOG` wins over the configured filter. Returns `false` if a
/// subscriber was already installed (tests, embedding applications).
pub fn init_tracing(config: &TelemetryConfig) -> Result<bool> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .map_err(|e| crate::Error::Config(format!("Invalid log filter {}: {}", config.filter, e)))?;

    let installed = if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .try_init()
    };

    Ok(installed.is_ok())
}
