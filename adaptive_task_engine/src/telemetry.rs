//! Logging initialization.

use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

use crate::settings::LoggingConfig;

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))?;

    match config.format.as_str() {
        "json" => {
            let subscriber = Registry::default()
                .with(filter)
                .with(fmt::layer().json().with_target(config.enable_target));
            tracing::subscriber::set_global_default(subscriber)?;
        }
        "text" => {
            let subscriber = Registry::default()
                .with(filter)
                .with(fmt::layer().with_target(config.enable_target));
            tracing::subscriber::set_global_default(subscriber)?;
        }
        other => return Err(anyhow!("Unknown log format '{other}'")),
    }

    tracing::debug!(format = %config.format, "logging initialized");
    Ok(())
}
