//! Tracing subscriber initialisation.

use anyhow::Context;
use oda_core::config::LoggingConfig;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::tracing_layer::SessionEventLayer;

/// Installs the global subscriber.
///
/// `RUST_LOG` takes precedence over `config.level`. Output goes to stderr,
/// as JSON lines when `config.json` is set. `events`, when given, also
/// receives every oda event.
///
/// # Errors
///
/// Fails on an invalid level directive or when a global subscriber is
/// already installed.
pub fn init_tracing(config: &LoggingConfig, events: Option<SessionEventLayer>) -> anyhow::Result<()> {
    let filter = env_filter(&config.level)?;

    let fmt_layer = if config.json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(events)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    tracing::debug!(level = %config.level, json = config.json, "Tracing initialized");
    Ok(())
}

/// The filter from `RUST_LOG`, or from `level` when unset.
fn env_filter(level: &str) -> anyhow::Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level)
            .with_context(|| format!("Invalid log level directive: {level}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_directives_parse() {
        assert!(EnvFilter::try_new("debug").is_ok());
        assert!(EnvFilter::try_new("info,oda_application=trace").is_ok());
    }

    #[test]
    fn test_second_init_fails() {
        let config = LoggingConfig::default();
        let _ = init_tracing(&config, None);
        assert!(init_tracing(&config, None).is_err());
    }
}
