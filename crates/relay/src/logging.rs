//! Logging system setup.
//!
//! Initializes the global `tracing` subscriber. `RUST_LOG` takes precedence
//! over the configured level when it is set.

use crate::config::LoggingSettings;
use anyhow::{anyhow, Result};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Builds the level filter, preferring `RUST_LOG` over `level`.
fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Installs the global subscriber.
///
/// # Errors
///
/// Fails if a global subscriber was already installed.
pub fn setup_logging(settings: &LoggingSettings) -> Result<()> {
    let registry = tracing_subscriber::registry().with(build_filter(&settings.level));

    let installed = if settings.json_format {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_file(false)
                    .with_line_number(false)
                    .with_thread_ids(true),
            )
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_file(false)
                    .with_line_number(false)
                    .with_thread_ids(true),
            )
            .try_init()
    };
    installed.map_err(|e| anyhow!("Failed to initialize logging: {e}"))?;

    info!("🔧 Logging initialized with level: {}", settings.level);
    Ok(())
}
