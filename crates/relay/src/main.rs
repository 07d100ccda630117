//! Main application entry point for the position relay.
//!
//! Loads configuration, applies command-line overrides, sets up logging and
//! runs the relay until a termination signal arrives.

mod cli;
mod config;
mod logging;
mod signals;

use anyhow::{Context, Result};
use clap::Parser;
use relay_server::{RelayError, RelayServer, StatsSnapshot};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::cli::CliArgs;
use crate::config::AppConfig;

/// Upper bound on how long shutdown waits for the accept loop to finish.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// The relay process: configuration plus the server it drives.
pub struct Application {
    config: AppConfig,
    server: RelayServer,
}

impl Application {
    /// Loads and validates configuration, initializes logging and builds the
    /// relay.
    pub async fn new(args: CliArgs) -> Result<Self> {
        // Configuration comes first so logging can honor it.
        let mut config = AppConfig::load_from_file(&args.config).await?;
        config.apply_cli_overrides(&args);
        config
            .validate()
            .context("Configuration validation failed")?;

        logging::setup_logging(&config.logging)?;
        display_banner();

        let relay_config = config.to_relay_config()?;
        let server = RelayServer::new(relay_config);

        info!("📂 Config: {}", args.config.display());
        Ok(Self { config, server })
    }

    /// Runs the relay until a shutdown signal arrives or the relay fails.
    pub async fn run(self) -> Result<()> {
        info!("📋 Configuration Summary:");
        info!("  🌐 Bind address: {}", self.config.server.bind_address);
        info!(
            "  👥 Max connections: {}",
            match self.config.server.max_connections {
                0 => "unlimited".to_string(),
                n => n.to_string(),
            }
        );
        info!(
            "  📬 Outbound queue capacity: {}",
            self.config.server.outbound_queue_capacity
        );
        info!("  🪪 Identity policy: {}", self.config.server.identity_policy);

        let mut server_handle: JoinHandle<Result<(), RelayError>> = {
            let server = self.server.clone();
            tokio::spawn(async move { server.start().await })
        };

        let monitoring_handle = self.spawn_stats_monitor();

        info!("🛑 Press Ctrl+C to gracefully shutdown");

        let finished_early = tokio::select! {
            signal = signals::wait_for_shutdown_signal() => {
                signal.context("Signal handling failed")?;
                None
            }
            finished = &mut server_handle => Some(finished),
        };

        let outcome = match finished_early {
            Some(Ok(Ok(()))) => Ok(()),
            Some(Ok(Err(e))) => Err(anyhow::Error::new(e).context("Relay failed")),
            Some(Err(e)) => Err(anyhow::Error::new(e).context("Relay task panicked")),
            None => {
                info!("🛑 Shutdown signal received, initiating graceful shutdown...");
                self.server.shutdown();
                if tokio::time::timeout(SHUTDOWN_GRACE, &mut server_handle)
                    .await
                    .is_err()
                {
                    warn!("Relay did not stop within {:?}, aborting", SHUTDOWN_GRACE);
                    server_handle.abort();
                }
                Ok(())
            }
        };

        if let Some(handle) = monitoring_handle {
            handle.abort();
        }

        log_stats("📊 Final Statistics", &self.server.stats());
        info!("✅ Relay shutdown complete");
        outcome
    }

    fn spawn_stats_monitor(&self) -> Option<JoinHandle<()>> {
        let secs = self.config.server.stats_interval_secs;
        if secs == 0 {
            info!("⏸️ Periodic statistics disabled");
            return None;
        }

        let server = self.server.clone();
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(secs));
            // The first tick completes immediately.
            interval.tick().await;
            let mut last_relayed = 0u64;

            loop {
                interval.tick().await;
                let stats = server.stats();
                info!(
                    "📊 Relay Health - {} active | {} relayed this period | {} rejected | {} evicted",
                    stats.active,
                    stats.relayed - last_relayed,
                    stats.rejected,
                    stats.evicted
                );
                last_relayed = stats.relayed;
            }
        }))
    }
}

fn log_stats(title: &str, stats: &StatsSnapshot) {
    info!("{}:", title);
    info!("  - Connections accepted: {}", stats.accepted);
    info!("  - Connections refused: {}", stats.refused);
    info!("  - Updates relayed: {}", stats.relayed);
    info!("  - Messages rejected: {}", stats.rejected);
    info!("  - Connections evicted: {}", stats.evicted);
}

fn display_banner() {
    let version = option_env!("CARGO_PKG_VERSION").unwrap_or("UNK");
    info!("📡 Position Relay v{}", version);
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let args = CliArgs::parse();

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("❌ Failed to start application: {e:?}");
            std::process::exit(1);
        }
    }
}
