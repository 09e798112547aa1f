//! chargerd - charging-station gateway daemon
//!
//! Usage:
//!   chargerd [--json-logs] [-c|--config <path>]
//!
//! Loads the gateway configuration (TOML or YAML), opens a link to every
//! configured station and runs until Ctrl-C or SIGTERM. Station traffic is
//! forwarded to the log bridge.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use charge_gateway::{Gateway, GatewayConfig, LogBridge};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "chargerd=info,charge_link=info,charge_bus=info,charge_gateway=info";

/// How long startup waits for every station before carrying on
const READY_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on graceful shutdown
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "chargerd")]
#[command(about = "Gateway between charging-station controllers and the message broker")]
struct Args {
    /// Configuration file (.toml, .yaml or .yml)
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Emit log records as JSON
    #[arg(long)]
    json_logs: bool,
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.json_logs);

    info!(config = %args.config, "Loading configuration");
    let config = GatewayConfig::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config))?;

    // Installed before startup so an early Ctrl-C still shuts down cleanly
    let mut shutdown = ShutdownSignal::install()?;

    let gateway = Gateway::start(config, Arc::new(LogBridge)).context("Failed to start gateway")?;

    let interrupted = tokio::select! {
        ready = gateway.wait_until_ready(READY_TIMEOUT) => {
            match ready {
                Ok(()) => info!("Gateway ready"),
                // Links keep retrying in the background
                Err(e) => warn!(error = %e, "Not every station is ready yet"),
            }
            false
        }
        signal = shutdown.recv() => {
            signal?;
            warn!("Shutdown requested during startup");
            true
        }
    };
    if !interrupted {
        shutdown.recv().await?;
    }

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, gateway.shutdown())
        .await
        .is_err()
    {
        warn!(timeout = ?SHUTDOWN_TIMEOUT, "Graceful shutdown timed out");
    }

    Ok(())
}

/// SIGTERM or SIGINT on unix, Ctrl-C elsewhere
#[cfg(unix)]
struct ShutdownSignal {
    sigterm: tokio::signal::unix::Signal,
    sigint: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl ShutdownSignal {
    fn install() -> Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            sigterm: signal(SignalKind::terminate())
                .context("Failed to install SIGTERM handler")?,
            sigint: signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?,
        })
    }

    async fn recv(&mut self) -> Result<()> {
        tokio::select! {
            _ = self.sigterm.recv() => info!("Received SIGTERM"),
            _ = self.sigint.recv() => info!("Received SIGINT"),
        }
        Ok(())
    }
}

#[cfg(not(unix))]
struct ShutdownSignal;

#[cfg(not(unix))]
impl ShutdownSignal {
    fn install() -> Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) -> Result<()> {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to install Ctrl-C handler")?;
        info!("Received Ctrl-C");
        Ok(())
    }
}
