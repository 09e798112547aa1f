//! Example charging station
//!
//! Simulates one station controller so the gateway can be exercised without
//! hardware.
//!
//! # Usage
//!
//! ```bash
//! ./example-station --protocol udp --bind 127.0.0.1:8081 --id 01
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use example_station::{Protocol, StationServer, StationState};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "example-station")]
#[command(about = "Simulated charging-station controller for gateway development")]
struct Args {
    /// Socket type to listen on
    #[arg(short, long, value_enum, default_value = "udp")]
    protocol: Protocol,

    /// Listen address
    #[arg(short, long, default_value = "127.0.0.1:8081")]
    bind: SocketAddr,

    /// Station id as one hex byte
    #[arg(long, default_value = "01")]
    id: String,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        "example_station=debug"
    } else {
        "example_station=info"
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let id = match hex::decode(&args.id)
        .with_context(|| format!("Station id '{}' is not hex", args.id))?[..]
    {
        [id] => id,
        _ => anyhow::bail!("Station id '{}' must be exactly one byte", args.id),
    };

    let server = StationServer::bind(args.protocol, args.bind, Arc::new(StationState::new(id)))
        .await
        .with_context(|| format!("Failed to bind {}", args.bind))?;

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    server.shutdown().await;

    Ok(())
}
