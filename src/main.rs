//! crud-gateway
//!
//! A CRUD gRPC service for users and their items, sharing one TCP port with
//! an HTTP debugging console.
//!
//! # Architecture Overview
//!
//! ```text
//!                    TCP :PORT
//!                       │
//!                ┌──────▼───────┐
//!                │  net::mux    │  classify by leading bytes
//!                └──┬────────┬──┘
//!    content-type:  │        │  anything else
//!  application/grpc │        │
//!           ┌───────▼──┐  ┌──▼────────────┐
//!           │ rpc      │  │ console       │──┐ self-dial
//!           │ (tonic)  │  │ (axum)        │  │ (gRPC over :PORT)
//!           └────┬─────┘  └───────────────┘  │
//!                │   ◄───────────────────────┘
//!           ┌────▼─────┐
//!           │ store    │  Postgres (sqlx) | in-memory
//!           └──────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;

use crud_gateway::config::{self, StoreBackend};
use crud_gateway::lifecycle::{self, shutdown_signal};
use crud_gateway::observability::{logging, metrics};
use crud_gateway::store;

#[derive(Parser)]
#[command(name = "crud-gateway")]
#[command(about = "CRUD gRPC gateway with an HTTP console on the same port", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overriding the file and PORT
    #[arg(short, long)]
    bind: Option<String>,

    /// Use the in-memory store instead of Postgres
    #[arg(long)]
    memory: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => config::read_config(path)?,
        None => config::GatewayConfig::default(),
    };
    config::apply_env(&mut config, |var| std::env::var(var).ok())?;
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
    }
    if args.memory {
        config.database.backend = StoreBackend::Memory;
    }
    let config = config::finalize(config)?;

    logging::init(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "crud-gateway starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        backend = ?config.database.backend,
        console = config.console.enabled,
        read_timeout_ms = config.mux.read_timeout_ms,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let store = store::connect(&config.database).await?;
    let gateway = lifecycle::start(&config, store).await?;
    tracing::info!(address = %gateway.local_addr(), "Listening for connections");

    gateway.run_until(shutdown_signal()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
