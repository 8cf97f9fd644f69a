//! Coapbridge Daemon - Main entry point
//!
//! Runs the resource directory CoAP nodes register with, mirrors their
//! resources onto the bus and serves the bus gateway and diagnostics API.

mod api;
mod config;
mod server;
mod state;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "coapbridge")]
#[command(about = "Bridge between CoAP nodes and bus objects")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "coapbridge.toml")]
    config: PathBuf,

    /// Bind address for the HTTP gateway
    #[arg(short, long)]
    bind: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Before logging is set up, so stdout carries only the TOML
    if args.print_config {
        print!("{}", effective_config(&args)?.to_toml()?);
        return Ok(());
    }

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Coapbridge v{}", env!("CARGO_PKG_VERSION"));

    let config = effective_config(&args)?;

    info!(
        http = %config.daemon.bind,
        coap = %config.coap.bind,
        bus = %config.bus.name,
        "Configuration loaded"
    );

    let state = state::AppState::new(config).await?;
    server::run(state).await
}

/// Configuration file contents with command-line overrides applied
fn effective_config(args: &Args) -> Result<config::Config> {
    let mut config = config::load_config(&args.config)?;
    if let Some(bind) = &args.bind {
        config.daemon.bind = bind.clone();
    }
    Ok(config)
}
