//! payhostd entry point.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use payhost::{Config, PaymentHost};

#[derive(Parser)]
#[command(author, version, about = "Non-custodial BIP-270 payment daemon")]
struct Cli {
    /// Path to the configuration file (TOML or JSON)
    #[arg(short, long, default_value = "payhost.toml")]
    config: PathBuf,

    /// Write a default configuration file to the --config path and exit
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.init_config {
        Config::default().to_toml_file(&cli.config)?;
        println!("Wrote default configuration to {}", cli.config.display());
        return Ok(());
    }

    let config = if cli.config.exists() {
        Config::load(&cli.config)?
    } else {
        Config::default()
    };
    init_tracing(&config)?;
    info!("payhostd v{}", env!("CARGO_PKG_VERSION"));

    let host = PaymentHost::new(config)?;
    let cancel = host.cancellation_token();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        info!("Shutdown signal received");
        cancel.cancel();
    });

    host.start().await
}

fn init_tracing(config: &Config) -> Result<()> {
    let filter = match &config.logging.filter {
        Some(directives) => EnvFilter::try_new(directives)?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    if config.logging.json_format {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }
    Ok(())
}
