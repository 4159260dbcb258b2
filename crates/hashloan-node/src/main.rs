//! Hashloan devnet node entry point.
//!
//! Starts the node with configuration from a TOML file or defaults.

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use hashloan_node::{HashloanConfig, HashloanNode};

/// Hashloan devnet node
#[derive(Parser, Debug)]
#[command(name = "hashloan-node", version, about = "Hashloan devnet node")]
struct Args {
    /// Path to the configuration file (TOML).
    #[arg(short, long, default_value = "hashloan.toml")]
    config: PathBuf,

    /// Override the data directory.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Override the log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Override the log format (text, json).
    #[arg(long)]
    log_format: Option<String>,

    /// Override the settlement block interval in milliseconds.
    #[arg(long)]
    block_interval_ms: Option<u64>,

    /// Generate a default config file and exit.
    #[arg(long)]
    init: bool,
}

fn init_tracing(level: &str, format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Handle --init flag
    if args.init {
        init_tracing(args.log_level.as_deref().unwrap_or("info"), "text");
        let config = HashloanConfig::default();
        config.save(&args.config)?;
        tracing::info!(path = %args.config.display(), "wrote default config");
        return Ok(());
    }

    // Load configuration and apply CLI overrides
    let mut config = HashloanConfig::load(&args.config)?;
    if let Some(data_dir) = args.data_dir {
        config.storage.data_dir = data_dir;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    if let Some(format) = args.log_format {
        config.logging.format = format;
    }
    if let Some(interval) = args.block_interval_ms {
        config.devnet.block_interval_ms = interval;
    }

    init_tracing(&config.logging.level, &config.logging.format);
    tracing::info!("Hashloan node v{}", env!("CARGO_PKG_VERSION"));

    let mut node = HashloanNode::new(config)?;
    node.start().await?;

    tokio::select! {
        result = node.run() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "block production stopped");
            }
        }
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
            }
            tracing::info!("initiating graceful shutdown");
        }
    }

    node.shutdown().await?;
    tracing::info!("Hashloan node exited cleanly");
    Ok(())
}
