//! `hashloan init`: write a default node configuration.

use clap::Args;
use std::path::{Path, PathBuf};

use hashloan_node::HashloanConfig;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Directory to initialize (defaults to current directory).
    #[arg(default_value = ".")]
    pub dir: PathBuf,

    /// Bitcoin network for derived addresses.
    #[arg(long, default_value = "regtest")]
    pub network: String,
}

pub fn run(args: &InitArgs) -> anyhow::Result<()> {
    let config_path = write_config(&args.dir, &args.network)?;

    println!("Initialized Hashloan node at {}", config_path.display());
    println!("Edit hashloan.toml to fund devnet accounts and tune protocol parameters.");
    println!("Run 'hashloan-node --config {}' to start the node.", config_path.display());
    Ok(())
}

fn write_config(dir: &Path, network: &str) -> anyhow::Result<PathBuf> {
    let config_path = dir.join("hashloan.toml");
    if config_path.exists() {
        anyhow::bail!("configuration file already exists at {}", config_path.display());
    }

    let mut config = HashloanConfig::default();
    config.bitcoin.network = network.to_string();
    config.storage.data_dir = dir.join("data");
    config.validate()?;

    config.save(&config_path)?;
    std::fs::create_dir_all(&config.storage.data_dir)?;
    tracing::debug!(path = %config_path.display(), "wrote config");
    Ok(config_path)
}
