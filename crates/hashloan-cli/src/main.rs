//! Hashloan CLI: offline tooling for loan participants.
//!
//! Subcommands: init, keygen, preimage, address, timelocks.

mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Hashloan: BTC-collateralized loans over hash-lock commitments.
#[derive(Parser, Debug)]
#[command(name = "hashloan", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a default node configuration.
    Init(commands::init::InitArgs),
    /// Generate a Schnorr keypair for leaf scripts.
    Keygen(commands::keygen::KeygenArgs),
    /// Generate or derive a loan secret and its commitment.
    Preimage(commands::preimage::PreimageArgs),
    /// Derive the Taproot address of an escrow or collateral output.
    Address(commands::address::AddressArgs),
    /// Show the configured timelocks and their Bitcoin relative locks.
    Timelocks(commands::timelocks::TimelocksArgs),
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Init(args) => commands::init::run(args),
        Commands::Keygen(args) => commands::keygen::run(args),
        Commands::Preimage(args) => commands::preimage::run(args),
        Commands::Address(args) => commands::address::run(args),
        Commands::Timelocks(args) => commands::timelocks::run(args),
    }
}
