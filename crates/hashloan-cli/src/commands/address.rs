//! `hashloan address`: derive the Taproot address of a loan output.

use std::path::PathBuf;
use std::str::FromStr;

use bitcoin::secp256k1::XOnlyPublicKey;
use clap::{Args, ValueEnum};
use hashloan_core::PreimageHash;
use hashloan_node::HashloanConfig;
use hashloan_utxo::{LoanOutput, OutputKind};
use serde::Serialize;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputArg {
    Escrow,
    Collateral,
}

#[derive(Args, Debug)]
pub struct AddressArgs {
    /// Which loan output to derive.
    #[arg(value_enum)]
    pub kind: OutputArg,

    /// Borrower's x-only public key (hex).
    #[arg(long)]
    pub borrower: String,

    /// Lender's x-only public key (hex).
    #[arg(long)]
    pub lender: String,

    /// Commitment locking the cooperative leaf (hB for escrow, hL for collateral).
    #[arg(long)]
    pub hash: String,

    /// Relative lock in Bitcoin blocks. Derived from the config when omitted.
    #[arg(long)]
    pub csv: Option<u16>,

    /// Config supplying the network and protocol timelocks.
    #[arg(short, long, default_value = "hashloan.toml")]
    pub config: PathBuf,

    /// Print JSON instead of plain text.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct AddressOutput {
    kind: OutputKind,
    address: String,
    script_pubkey: String,
    csv: u16,
    cooperative_leaf: String,
    timeout_leaf: String,
}

fn derive(args: &AddressArgs, config: &HashloanConfig) -> anyhow::Result<AddressOutput> {
    let borrower = XOnlyPublicKey::from_str(&args.borrower)?;
    let lender = XOnlyPublicKey::from_str(&args.lender)?;
    let hash = PreimageHash::from_hex(&args.hash)?;

    let csv = match args.csv {
        Some(csv) => csv,
        None => {
            let locks = config.protocol.timelocks.to_utxo(&config.protocol.block_ratio)?;
            match args.kind {
                OutputArg::Escrow => locks.escrow_csv,
                OutputArg::Collateral => locks.collateral_csv,
            }
        }
    };

    let output = match args.kind {
        OutputArg::Escrow => LoanOutput::escrow(borrower, lender, hash, csv)?,
        OutputArg::Collateral => LoanOutput::collateral(borrower, lender, hash, csv)?,
    };
    let cooperative = output.leaf_script(output.cooperative_leaf())?;
    let timeout = output.leaf_script(output.timeout_leaf())?;

    Ok(AddressOutput {
        kind: output.kind(),
        address: output.address(config.network()?).to_string(),
        script_pubkey: hex::encode(output.script_pubkey().as_bytes()),
        csv,
        cooperative_leaf: hex::encode(cooperative.as_bytes()),
        timeout_leaf: hex::encode(timeout.as_bytes()),
    })
}

pub fn run(args: &AddressArgs) -> anyhow::Result<()> {
    let config = HashloanConfig::load(&args.config)?;
    let out = derive(args, &config)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("{} output", out.kind);
        println!("  address:          {}", out.address);
        println!("  script_pubkey:    {}", out.script_pubkey);
        println!("  csv:              {} blocks", out.csv);
        println!("  cooperative leaf: {}", out.cooperative_leaf);
        println!("  timeout leaf:     {}", out.timeout_leaf);
    }
    Ok(())
}
