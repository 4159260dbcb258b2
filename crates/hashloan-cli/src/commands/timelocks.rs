//! `hashloan timelocks`: show the configured timelocks.

use std::path::PathBuf;

use clap::Args;
use hashloan_node::HashloanConfig;
use serde::Serialize;

#[derive(Args, Debug)]
pub struct TimelocksArgs {
    /// Path to the config file.
    #[arg(short, long, default_value = "hashloan.toml")]
    pub config: PathBuf,

    /// Print JSON instead of plain text.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct TimelocksOutput {
    block_ratio: String,
    accept_window: u64,
    escrow_timeout: u64,
    repay_accept_window: u64,
    collateral_timeout: u64,
    loan_duration: u64,
    escrow_csv: u16,
    collateral_csv: u16,
}

fn describe(config: &HashloanConfig) -> anyhow::Result<TimelocksOutput> {
    let params = &config.protocol;
    params.timelocks.validate()?;
    let utxo = params.timelocks.to_utxo(&params.block_ratio)?;
    let t = params.timelocks;
    Ok(TimelocksOutput {
        block_ratio: format!("{}:{}", params.block_ratio.utxo, params.block_ratio.settlement),
        accept_window: t.accept_window,
        escrow_timeout: t.escrow_timeout,
        repay_accept_window: t.repay_accept_window,
        collateral_timeout: t.collateral_timeout,
        loan_duration: t.loan_duration,
        escrow_csv: utxo.escrow_csv,
        collateral_csv: utxo.collateral_csv,
    })
}

pub fn run(args: &TimelocksArgs) -> anyhow::Result<()> {
    let config = HashloanConfig::load(&args.config)?;
    let out = describe(&config)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }
    println!("block ratio (bitcoin:settlement): {}", out.block_ratio);
    println!("settlement-chain blocks:");
    println!("  accept window (tB):        {}", out.accept_window);
    println!("  escrow timeout (t0):       {}", out.escrow_timeout);
    println!("  repay accept window (tL):  {}", out.repay_accept_window);
    println!("  loan duration (tD):        {}", out.loan_duration);
    println!("  collateral timeout (t1):   {}", out.collateral_timeout);
    println!("bitcoin relative locks:");
    println!("  escrow exit (E2):          {} blocks", out.escrow_csv);
    println!("  collateral capture (C2):   {} blocks", out.collateral_csv);
    Ok(())
}
