//! `hashloan preimage`: generate or derive a loan secret.

use clap::{Args, ValueEnum};
use hashloan_core::Role;
use hashloan_crypto::Preimage;
use serde::Serialize;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum RoleArg {
    Borrower,
    Lender,
}

impl From<RoleArg> for Role {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Borrower => Role::Borrower,
            RoleArg::Lender => Role::Lender,
        }
    }
}

#[derive(Args, Debug)]
pub struct PreimageArgs {
    /// Derive deterministically for this role instead of sampling.
    #[arg(long, requires = "index")]
    pub role: Option<RoleArg>,

    /// Derivation index, used with --role.
    #[arg(long, requires = "role")]
    pub index: Option<u64>,

    /// Check an existing secret (hex) instead of producing one.
    #[arg(long, conflicts_with_all = ["role", "index"])]
    pub check: Option<String>,

    /// Print JSON instead of plain text.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct PreimageOutput {
    secret: String,
    commitment: String,
}

fn produce(args: &PreimageArgs) -> anyhow::Result<PreimageOutput> {
    let secret = match (&args.check, args.role, args.index) {
        (Some(hex), _, _) => Preimage::from_hex(hex)?,
        (None, Some(role), Some(index)) => Preimage::derive_for(role.into(), index),
        _ => Preimage::generate(),
    };
    Ok(PreimageOutput {
        secret: secret.to_hex(),
        commitment: secret.commitment().to_hex(),
    })
}

pub fn run(args: &PreimageArgs) -> anyhow::Result<()> {
    let out = produce(args)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("secret:     {}", out.secret);
        println!("commitment: {}", out.commitment);
        if args.check.is_none() {
            println!("Publish only the commitment until the protocol asks for the secret.");
        }
    }
    Ok(())
}
