//! `hashloan keygen`: generate a Schnorr keypair for leaf scripts.

use clap::Args;
use hashloan_crypto::KeyPair;
use serde::Serialize;

#[derive(Args, Debug)]
pub struct KeygenArgs {
    /// Print JSON instead of plain text.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct KeygenOutput {
    secret_key: String,
    public_key: String,
}

pub fn run(args: &KeygenArgs) -> anyhow::Result<()> {
    let keypair = KeyPair::generate();
    let out = KeygenOutput {
        secret_key: hex::encode(keypair.secret_bytes()),
        public_key: keypair.x_only_public_key().to_string(),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("secret key: {}", out.secret_key);
        println!("public key: {}", out.public_key);
        println!("Keep the secret key offline; share only the public key.");
    }
    Ok(())
}
