//! secp256k1 signing key generator for chainstamp.
//!
//! Generates a fresh key and prints its checksummed address. The key is
//! written to a file when `--out` is given, otherwise printed in a form
//! ready for `export`.
//!
//! Usage:
//!   cargo run --bin chainstamp-keygen -- [--out key.hex] [--network anvil]

use chainstamp::{Network, WalletSession};
use clap::Parser;
use color_eyre::eyre::{bail, WrapErr};
use std::fs;
use std::path::PathBuf;

/// Generate a chainstamp signing key.
#[derive(Parser, Debug)]
#[command(name = "chainstamp-keygen")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Write the private key to this file instead of stdout.
    #[arg(long, short)]
    out: Option<PathBuf>,

    /// Network the key is intended for (sets the chain id shown).
    #[arg(long, default_value = "polygon_amoy")]
    network: Network,

    /// Overwrite an existing key file.
    #[arg(long)]
    force: bool,
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let args = Args::parse();

    let session = WalletSession::random(args.network.chain_id());
    println!("Network:  {} (chain {})", args.network.name(), session.chain_id());
    println!("Address:  {}", session.address());

    match args.out {
        Some(path) => {
            if path.exists() && !args.force {
                bail!("{} already exists; pass --force to overwrite", path.display());
            }
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .wrap_err_with(|| format!("failed to create {}", parent.display()))?;
            }
            fs::write(&path, format!("{}\n", session.secret_hex()))
                .wrap_err_with(|| format!("failed to write {}", path.display()))?;
            restrict_permissions(&path)?;
            println!("Key:      saved to {}", path.display());
            println!("\n  WARNING: Keep this file secure! Anyone holding it can stamp as this address.");
        }
        None => {
            println!("\nexport CHAINSTAMP_PRIVATE_KEY={}", session.secret_hex());
        }
    }

    if args.network.explorer_url().is_some() {
        println!("\nFund the address with testnet gas before stamping.");
    }
    Ok(())
}

#[cfg(unix)]
fn restrict_permissions(path: &std::path::Path) -> color_eyre::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
        .wrap_err_with(|| format!("failed to restrict {}", path.display()))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &std::path::Path) -> color_eyre::Result<()> {
    Ok(())
}
