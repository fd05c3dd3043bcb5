//! chainstamp CLI entry point.

mod cli;

use chainstamp::api::{self, ApiState};
use chainstamp::{fingerprint_reader, Address, StampEvent, StampRequest, StampServiceBuilder, VerifyRequest, WalletSession};
use clap::Parser;
use cli::{Cli, Command};
use color_eyre::eyre::eyre;
use serde::Serialize;
use std::fs::File;
use std::io::BufReader;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    let config = cli.to_config()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    // Logs go to stderr so command output on stdout stays parseable.
    tracing_subscriber::registry()
        .with(cli.json_logs.then(|| fmt::layer().json().with_writer(std::io::stderr)))
        .with((!cli.json_logs).then(|| fmt::layer().with_writer(std::io::stderr)))
        .with(filter)
        .init();

    // Fingerprinting is offline; everything else needs a ledger.
    if let Command::Fingerprint { file, pin } = &cli.command {
        let reader = BufReader::new(File::open(file)?);
        let fp = fingerprint_reader(reader, pin.as_deref())?;
        println!("{fp}");
        return Ok(());
    }

    info!("chainstamp v{}", env!("CARGO_PKG_VERSION"));
    let service = StampServiceBuilder::new(config.clone()).build()?;
    let chain_id = config.chain.effective_chain_id();

    match cli.command {
        Command::Fingerprint { .. } => {}
        Command::Verify { file, pin } => {
            let bytes = std::fs::read(&file)?;
            let file_name = file.file_name().map(|n| n.to_string_lossy().into_owned());
            let answer = service
                .verify(VerifyRequest::from_bytes(bytes).with_pin(pin).with_file_name(file_name))
                .await?;
            print_json(&answer)?;
        }
        Command::Stamp { file, pin, private } => {
            let session = WalletSession::from_env(&config.signer.private_key_env, chain_id)?;
            info!("Stamping as {}", session.address());
            let bytes = std::fs::read(&file)?;
            let file_name = file
                .file_name()
                .map_or_else(|| "upload".to_string(), |n| n.to_string_lossy().into_owned());
            let receipt = service
                .stamp(
                    &session,
                    StampRequest {
                        bytes: bytes.into(),
                        file_name,
                        pin,
                        is_public: !private,
                    },
                )
                .await?;
            if let Some(ref warning) = receipt.warning {
                warn!("{warning}");
            }
            print_json(&receipt)?;
        }
        Command::History { address, from_block } => {
            let owner: Address = address.parse()?;
            let history = service.history(&owner, from_block).await?;
            print_json(&history.entries)?;
        }
        Command::Stamps { address } => {
            let owner: Address = address.parse()?;
            print_json(&service.stamps(&owner).await?)?;
        }
        Command::Serve { .. } => {
            let signer = match WalletSession::from_env(&config.signer.private_key_env, chain_id) {
                Ok(session) => {
                    info!("Server-side stamping as {}", session.address());
                    Some(session)
                }
                Err(e) => {
                    warn!("Server-side stamping disabled: {e}");
                    None
                }
            };

            let mut events = service.subscribe();
            tokio::spawn(async move {
                while let Ok(event) = events.recv().await {
                    match event {
                        StampEvent::MetadataDegraded { fingerprint, reason } => {
                            warn!("Metadata for {fingerprint} not recorded: {reason}");
                        }
                        other => info!("{other:?}"),
                    }
                }
            });

            api::serve(
                ApiState::new(service, signer),
                config.server.bind,
                config.server.max_upload_bytes,
            )
            .await?;
            info!("Goodbye!");
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> color_eyre::Result<()> {
    let out = serde_json::to_string_pretty(value).map_err(|e| eyre!("failed to encode output: {e}"))?;
    println!("{out}");
    Ok(())
}
