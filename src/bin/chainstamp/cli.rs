//! Command-line interface definition.

use chainstamp::config::{Network, SideStoreBackend, StampConfig};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Fingerprint files and prove their existence on an EVM chain.
#[derive(Parser, Debug)]
#[command(name = "chainstamp")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file.
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// JSON-RPC endpoint (overrides the network preset).
    #[arg(long, global = true, env = "CHAINSTAMP_RPC_URL")]
    pub rpc_url: Option<String>,

    /// Stamp contract address.
    #[arg(long, global = true, env = "CHAINSTAMP_CONTRACT")]
    pub contract: Option<String>,

    /// Network preset (polygon_amoy, base_sepolia, ethereum_sepolia, arbitrum_sepolia, anvil, hardhat).
    #[arg(long, global = true, env = "CHAINSTAMP_NETWORK")]
    pub network: Option<Network>,

    /// Chain id (overrides the network preset).
    #[arg(long, global = true, env = "CHAINSTAMP_CHAIN_ID")]
    pub chain_id: Option<u64>,

    /// Side-store backend: none, memory or sqlite.
    #[arg(long, global = true, env = "CHAINSTAMP_SIDE_STORE")]
    pub side_store: Option<SideStoreBackend>,

    /// SQLite side-store path.
    #[arg(long, global = true, env = "CHAINSTAMP_DB")]
    pub db_path: Option<PathBuf>,

    /// Log level (overrides the config file; `RUST_LOG` overrides both).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true, env = "CHAINSTAMP_JSON_LOGS")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print a file's fingerprint without touching the chain.
    Fingerprint {
        /// File to fingerprint.
        file: PathBuf,
        /// Optional PIN salt.
        #[arg(long)]
        pin: Option<String>,
    },

    /// Check whether a file has been stamped.
    Verify {
        /// File to verify.
        file: PathBuf,
        /// PIN the file was stamped with.
        #[arg(long)]
        pin: Option<String>,
    },

    /// Stamp a file with the key in the signer environment variable.
    Stamp {
        /// File to stamp.
        file: PathBuf,
        /// Optional PIN salt (at least 4 characters).
        #[arg(long)]
        pin: Option<String>,
        /// Record the stamp as private.
        #[arg(long)]
        private: bool,
    },

    /// List an owner's stamps from chain events.
    History {
        /// Owner address.
        address: String,
        /// First block to scan.
        #[arg(long)]
        from_block: Option<u64>,
    },

    /// List an owner's side-store rows.
    Stamps {
        /// Owner address.
        address: String,
    },

    /// Run the HTTP API.
    Serve {
        /// Listen address.
        #[arg(long, env = "CHAINSTAMP_BIND")]
        bind: Option<SocketAddr>,
    },
}

impl Cli {
    /// Merge the config file (or defaults) with command-line overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file is specified but cannot be loaded.
    pub fn to_config(&self) -> color_eyre::Result<StampConfig> {
        let mut config = if let Some(ref path) = self.config {
            StampConfig::from_file(path)?
        } else {
            StampConfig::default()
        };

        if let Some(network) = self.network {
            config.chain.network = network;
        }
        if let Some(ref url) = self.rpc_url {
            config.chain.rpc_url = Some(url.clone());
        }
        if let Some(ref contract) = self.contract {
            config.chain.contract_address = Some(contract.clone());
        }
        if let Some(chain_id) = self.chain_id {
            config.chain.chain_id = Some(chain_id);
        }
        if let Some(backend) = self.side_store {
            config.side_store.backend = backend;
        }
        if let Some(ref path) = self.db_path {
            config.side_store.path = path.clone();
        }
        if let Command::Serve { bind: Some(bind) } = self.command {
            config.server.bind = bind;
        }
        if let Some(ref level) = self.log_level {
            config.log_level = level.clone();
        }

        Ok(config)
    }
}
