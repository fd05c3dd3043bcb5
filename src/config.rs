//! Configuration for chainstamp.

use crate::address::Address;
use crate::chain::{ChainEndpoint, HistoryConfig, TxHash};
use crate::error::{Error, Result};
use crate::reconcile::DEFAULT_STORE_TIMEOUT;
use crate::write::WriteConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Known deployment targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Network {
    /// Polygon Amoy testnet.
    #[default]
    PolygonAmoy,
    /// Base Sepolia testnet.
    BaseSepolia,
    /// Ethereum Sepolia testnet.
    EthereumSepolia,
    /// Arbitrum Sepolia testnet.
    ArbitrumSepolia,
    /// Local Anvil node.
    Anvil,
    /// Local Hardhat node.
    Hardhat,
}

impl Network {
    /// Every preset.
    pub const ALL: [Self; 6] = [
        Self::PolygonAmoy,
        Self::BaseSepolia,
        Self::EthereumSepolia,
        Self::ArbitrumSepolia,
        Self::Anvil,
        Self::Hardhat,
    ];

    /// EIP-155 chain id.
    #[must_use]
    pub const fn chain_id(self) -> u64 {
        match self {
            Self::PolygonAmoy => 80_002,
            Self::BaseSepolia => 84_532,
            Self::EthereumSepolia => 11_155_111,
            Self::ArbitrumSepolia => 421_614,
            Self::Anvil => 31_337,
            Self::Hardhat => 1_337,
        }
    }

    /// Display name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::PolygonAmoy => "Polygon Amoy",
            Self::BaseSepolia => "Base Sepolia",
            Self::EthereumSepolia => "Ethereum Sepolia",
            Self::ArbitrumSepolia => "Arbitrum Sepolia",
            Self::Anvil => "Anvil",
            Self::Hardhat => "Hardhat",
        }
    }

    /// Public JSON-RPC endpoint.
    #[must_use]
    pub const fn rpc_url(self) -> &'static str {
        match self {
            Self::PolygonAmoy => "https://rpc-amoy.polygon.technology",
            Self::BaseSepolia => "https://sepolia.base.org",
            Self::EthereumSepolia => "https://rpc.sepolia.org",
            Self::ArbitrumSepolia => "https://sepolia-rollup.arbitrum.io/rpc",
            Self::Anvil | Self::Hardhat => "http://127.0.0.1:8545",
        }
    }

    /// Block explorer base URL, if the network has one.
    #[must_use]
    pub const fn explorer_url(self) -> Option<&'static str> {
        match self {
            Self::PolygonAmoy => Some("https://amoy.polygonscan.com"),
            Self::BaseSepolia => Some("https://sepolia.basescan.org"),
            Self::EthereumSepolia => Some("https://sepolia.etherscan.io"),
            Self::ArbitrumSepolia => Some("https://sepolia.arbiscan.io"),
            Self::Anvil | Self::Hardhat => None,
        }
    }

    /// Explorer link for a transaction.
    #[must_use]
    pub fn tx_url(self, tx: &TxHash) -> Option<String> {
        self.explorer_url().map(|base| format!("{base}/tx/{tx}"))
    }

    /// Preset for a chain id.
    #[must_use]
    pub fn from_chain_id(chain_id: u64) -> Option<Self> {
        Self::ALL.into_iter().find(|n| n.chain_id() == chain_id)
    }

    const fn key(self) -> &'static str {
        match self {
            Self::PolygonAmoy => "polygon_amoy",
            Self::BaseSepolia => "base_sepolia",
            Self::EthereumSepolia => "ethereum_sepolia",
            Self::ArbitrumSepolia => "arbitrum_sepolia",
            Self::Anvil => "anvil",
            Self::Hardhat => "hardhat",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Network {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|n| n.key() == wanted)
            .ok_or_else(|| {
                let known: Vec<&str> = Self::ALL.iter().map(|n| n.key()).collect();
                Error::Config(format!("unknown network {s:?}, expected one of {}", known.join(", ")))
            })
    }
}

/// Side-store backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SideStoreBackend {
    /// No side-store; metadata is never recorded.
    #[default]
    None,
    /// Process memory.
    Memory,
    /// SQLite file at [`SideStoreConfig::path`].
    Sqlite,
}

impl FromStr for SideStoreBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "memory" => Ok(Self::Memory),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(Error::Config(format!(
                "unknown side-store backend {other:?}, expected none, memory or sqlite"
            ))),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StampConfig {
    /// Ledger connection and write tuning.
    #[serde(default)]
    pub chain: ChainConfig,

    /// Side-store settings.
    #[serde(default)]
    pub side_store: SideStoreConfig,

    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Server-side signing key source.
    #[serde(default)]
    pub signer: SignerConfig,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Ledger configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Network preset supplying the RPC URL and chain id defaults.
    #[serde(default)]
    pub network: Network,

    /// JSON-RPC URL, overriding the preset.
    #[serde(default)]
    pub rpc_url: Option<String>,

    /// Stamp contract address. Required; presets never provide one.
    #[serde(default)]
    pub contract_address: Option<String>,

    /// Chain id, overriding the preset.
    #[serde(default)]
    pub chain_id: Option<u64>,

    /// Per-request HTTP timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Deadline for each history attempt in seconds.
    #[serde(default = "default_history_timeout")]
    pub history_timeout_secs: u64,

    /// Blocks scanned when no start block is given.
    #[serde(default = "default_window")]
    pub default_window: u64,

    /// Blocks scanned by the history fallback.
    #[serde(default = "default_narrow_window")]
    pub narrow_window: u64,

    /// Gas limit floor.
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,

    /// Extra broadcast attempts on transport failure.
    #[serde(default = "default_broadcast_retries")]
    pub broadcast_retries: u32,

    /// Base delay between broadcast attempts in milliseconds.
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,

    /// Receipt polling interval in milliseconds.
    #[serde(default = "default_confirmation_poll")]
    pub confirmation_poll_ms: u64,

    /// Receipt wait limit in seconds.
    #[serde(default = "default_confirmation_timeout")]
    pub confirmation_timeout_secs: u64,
}

/// Side-store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SideStoreConfig {
    /// Backend.
    #[serde(default)]
    pub backend: SideStoreBackend,

    /// Database path for the SQLite backend.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    /// Per-call deadline in seconds.
    #[serde(default = "default_store_timeout")]
    pub timeout_secs: u64,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address.
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    /// Largest accepted upload in bytes.
    #[serde(default = "default_max_upload")]
    pub max_upload_bytes: usize,
}

/// Signing key configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignerConfig {
    /// Environment variable holding the hex private key.
    #[serde(default = "default_private_key_env")]
    pub private_key_env: String,
}

impl Default for StampConfig {
    fn default() -> Self {
        Self {
            chain: ChainConfig::default(),
            side_store: SideStoreConfig::default(),
            server: ServerConfig::default(),
            signer: SignerConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            network: Network::default(),
            rpc_url: None,
            contract_address: None,
            chain_id: None,
            request_timeout_secs: default_request_timeout(),
            history_timeout_secs: default_history_timeout(),
            default_window: default_window(),
            narrow_window: default_narrow_window(),
            gas_limit: default_gas_limit(),
            broadcast_retries: default_broadcast_retries(),
            retry_backoff_ms: default_retry_backoff(),
            confirmation_poll_ms: default_confirmation_poll(),
            confirmation_timeout_secs: default_confirmation_timeout(),
        }
    }
}

impl Default for SideStoreConfig {
    fn default() -> Self {
        Self {
            backend: SideStoreBackend::default(),
            path: default_db_path(),
            timeout_secs: default_store_timeout(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_upload_bytes: default_max_upload(),
        }
    }
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            private_key_env: default_private_key_env(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

const fn default_request_timeout() -> u64 {
    30
}

const fn default_history_timeout() -> u64 {
    30
}

const fn default_window() -> u64 {
    crate::chain::DEFAULT_WINDOW
}

const fn default_narrow_window() -> u64 {
    crate::chain::NARROW_WINDOW
}

const fn default_gas_limit() -> u64 {
    crate::write::DEFAULT_GAS_LIMIT
}

const fn default_broadcast_retries() -> u32 {
    2
}

const fn default_retry_backoff() -> u64 {
    500
}

const fn default_confirmation_poll() -> u64 {
    2_000
}

const fn default_confirmation_timeout() -> u64 {
    300
}

fn default_db_path() -> PathBuf {
    directories::ProjectDirs::from("", "", "chainstamp")
        .map(|dirs| dirs.data_dir().join("stamps.db"))
        .unwrap_or_else(|| PathBuf::from(".chainstamp/stamps.db"))
}

const fn default_store_timeout() -> u64 {
    DEFAULT_STORE_TIMEOUT.as_secs()
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 3001))
}

const fn default_max_upload() -> usize {
    100 * 1024 * 1024
}

fn default_private_key_env() -> String {
    "CHAINSTAMP_PRIVATE_KEY".to_string()
}

impl ChainConfig {
    /// RPC URL in effect (explicit, else the preset's).
    #[must_use]
    pub fn effective_rpc_url(&self) -> String {
        self.rpc_url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| self.network.rpc_url().to_string())
    }

    /// Chain id in effect (explicit, else the preset's).
    #[must_use]
    pub fn effective_chain_id(&self) -> u64 {
        self.chain_id.unwrap_or_else(|| self.network.chain_id())
    }

    /// Network preset matching the chain id in effect, for explorer links.
    #[must_use]
    pub fn explorer_network(&self) -> Option<Network> {
        Network::from_chain_id(self.effective_chain_id())
    }

    /// Resolve the ledger endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::GatewayMisconfigured`] if no contract address is
    /// configured or it is malformed.
    pub fn endpoint(&self) -> Result<ChainEndpoint> {
        let raw = self
            .contract_address
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                Error::GatewayMisconfigured("contract address not configured".to_string())
            })?;
        let contract: Address = raw
            .parse()
            .map_err(|e| Error::GatewayMisconfigured(format!("contract address: {e}")))?;
        Ok(ChainEndpoint {
            rpc_url: self.effective_rpc_url(),
            contract,
            chain_id: self.effective_chain_id(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        })
    }

    /// History tuning.
    #[must_use]
    pub const fn history(&self) -> HistoryConfig {
        HistoryConfig {
            timeout: Duration::from_secs(self.history_timeout_secs),
            default_window: self.default_window,
            narrow_window: self.narrow_window,
        }
    }

    /// Write path tuning.
    #[must_use]
    pub fn write(&self) -> WriteConfig {
        WriteConfig {
            gas_limit: self.gas_limit,
            broadcast_retries: self.broadcast_retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            confirmation_poll: Duration::from_millis(self.confirmation_poll_ms),
            confirmation_timeout: Duration::from_secs(self.confirmation_timeout_secs),
            ..WriteConfig::default()
        }
    }
}

impl StampConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::Error::Config(e.to_string()))
    }

    /// Save configuration to a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn to_file(&self, path: &std::path::Path) -> crate::Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| crate::Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
