//! Ledger access for chainstamp.
//!
//! The ledger is an EVM chain hosting the stamp contract. Everything this
//! crate needs from it is expressed by the [`Ledger`] trait:
//!
//! ```text
//!               ┌──────────────┐
//!  verify ────▶ │ ChainGateway │──┐  read_stamp / stamped_events / receipt
//!               └──────────────┘  │
//!                                 ▼
//!                           ┌──────────┐      ┌───────────────┐
//!                           │  Ledger  │ ◀─── │ JsonRpcLedger │ (HTTP JSON-RPC)
//!                           └──────────┘      └───────────────┘
//!                                 ▲           ┌───────────────┐
//!               ┌──────────────┐  │           │ MemoryLedger  │ (tests, local dev)
//!  stamp ─────▶ │  WritePath   │──┘           └───────────────┘
//!               └──────────────┘   estimate / sign / broadcast / receipt
//! ```

pub mod abi;
mod gateway;
mod memory;
mod rpc;
pub mod tx;

pub use gateway::{
    ChainGateway, History, HistoryConfig, HistoryEntry, RangePlan, RangePolicy,
    DEFAULT_HISTORY_TIMEOUT, DEFAULT_WINDOW, NARROW_WINDOW,
};
pub use memory::MemoryLedger;
pub use rpc::{ChainEndpoint, JsonRpcLedger};

use crate::address::Address;
use crate::digest::Fingerprint;
use crate::error::{Error, Result};
use crate::session::WalletSession;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A 32-byte chain hash (transaction or block).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct H256([u8; 32]);

/// Transaction hash.
pub type TxHash = H256;

/// Block hash.
pub type BlockHash = H256;

impl H256 {
    /// Wrap raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl FromStr for H256 {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let clean = s.trim().trim_start_matches("0x");
        if clean.len() != 64 {
            return Err(Error::InvalidInput(format!(
                "hash must be 64 hex characters, got {}",
                clean.len()
            )));
        }
        let mut out = [0u8; 32];
        hex::decode_to_slice(clean, &mut out)
            .map_err(|e| Error::InvalidInput(format!("hash is not hex: {e}")))?;
        Ok(Self(out))
    }
}

impl TryFrom<String> for H256 {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<H256> for String {
    fn from(h: H256) -> Self {
        h.to_string()
    }
}

impl fmt::Display for H256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for H256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "H256({self})")
    }
}

/// Result of the contract's `verifyFile` view.
///
/// When `exists` is false every other field is `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StampStatus {
    /// Whether the fingerprint has been stamped.
    pub exists: bool,
    /// Stamp owner.
    pub owner: Option<Address>,
    /// Chain-assigned creation time in milliseconds since the epoch.
    pub timestamp_ms: Option<u64>,
    /// Visibility chosen at stamping time.
    pub is_public: Option<bool>,
}

impl StampStatus {
    /// The "not stamped" answer.
    #[must_use]
    pub const fn absent() -> Self {
        Self {
            exists: false,
            owner: None,
            timestamp_ms: None,
            is_public: None,
        }
    }

    /// A found stamp. `timestamp_secs` is the chain's seconds value.
    #[must_use]
    pub const fn found(owner: Address, timestamp_secs: u64, is_public: bool) -> Self {
        Self {
            exists: true,
            owner: Some(owner),
            timestamp_ms: Some(timestamp_secs.saturating_mul(1000)),
            is_public: Some(is_public),
        }
    }
}

/// One decoded `FileStamped` log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StampedEvent {
    /// Stamped fingerprint (indexed topic).
    pub fingerprint: Fingerprint,
    /// Stamp owner (indexed topic).
    pub owner: Address,
    /// Chain timestamp in seconds.
    pub timestamp_secs: u64,
    /// Visibility flag.
    pub is_public: bool,
    /// Block that included the log.
    pub block_number: u64,
    /// Hash of that block.
    pub block_hash: BlockHash,
    /// Transaction that emitted the log.
    pub tx_hash: TxHash,
}

/// Transaction outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    /// Executed successfully.
    Success,
    /// Reverted.
    Failed,
}

/// Receipt facts for an included transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    /// Transaction hash.
    pub tx_hash: TxHash,
    /// Including block number.
    pub block_number: u64,
    /// Including block hash.
    pub block_hash: BlockHash,
    /// Gas consumed.
    pub gas_used: u64,
    /// Execution status.
    pub status: TxStatus,
}

impl TransactionRecord {
    /// Whether the transaction executed successfully.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.status == TxStatus::Success
    }
}

/// A signed `stampFile` transaction ready for broadcast.
///
/// The raw bytes are fixed at signing time, so re-broadcasting after a
/// transport failure resends the same transaction rather than a new one.
#[derive(Debug, Clone)]
pub struct SignedStamp {
    /// Hash of the raw transaction.
    pub hash: TxHash,
    /// RLP-encoded signed transaction.
    pub raw: Bytes,
    /// Sending account.
    pub from: Address,
    /// Fingerprint being stamped.
    pub fingerprint: Fingerprint,
    /// Requested visibility.
    pub is_public: bool,
}

/// The ledger operations chainstamp depends on.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Latest block number.
    async fn latest_block(&self) -> Result<u64>;

    /// Look up a stamp by fingerprint.
    async fn read_stamp(&self, fingerprint: &Fingerprint) -> Result<StampStatus>;

    /// `FileStamped` events for `owner` within `[from_block, to_block]`.
    async fn stamped_events(
        &self,
        owner: &Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<StampedEvent>>;

    /// Receipt for a transaction, `None` while it is pending or unknown.
    async fn receipt(&self, tx: &TxHash) -> Result<Option<TransactionRecord>>;

    /// Native balance in wei.
    async fn balance(&self, address: &Address) -> Result<u128>;

    /// Gas estimate for `stampFile(fingerprint, is_public)` sent from `from`.
    ///
    /// A contract revert surfaces as [`Error::Rejected`] carrying the reason.
    async fn estimate_stamp(
        &self,
        from: &Address,
        fingerprint: &Fingerprint,
        is_public: bool,
    ) -> Result<u64>;

    /// Build and sign a `stampFile` transaction with the session's key.
    async fn sign_stamp(
        &self,
        session: &WalletSession,
        fingerprint: &Fingerprint,
        is_public: bool,
        gas_limit: u64,
    ) -> Result<SignedStamp>;

    /// Submit a signed transaction, returning its hash.
    async fn broadcast(&self, tx: &SignedStamp) -> Result<TxHash>;
}
