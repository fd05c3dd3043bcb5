//! Side-store for supplementary stamp metadata.
//!
//! The side-store keeps what the chain does not: file name, size and the
//! transaction id, keyed by fingerprint. It is a cache, never a source of
//! truth; whatever it says about owner or visibility is overridden by the
//! chain.
//!
//! Two implementations are provided:
//!
//! - [`MemoryStore`] - process-local, for tests and ephemeral servers
//! - [`SqliteStore`] - persistent, a `stamps` table with a unique fingerprint column

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::address::Address;
use crate::chain::TxHash;
use crate::digest::Fingerprint;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata row for one stamped file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SideMetadata {
    /// Stamped fingerprint (unique key).
    pub fingerprint: Fingerprint,
    /// Owner as reported by the chain at recording time.
    pub owner: Address,
    /// Original file name.
    pub file_name: String,
    /// File size in bytes.
    pub file_size: u64,
    /// Stamp time as reported by the chain.
    pub timestamp: DateTime<Utc>,
    /// Stamping transaction, when known.
    pub tx_id: Option<TxHash>,
    /// Visibility as reported by the chain at recording time.
    pub is_public: bool,
    /// When the row was written.
    pub created_at: DateTime<Utc>,
}

/// Outcome of a side-store insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertResult {
    /// Row written.
    Inserted,
    /// A row for this fingerprint already exists; nothing was written.
    AlreadyExists,
}

/// Storage backend for [`SideMetadata`].
#[async_trait]
pub trait SideStore: Send + Sync {
    /// Insert a row unless one exists for the same fingerprint.
    async fn insert(&self, metadata: &SideMetadata) -> Result<InsertResult>;

    /// Point lookup by fingerprint.
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<SideMetadata>>;

    /// All rows for `owner`, most recently created first.
    async fn list_by_owner(&self, owner: &Address) -> Result<Vec<SideMetadata>>;
}
