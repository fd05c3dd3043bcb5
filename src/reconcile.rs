//! Best-effort reconciliation between the chain and the side-store.
//!
//! Once a stamp is on chain it is final. Everything here is advisory: a
//! missing, slow or failing side-store degrades the result but never turns
//! a confirmed stamp into an error.

use crate::address::Address;
use crate::chain::StampStatus;
use crate::digest::Fingerprint;
use crate::error::Result;
use crate::store::{InsertResult, SideMetadata, SideStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default deadline for a single side-store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of [`Reconciler::record_metadata`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Metadata written.
    Recorded,
    /// A row for this fingerprint already exists.
    Duplicate,
    /// Metadata could not be written; the stamp itself stands.
    Degraded(String),
}

impl RecordOutcome {
    /// Warning text for degraded outcomes.
    #[must_use]
    pub fn warning(&self) -> Option<&str> {
        match self {
            Self::Degraded(reason) => Some(reason),
            Self::Recorded | Self::Duplicate => None,
        }
    }
}

/// Records and looks up side-store metadata without ever failing a stamp.
#[derive(Clone)]
pub struct Reconciler {
    store: Option<Arc<dyn SideStore>>,
    timeout: Duration,
}

impl Reconciler {
    /// Create a reconciler. `None` disables the side-store entirely.
    #[must_use]
    pub fn new(store: Option<Arc<dyn SideStore>>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Reconciler with no side-store.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(None, DEFAULT_STORE_TIMEOUT)
    }

    /// Whether a side-store is configured.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Record metadata for a confirmed stamp.
    pub async fn record_metadata(&self, metadata: &SideMetadata) -> RecordOutcome {
        let Some(store) = &self.store else {
            let reason = "side-store not configured; metadata not recorded".to_string();
            warn!("{} for {}", reason, metadata.fingerprint);
            return RecordOutcome::Degraded(reason);
        };

        match tokio::time::timeout(self.timeout, store.insert(metadata)).await {
            Ok(Ok(InsertResult::Inserted)) => {
                info!(
                    "Recorded metadata for {} ({}, {} bytes)",
                    metadata.fingerprint, metadata.file_name, metadata.file_size
                );
                RecordOutcome::Recorded
            }
            Ok(Ok(InsertResult::AlreadyExists)) => {
                debug!("Metadata for {} already present", metadata.fingerprint);
                RecordOutcome::Duplicate
            }
            Ok(Err(e)) => {
                warn!("Stamp {} is on chain but metadata save failed: {}", metadata.fingerprint, e);
                RecordOutcome::Degraded(format!(
                    "file stamped on chain but metadata save failed: {e}"
                ))
            }
            Err(_) => {
                warn!("Side-store timed out recording {}", metadata.fingerprint);
                RecordOutcome::Degraded(format!(
                    "file stamped on chain but metadata save timed out after {}s",
                    self.timeout.as_secs()
                ))
            }
        }
    }

    /// Fetch metadata for `fingerprint`. Failures read as absent.
    pub async fn lookup_metadata(&self, fingerprint: &Fingerprint) -> Option<SideMetadata> {
        let store = self.store.as_ref()?;
        match tokio::time::timeout(self.timeout, store.get(fingerprint)).await {
            Ok(Ok(found)) => found,
            Ok(Err(e)) => {
                warn!("Metadata lookup for {} failed: {}", fingerprint, e);
                None
            }
            Err(_) => {
                warn!("Metadata lookup for {} timed out", fingerprint);
                None
            }
        }
    }

    /// Side-store rows for `owner`, newest first. Empty without a side-store.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::SideStore`] if the listing fails or times out.
    pub async fn list_by_owner(&self, owner: &Address) -> Result<Vec<SideMetadata>> {
        let Some(store) = &self.store else {
            return Ok(Vec::new());
        };
        tokio::time::timeout(self.timeout, store.list_by_owner(owner))
            .await
            .map_err(|_| crate::Error::SideStore("listing timed out".to_string()))?
    }
}

/// Overlay chain facts onto side-store metadata. The chain wins.
#[must_use]
pub fn merge(chain: &StampStatus, metadata: Option<SideMetadata>) -> Option<SideMetadata> {
    let mut metadata = metadata?;
    if let Some(owner) = chain.owner {
        if owner != metadata.owner {
            warn!(
                "Side-store owner {} for {} disagrees with chain owner {}",
                metadata.owner, metadata.fingerprint, owner
            );
            metadata.owner = owner;
        }
    }
    if let Some(is_public) = chain.is_public {
        if is_public != metadata.is_public {
            warn!("Side-store visibility for {} disagrees with chain", metadata.fingerprint);
            metadata.is_public = is_public;
        }
    }
    Some(metadata)
}
