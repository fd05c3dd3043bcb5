//! Verification flow.
//!
//! ```text
//! Start ─▶ Hashed ─▶ Checked ─┬─▶ Found ─▶ Enriched ─┬─▶ Done
//!                             └─▶ NotFound ──────────┘
//! ```
//!
//! A gateway failure at `Checked` ends the flow with that error unchanged.
//! There are no automatic retries.

use crate::address::Address;
use crate::chain::{ChainGateway, TxHash};
use crate::digest::{fingerprint, Fingerprint};
use crate::error::{Error, Result};
use crate::reconcile::{merge, Reconciler};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

/// States of the verification flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyStep {
    /// Request accepted.
    Start,
    /// Fingerprint known.
    Hashed,
    /// Chain consulted.
    Checked,
    /// Stamp exists.
    Found,
    /// No stamp.
    NotFound,
    /// Side-store consulted.
    Enriched,
    /// Answer ready.
    Done,
}

/// Input to [`Verifier::verify`].
#[derive(Debug, Clone, Default)]
pub struct VerifyRequest {
    bytes: Option<Bytes>,
    fingerprint: Option<Fingerprint>,
    pin: Option<String>,
    file_name: Option<String>,
}

impl VerifyRequest {
    /// Verify file contents.
    #[must_use]
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: Some(bytes.into()),
            ..Self::default()
        }
    }

    /// Verify an already computed fingerprint.
    #[must_use]
    pub fn from_fingerprint(fingerprint: Fingerprint) -> Self {
        Self {
            fingerprint: Some(fingerprint),
            ..Self::default()
        }
    }

    /// Salt the content hash with a PIN. Ignored for precomputed fingerprints.
    #[must_use]
    pub fn with_pin(mut self, pin: Option<String>) -> Self {
        self.pin = pin.filter(|p| !p.is_empty());
        self
    }

    /// Use this fingerprint instead of hashing the bytes.
    #[must_use]
    pub fn with_fingerprint(mut self, fingerprint: Option<Fingerprint>) -> Self {
        if fingerprint.is_some() {
            self.fingerprint = fingerprint;
        }
        self
    }

    /// Name to report when the side-store has none.
    #[must_use]
    pub fn with_file_name(mut self, file_name: Option<String>) -> Self {
        self.file_name = file_name;
        self
    }
}

/// Answer to "does this file have an on-chain proof?".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Verification {
    /// Whether a stamp exists.
    pub exists: bool,
    /// Fingerprint that was checked.
    #[serde(rename = "fileHash")]
    pub fingerprint: Fingerprint,
    /// Chain owner.
    #[serde(rename = "ownerAddress", skip_serializing_if = "Option::is_none")]
    pub owner: Option<Address>,
    /// Chain timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Chain visibility.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_public: Option<bool>,
    /// File name from the side-store, else from the request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// Stamping transaction from the side-store.
    #[serde(rename = "txId")]
    pub tx_id: Option<TxHash>,
    /// States visited, in order.
    #[serde(skip)]
    pub path: Vec<VerifyStep>,
}

/// Runs the verification flow.
#[derive(Clone)]
pub struct Verifier {
    gateway: ChainGateway,
    reconciler: Reconciler,
}

impl Verifier {
    /// Create a verifier.
    #[must_use]
    pub fn new(gateway: ChainGateway, reconciler: Reconciler) -> Self {
        Self {
            gateway,
            reconciler,
        }
    }

    /// Verify a file or fingerprint.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidInput`] if the request carries neither bytes nor a
    /// fingerprint; the gateway error verbatim if the chain lookup fails.
    pub async fn verify(&self, request: VerifyRequest) -> Result<Verification> {
        let mut path = vec![VerifyStep::Start];

        let fp = match (request.fingerprint, &request.bytes) {
            (Some(fp), _) => fp,
            (None, Some(bytes)) => fingerprint(bytes, request.pin.as_deref()),
            (None, None) => {
                return Err(Error::InvalidInput("no file or fingerprint supplied".to_string()))
            }
        };
        path.push(VerifyStep::Hashed);
        debug!("Verifying {}", fp);

        let status = self.gateway.exists(&fp).await?;
        path.push(VerifyStep::Checked);

        if !status.exists {
            path.extend([VerifyStep::NotFound, VerifyStep::Done]);
            return Ok(Verification {
                exists: false,
                fingerprint: fp,
                owner: None,
                timestamp: None,
                is_public: None,
                file_name: None,
                tx_id: None,
                path,
            });
        }
        path.push(VerifyStep::Found);

        let metadata = merge(&status, self.reconciler.lookup_metadata(&fp).await);
        path.extend([VerifyStep::Enriched, VerifyStep::Done]);

        let timestamp = status
            .timestamp_ms
            .and_then(|ms| i64::try_from(ms).ok())
            .and_then(DateTime::from_timestamp_millis);
        let (file_name, tx_id) = match metadata {
            Some(m) => (Some(m.file_name), m.tx_id),
            None => (request.file_name, None),
        };

        Ok(Verification {
            exists: true,
            fingerprint: fp,
            owner: status.owner,
            timestamp,
            is_public: status.is_public,
            file_name,
            tx_id,
            path,
        })
    }
}
