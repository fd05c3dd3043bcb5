//! Stamp service: the chain gateway, write path, reconciler and verifier
//! wired together from a [`StampConfig`].

use crate::address::Address;
use crate::chain::{ChainGateway, History, JsonRpcLedger, Ledger, TransactionRecord, TxHash};
use crate::config::{Network, SideStoreBackend, StampConfig};
use crate::digest::{fingerprint, Fingerprint};
use crate::error::{Error, Result};
use crate::event::{create_event_channel, StampEvent, StampEventsChannel, StampEventsSender};
use crate::reconcile::{RecordOutcome, Reconciler};
use crate::session::WalletSession;
use crate::store::{MemoryStore, SideMetadata, SideStore, SqliteStore};
use crate::verify::{Verification, Verifier, VerifyRequest};
use crate::write::WritePath;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Shortest PIN accepted when stamping.
pub const MIN_PIN_LEN: usize = 4;

/// Builder for a [`StampService`].
pub struct StampServiceBuilder {
    config: StampConfig,
    ledger: Option<Arc<dyn Ledger>>,
    side_store: Option<Option<Arc<dyn SideStore>>>,
}

impl StampServiceBuilder {
    /// Create a builder with the given configuration.
    #[must_use]
    pub fn new(config: StampConfig) -> Self {
        Self {
            config,
            ledger: None,
            side_store: None,
        }
    }

    /// Use this ledger instead of connecting to the configured endpoint.
    #[must_use]
    pub fn with_ledger(mut self, ledger: Arc<dyn Ledger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Use this side-store (or none) instead of the configured backend.
    #[must_use]
    pub fn with_side_store(mut self, store: Option<Arc<dyn SideStore>>) -> Self {
        self.side_store = Some(store);
        self
    }

    /// Build the service.
    ///
    /// # Errors
    ///
    /// Returns [`Error::GatewayMisconfigured`] if no ledger was supplied and
    /// the configured endpoint is incomplete, or [`Error::SideStore`] if the
    /// SQLite side-store cannot be opened.
    pub fn build(self) -> Result<StampService> {
        let chain = &self.config.chain;

        let ledger = match self.ledger {
            Some(ledger) => ledger,
            None => {
                let endpoint = chain.endpoint()?;
                info!(
                    "Connecting to {} (chain {}) contract {}",
                    endpoint.rpc_url, endpoint.chain_id, endpoint.contract
                );
                Arc::new(JsonRpcLedger::new(endpoint)?) as Arc<dyn Ledger>
            }
        };

        let side_store = match self.side_store {
            Some(store) => store,
            None => match self.config.side_store.backend {
                SideStoreBackend::None => {
                    warn!("Side-store not configured - metadata will not be recorded");
                    None
                }
                SideStoreBackend::Memory => Some(Arc::new(MemoryStore::new()) as Arc<dyn SideStore>),
                SideStoreBackend::Sqlite => Some(
                    Arc::new(SqliteStore::open(&self.config.side_store.path)?) as Arc<dyn SideStore>,
                ),
            },
        };

        let gateway = ChainGateway::new(Arc::clone(&ledger), chain.history());
        let reconciler = Reconciler::new(
            side_store,
            Duration::from_secs(self.config.side_store.timeout_secs),
        );
        let (events_tx, _) = create_event_channel();

        Ok(StampService {
            verifier: Verifier::new(gateway.clone(), reconciler.clone()),
            write: WritePath::new(ledger, chain.write()),
            gateway,
            reconciler,
            events_tx,
            explorer: chain.explorer_network(),
        })
    }
}

/// A file to stamp with the service's own signing session.
#[derive(Debug, Clone)]
pub struct StampRequest {
    /// File contents.
    pub bytes: Bytes,
    /// Original file name.
    pub file_name: String,
    /// Optional PIN salting the fingerprint.
    pub pin: Option<String>,
    /// Visibility flag recorded on chain.
    pub is_public: bool,
}

/// A stamp the owner signed themselves, to be confirmed and recorded.
#[derive(Debug, Clone)]
pub struct ConfirmRequest {
    /// File contents.
    pub bytes: Bytes,
    /// Original file name.
    pub file_name: String,
    /// Owner the caller claims. The chain's answer is used regardless.
    pub claimed_owner: Address,
    /// Transaction that stamped the file.
    pub tx_hash: TxHash,
    /// Fingerprint computed client-side (e.g. PIN-salted), overriding the bytes.
    pub fingerprint: Option<Fingerprint>,
}

/// Outcome of a stamp or confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StampReceipt {
    /// Stamped fingerprint.
    #[serde(rename = "fileHash")]
    pub fingerprint: Fingerprint,
    /// Stamping transaction.
    pub tx_hash: TxHash,
    /// Owner according to the chain.
    #[serde(rename = "ownerAddress")]
    pub owner: Address,
    /// Chain timestamp.
    pub timestamp: DateTime<Utc>,
    /// Visibility according to the chain.
    pub is_public: bool,
    /// Original file name.
    pub file_name: String,
    /// File size in bytes.
    pub file_size: u64,
    /// Including block, when the receipt was available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    /// Gas used, when the receipt was available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_used: Option<u64>,
    /// Block explorer link.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explorer_url: Option<String>,
    /// Set when the stamp stands but metadata was not recorded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Stamping, verification and history over one ledger.
#[derive(Clone)]
pub struct StampService {
    gateway: ChainGateway,
    write: WritePath,
    reconciler: Reconciler,
    verifier: Verifier,
    events_tx: StampEventsSender,
    explorer: Option<Network>,
}

impl StampService {
    /// Subscribe to service events. Drop the receiver to unsubscribe.
    #[must_use]
    pub fn subscribe(&self) -> StampEventsChannel {
        self.events_tx.subscribe()
    }

    /// Chain gateway in use.
    #[must_use]
    pub const fn gateway(&self) -> &ChainGateway {
        &self.gateway
    }

    /// Whether a side-store is configured.
    #[must_use]
    pub fn has_side_store(&self) -> bool {
        self.reconciler.is_enabled()
    }

    /// Explorer link for `tx`, when the network has an explorer.
    #[must_use]
    pub fn tx_url(&self, tx: &TxHash) -> Option<String> {
        self.explorer.and_then(|n| n.tx_url(tx))
    }

    /// Verify a file or fingerprint.
    ///
    /// # Errors
    ///
    /// See [`Verifier::verify`].
    pub async fn verify(&self, request: VerifyRequest) -> Result<Verification> {
        self.verifier.verify(request).await
    }

    /// Stamp a file with `session` and record its metadata.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidInput`] for a PIN shorter than [`MIN_PIN_LEN`], plus
    /// the errors of [`WritePath::submit`]. Nothing after the chain write
    /// can fail the call.
    pub async fn stamp(&self, session: &WalletSession, request: StampRequest) -> Result<StampReceipt> {
        let pin = request.pin.as_deref().filter(|p| !p.is_empty());
        if let Some(pin) = pin {
            if pin.chars().count() < MIN_PIN_LEN {
                return Err(Error::InvalidInput(format!(
                    "PIN must be at least {MIN_PIN_LEN} characters"
                )));
            }
        }
        let fp = fingerprint(&request.bytes, pin);
        info!("Stamping {} ({}, {} bytes)", fp, request.file_name, request.bytes.len());

        let tx_hash = self.write.send(session, &fp, request.is_public).await?;
        self.emit(StampEvent::Submitted {
            fingerprint: fp,
            tx_hash,
        });
        let record = self.write.confirm(&fp, &tx_hash).await?;

        let (owner, timestamp, is_public) = match self.gateway.exists(&fp).await {
            Ok(status) if status.exists => (
                status.owner.unwrap_or_else(|| session.address()),
                ms_to_datetime(status.timestamp_ms),
                status.is_public.unwrap_or(request.is_public),
            ),
            Ok(_) => {
                warn!("Stamp {} confirmed but not yet visible to verifyFile", fp);
                (session.address(), Utc::now(), request.is_public)
            }
            Err(e) => {
                warn!("Could not read back stamp {}: {}", fp, e);
                (session.address(), Utc::now(), request.is_public)
            }
        };

        self.finish(
            fp,
            owner,
            timestamp,
            is_public,
            request.file_name,
            request.bytes.len() as u64,
            tx_hash,
            Some(record),
            false,
        )
        .await
    }

    /// Confirm a stamp the owner signed and record its metadata.
    ///
    /// Owner, visibility and timestamp are taken from the chain, never from
    /// the request.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInput`] if the stamp is not on chain yet
    /// - [`Error::DuplicateStamp`] if metadata was already recorded
    /// - the gateway error if the chain lookup fails
    pub async fn confirm(&self, request: ConfirmRequest) -> Result<StampReceipt> {
        let fp = request
            .fingerprint
            .unwrap_or_else(|| fingerprint(&request.bytes, None));
        debug!("Confirming {} via {}", fp, request.tx_hash);

        let status = self.gateway.exists(&fp).await?;
        let (true, Some(owner), Some(is_public)) = (status.exists, status.owner, status.is_public)
        else {
            return Err(Error::InvalidInput(
                "stamp not found on chain; wait for the transaction to confirm".to_string(),
            ));
        };
        if owner != request.claimed_owner {
            warn!(
                "Claimed owner {} for {} differs from chain owner {}",
                request.claimed_owner, fp, owner
            );
        }

        let record = match self.gateway.ledger().receipt(&request.tx_hash).await {
            Ok(record) => record,
            Err(e) => {
                warn!("Receipt lookup for {} failed: {}", request.tx_hash, e);
                None
            }
        };

        self.finish(
            fp,
            owner,
            ms_to_datetime(status.timestamp_ms),
            is_public,
            request.file_name,
            request.bytes.len() as u64,
            request.tx_hash,
            record,
            true,
        )
        .await
    }

    /// On-chain stamp history for `owner`.
    ///
    /// # Errors
    ///
    /// See [`ChainGateway::history`].
    pub async fn history(&self, owner: &Address, from_block: Option<u64>) -> Result<History> {
        let history = self.gateway.history(owner, from_block).await?;
        if history.narrowed {
            self.emit(StampEvent::HistoryNarrowed {
                owner: *owner,
                from_block: history.from_block,
            });
        }
        Ok(history)
    }

    /// Side-store rows for `owner`, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SideStore`] if the side-store fails.
    pub async fn stamps(&self, owner: &Address) -> Result<Vec<SideMetadata>> {
        self.reconciler.list_by_owner(owner).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish(
        &self,
        fp: Fingerprint,
        owner: Address,
        timestamp: DateTime<Utc>,
        is_public: bool,
        file_name: String,
        file_size: u64,
        tx_hash: TxHash,
        record: Option<TransactionRecord>,
        reject_duplicate: bool,
    ) -> Result<StampReceipt> {
        let outcome = self
            .reconciler
            .record_metadata(&SideMetadata {
                fingerprint: fp,
                owner,
                file_name: file_name.clone(),
                file_size,
                timestamp,
                tx_id: Some(tx_hash),
                is_public,
                created_at: Utc::now(),
            })
            .await;
        if reject_duplicate && outcome == RecordOutcome::Duplicate {
            return Err(Error::duplicate(fp));
        }
        if let Some(record) = &record {
            self.emit(StampEvent::Confirmed {
                fingerprint: fp,
                owner,
                block_number: record.block_number,
            });
        }

        let warning = outcome.warning().map(str::to_string);
        if let Some(reason) = &warning {
            self.emit(StampEvent::MetadataDegraded {
                fingerprint: fp,
                reason: reason.clone(),
            });
        }

        let receipt = StampReceipt {
            fingerprint: fp,
            tx_hash,
            owner,
            timestamp,
            is_public,
            file_name,
            file_size,
            block_number: record.map(|r| r.block_number),
            gas_used: record.map(|r| r.gas_used),
            explorer_url: self.tx_url(&tx_hash),
            warning,
        };
        Ok(receipt)
    }

    fn emit(&self, event: StampEvent) {
        // No subscribers is fine.
        let _ = self.events_tx.send(event);
    }
}

fn ms_to_datetime(ms: Option<u64>) -> DateTime<Utc> {
    ms.and_then(|ms| i64::try_from(ms).ok())
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or_else(Utc::now)
}
