//! Read-side wrapper over the stamp contract.
//!
//! Point lookups go straight to the ledger. History queries run through a
//! [`RangePlan`]: the requested (or default) block window is tried first
//! under a deadline, and a timeout-class failure falls back once to a
//! narrower window ending at the chain head.

use super::{BlockHash, Ledger, StampStatus, StampedEvent, TxHash, TxStatus};
use crate::address::Address;
use crate::digest::Fingerprint;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default deadline for one history attempt.
pub const DEFAULT_HISTORY_TIMEOUT: Duration = Duration::from_secs(30);

/// Default look-back when no start block is given.
pub const DEFAULT_WINDOW: u64 = 3_000_000;

/// Look-back used by the fallback attempt.
pub const NARROW_WINDOW: u64 = 100_000;

/// History query tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryConfig {
    /// Deadline for each attempt.
    pub timeout: Duration,
    /// Blocks scanned when the caller gives no start block.
    pub default_window: u64,
    /// Blocks scanned by the fallback attempt.
    pub narrow_window: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_HISTORY_TIMEOUT,
            default_window: DEFAULT_WINDOW,
            narrow_window: NARROW_WINDOW,
        }
    }
}

/// How the start of a scanned range is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangePolicy {
    /// Scan from this block to the head.
    Since(u64),
    /// Scan the most recent `n` blocks.
    Recent(u64),
}

impl RangePolicy {
    /// First block to scan given the current head.
    #[must_use]
    pub const fn start(self, latest: u64) -> u64 {
        match self {
            Self::Since(block) => block,
            Self::Recent(window) => latest.saturating_sub(window),
        }
    }
}

/// Ordered list of range policies tried in sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangePlan {
    policies: Vec<RangePolicy>,
    floor: u64,
}

impl RangePlan {
    /// Plan for a history request.
    ///
    /// A missing or zero `from_block` uses the default window. The fallback
    /// never scans below an explicitly requested start block.
    #[must_use]
    pub fn for_request(from_block: Option<u64>, config: &HistoryConfig) -> Self {
        let first = match from_block {
            Some(block) if block > 0 => RangePolicy::Since(block),
            _ => RangePolicy::Recent(config.default_window),
        };
        Self {
            policies: vec![first, RangePolicy::Recent(config.narrow_window)],
            floor: from_block.unwrap_or(0),
        }
    }

    /// Policies in the order they are attempted.
    #[must_use]
    pub fn policies(&self) -> &[RangePolicy] {
        &self.policies
    }

    /// Concrete `[start, end]` range for `policy` at head `latest`.
    #[must_use]
    pub fn range(&self, policy: RangePolicy, latest: u64) -> (u64, u64) {
        let start = policy.start(latest).max(self.floor).min(latest);
        (start, latest)
    }
}

/// One stamp in an owner's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// Stamping transaction.
    pub tx_hash: TxHash,
    /// Stamped fingerprint.
    pub fingerprint: Fingerprint,
    /// Stamp owner.
    pub owner: Address,
    /// Chain timestamp in milliseconds.
    pub timestamp_ms: u64,
    /// Chain timestamp as a UTC date.
    pub date: DateTime<Utc>,
    /// Visibility flag.
    pub is_public: bool,
    /// Including block.
    pub block_number: u64,
    /// Including block hash.
    pub block_hash: BlockHash,
    /// Gas used by the stamping transaction.
    pub gas_used: u64,
    /// Execution status of the stamping transaction.
    pub status: TxStatus,
}

/// Result of a history query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct History {
    /// Entries, newest first.
    pub entries: Vec<HistoryEntry>,
    /// First block scanned.
    pub from_block: u64,
    /// Last block scanned.
    pub to_block: u64,
    /// Whether the fallback window produced this result.
    pub narrowed: bool,
}

/// Read-only access to stamps on the ledger.
#[derive(Clone)]
pub struct ChainGateway {
    ledger: Arc<dyn Ledger>,
    config: HistoryConfig,
}

impl ChainGateway {
    /// Wrap a ledger.
    #[must_use]
    pub fn new(ledger: Arc<dyn Ledger>, config: HistoryConfig) -> Self {
        Self { ledger, config }
    }

    /// Underlying ledger.
    #[must_use]
    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    /// History tuning in effect.
    #[must_use]
    pub const fn config(&self) -> &HistoryConfig {
        &self.config
    }

    /// Look up the stamp for `fingerprint`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::GatewayUnavailable`] if the ledger cannot be reached.
    pub async fn exists(&self, fingerprint: &Fingerprint) -> Result<StampStatus> {
        debug!("Checking stamp for {}", fingerprint);
        self.ledger.read_stamp(fingerprint).await
    }

    /// Stamps created by `owner`, newest first.
    ///
    /// # Errors
    ///
    /// Returns the ledger error verbatim if the first attempt fails for a
    /// reason other than a timeout, and [`Error::HistoryUnavailable`] if the
    /// fallback attempt fails as well.
    pub async fn history(&self, owner: &Address, from_block: Option<u64>) -> Result<History> {
        let plan = RangePlan::for_request(from_block, &self.config);
        let mut last_failure = String::new();

        for (attempt, policy) in plan.policies().iter().enumerate() {
            let outcome =
                tokio::time::timeout(self.config.timeout, self.fetch(owner, &plan, *policy)).await;
            let err = match outcome {
                Ok(Ok(mut history)) => {
                    history.narrowed = attempt > 0;
                    info!(
                        "History for {}: {} entries in blocks {}..={}",
                        owner,
                        history.entries.len(),
                        history.from_block,
                        history.to_block
                    );
                    return Ok(history);
                }
                Ok(Err(e)) => e,
                Err(_) => Error::TransportTimeout(format!(
                    "history query exceeded {}s",
                    self.config.timeout.as_secs_f32()
                )),
            };

            if attempt == 0 && !matches!(err, Error::TransportTimeout(_)) {
                return Err(err);
            }
            warn!("History attempt {} for {} failed: {}", attempt + 1, owner, err);
            last_failure = err.to_string();
        }

        Err(Error::HistoryUnavailable(last_failure))
    }

    async fn fetch(&self, owner: &Address, plan: &RangePlan, policy: RangePolicy) -> Result<History> {
        let latest = self.ledger.latest_block().await?;
        let (from_block, to_block) = plan.range(policy, latest);
        debug!("Scanning FileStamped for {} over {}..={}", owner, from_block, to_block);

        let events = self.ledger.stamped_events(owner, from_block, to_block).await?;
        let mut entries = try_join_all(events.into_iter().map(|e| self.enrich(e))).await?;
        entries.sort_by(|a, b| {
            b.timestamp_ms
                .cmp(&a.timestamp_ms)
                .then(b.block_number.cmp(&a.block_number))
        });

        Ok(History {
            entries,
            from_block,
            to_block,
            narrowed: false,
        })
    }

    async fn enrich(&self, event: StampedEvent) -> Result<HistoryEntry> {
        let receipt = self.ledger.receipt(&event.tx_hash).await?.ok_or_else(|| {
            Error::GatewayUnavailable(format!("no receipt for logged transaction {}", event.tx_hash))
        })?;
        let date = i64::try_from(event.timestamp_secs)
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .unwrap_or_default();

        Ok(HistoryEntry {
            tx_hash: event.tx_hash,
            fingerprint: event.fingerprint,
            owner: event.owner,
            timestamp_ms: event.timestamp_secs.saturating_mul(1000),
            date,
            is_public: event.is_public,
            block_number: event.block_number,
            block_hash: receipt.block_hash,
            gas_used: receipt.gas_used,
            status: receipt.status,
        })
    }
}
