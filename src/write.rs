//! Write path: signing and submitting `stampFile` transactions.
//!
//! The sequence for one stamp is:
//!
//! 1. pre-flight `verifyFile` so an existing stamp fails before any gas is spent
//! 2. balance check
//! 3. gas estimation (a revert here is decoded into duplicate / rejected)
//! 4. sign once, broadcast with retries on transport failures
//! 5. poll for the receipt until the confirmation deadline

use crate::chain::{Ledger, SignedStamp, TransactionRecord, TxHash};
use crate::digest::Fingerprint;
use crate::error::{Error, Result};
use crate::session::WalletSession;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Gas limit used when the estimate is lower.
pub const DEFAULT_GAS_LIMIT: u64 = 200_000;

/// Write path tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteConfig {
    /// Floor for the gas limit.
    pub gas_limit: u64,
    /// Percentage added on top of the gas estimate.
    pub gas_headroom_percent: u64,
    /// Extra broadcast attempts after a transport failure.
    pub broadcast_retries: u32,
    /// Base delay between broadcast attempts.
    pub retry_backoff: Duration,
    /// Receipt polling interval.
    pub confirmation_poll: Duration,
    /// Give up waiting for a receipt after this long.
    pub confirmation_timeout: Duration,
    /// Check `verifyFile` before estimating.
    pub preflight_exists: bool,
}

impl Default for WriteConfig {
    fn default() -> Self {
        Self {
            gas_limit: DEFAULT_GAS_LIMIT,
            gas_headroom_percent: 20,
            broadcast_retries: 2,
            retry_backoff: Duration::from_millis(500),
            confirmation_poll: Duration::from_secs(2),
            confirmation_timeout: Duration::from_secs(300),
            preflight_exists: true,
        }
    }
}

/// Submits stamps through a [`Ledger`].
#[derive(Clone)]
pub struct WritePath {
    ledger: Arc<dyn Ledger>,
    config: WriteConfig,
}

impl WritePath {
    /// Create a write path over `ledger`.
    #[must_use]
    pub fn new(ledger: Arc<dyn Ledger>, config: WriteConfig) -> Self {
        Self { ledger, config }
    }

    /// Stamp `fingerprint` and wait for it to be mined.
    ///
    /// # Errors
    ///
    /// - [`Error::DuplicateStamp`] if the fingerprint is already stamped
    /// - [`Error::InsufficientFunds`] if the session account cannot pay gas
    /// - [`Error::Rejected`] if the contract reverts for another reason
    /// - [`Error::TransportTimeout`] / [`Error::GatewayUnavailable`] on transport failure
    pub async fn submit(
        &self,
        session: &WalletSession,
        fingerprint: &Fingerprint,
        is_public: bool,
    ) -> Result<TransactionRecord> {
        let tx_hash = self.send(session, fingerprint, is_public).await?;
        self.confirm(fingerprint, &tx_hash).await
    }

    /// Run the pre-flight checks, sign and broadcast. Returns once the
    /// ledger has accepted the transaction.
    ///
    /// # Errors
    ///
    /// See [`WritePath::submit`].
    pub async fn send(
        &self,
        session: &WalletSession,
        fingerprint: &Fingerprint,
        is_public: bool,
    ) -> Result<TxHash> {
        let from = session.address();

        if self.config.preflight_exists {
            match self.ledger.read_stamp(fingerprint).await {
                Ok(status) if status.exists => return Err(Error::duplicate(fingerprint)),
                Ok(_) => {}
                Err(e) => warn!("Pre-flight lookup for {} failed, continuing: {}", fingerprint, e),
            }
        }

        let balance = self.ledger.balance(&from).await?;
        if balance == 0 {
            return Err(Error::InsufficientFunds(format!(
                "{from} has no balance to pay for gas"
            )));
        }

        let estimate = match self.ledger.estimate_stamp(&from, fingerprint, is_public).await {
            Ok(gas) => gas,
            Err(Error::Rejected(reason)) if is_duplicate_reason(&reason) => {
                return Err(Error::duplicate(fingerprint));
            }
            Err(e) => return Err(e),
        };
        let gas_limit = self.gas_limit_for(estimate);
        debug!("Gas estimate {} for {}, using limit {}", estimate, fingerprint, gas_limit);

        let signed = self
            .ledger
            .sign_stamp(session, fingerprint, is_public, gas_limit)
            .await?;
        self.broadcast(&signed).await
    }

    /// Broadcast a signed stamp, retrying transport failures with the same
    /// raw bytes.
    ///
    /// # Errors
    ///
    /// Returns the last broadcast error once retries are exhausted, or
    /// immediately for non-transient errors.
    pub async fn broadcast(&self, signed: &SignedStamp) -> Result<TxHash> {
        let mut attempt = 0u32;
        loop {
            match self.ledger.broadcast(signed).await {
                Ok(hash) => {
                    info!("Broadcast stamp {} for {}", hash, signed.fingerprint);
                    return Ok(hash);
                }
                // The nonce is spent. Only ours if an earlier attempt was mined.
                Err(Error::Rejected(reason)) if attempt > 0 && reason.contains("nonce too low") => {
                    return self.claim_spent_nonce(signed, reason).await;
                }
                Err(e) if e.is_transient() && attempt < self.config.broadcast_retries => {
                    attempt += 1;
                    warn!(
                        "Broadcast of {} failed (attempt {}), retrying: {}",
                        signed.hash, attempt, e
                    );
                    tokio::time::sleep(self.config.retry_backoff * attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn claim_spent_nonce(&self, signed: &SignedStamp, reason: String) -> Result<TxHash> {
        if let Ok(Some(_)) = self.ledger.receipt(&signed.hash).await {
            debug!("Nonce consumed by earlier attempt of {}", signed.hash);
            return Ok(signed.hash);
        }
        match self.ledger.read_stamp(&signed.fingerprint).await {
            Ok(status) if status.exists && status.owner == Some(signed.from) => {
                debug!("Stamp {} already recorded for {}", signed.fingerprint, signed.from);
                Ok(signed.hash)
            }
            _ => Err(Error::Rejected(format!(
                "nonce of {} was used by another transaction: {reason}",
                signed.hash
            ))),
        }
    }

    /// Wait for `tx_hash` to be mined and check its outcome.
    ///
    /// # Errors
    ///
    /// [`Error::TransportTimeout`] if no receipt appears before the deadline,
    /// [`Error::DuplicateStamp`] or [`Error::Rejected`] if the transaction
    /// reverted.
    pub async fn confirm(
        &self,
        fingerprint: &Fingerprint,
        tx_hash: &TxHash,
    ) -> Result<TransactionRecord> {
        let record = self.wait_for_receipt(tx_hash).await?;
        if record.succeeded() {
            info!(
                "Stamp {} confirmed in block {} ({} gas)",
                fingerprint, record.block_number, record.gas_used
            );
            return Ok(record);
        }

        warn!("Stamp transaction {} reverted", tx_hash);
        match self.ledger.read_stamp(fingerprint).await {
            Ok(status) if status.exists => Err(Error::duplicate(fingerprint)),
            _ => Err(Error::Rejected(format!(
                "transaction {tx_hash} reverted in block {}",
                record.block_number
            ))),
        }
    }

    async fn wait_for_receipt(&self, tx_hash: &TxHash) -> Result<TransactionRecord> {
        let deadline = Instant::now() + self.config.confirmation_timeout;
        loop {
            match self.ledger.receipt(tx_hash).await {
                Ok(Some(record)) => return Ok(record),
                Ok(None) => debug!("Receipt for {} not yet available", tx_hash),
                Err(e) if e.is_transient() => debug!("Receipt poll for {} failed: {}", tx_hash, e),
                Err(e) => return Err(e),
            }
            if Instant::now() >= deadline {
                return Err(Error::TransportTimeout(format!(
                    "no receipt for {tx_hash} after {}s",
                    self.config.confirmation_timeout.as_secs()
                )));
            }
            tokio::time::sleep(self.config.confirmation_poll).await;
        }
    }

    fn gas_limit_for(&self, estimate: u64) -> u64 {
        let padded = estimate.saturating_mul(100 + self.config.gas_headroom_percent) / 100;
        padded.max(self.config.gas_limit)
    }
}

fn is_duplicate_reason(reason: &str) -> bool {
    reason.to_ascii_lowercase().contains("already stamped")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::chain::{MemoryLedger, TxStatus};
    use crate::digest::fingerprint;

    fn fast_config() -> WriteConfig {
        WriteConfig {
            retry_backoff: Duration::from_millis(1),
            confirmation_poll: Duration::from_millis(1),
            confirmation_timeout: Duration::from_millis(200),
            ..WriteConfig::default()
        }
    }

    fn setup() -> (Arc<MemoryLedger>, WritePath, WalletSession) {
        let ledger = Arc::new(MemoryLedger::new(31_337));
        let write = WritePath::new(Arc::clone(&ledger) as Arc<dyn Ledger>, fast_config());
        (ledger, write, WalletSession::random(31_337))
    }

    #[tokio::test]
    async fn test_submit_then_exists() {
        let (ledger, write, session) = setup();
        let fp = fingerprint(b"contract.pdf", None);

        let record = write.submit(&session, &fp, true).await.unwrap();
        assert_eq!(record.status, TxStatus::Success);

        let status = ledger.read_stamp(&fp).await.unwrap();
        assert_eq!(status.owner, Some(session.address()));
        assert_eq!(status.is_public, Some(true));
    }

    #[tokio::test]
    async fn test_second_submit_is_duplicate() {
        let (_ledger, write, session) = setup();
        let fp = fingerprint(b"twice", None);
        write.submit(&session, &fp, false).await.unwrap();

        let err = write.submit(&session, &fp, false).await.unwrap_err();
        assert!(matches!(err, Error::DuplicateStamp { .. }));
    }

    #[tokio::test]
    async fn test_estimate_revert_maps_to_duplicate() {
        let ledger = Arc::new(MemoryLedger::new(1));
        let write = WritePath::new(
            Arc::clone(&ledger) as Arc<dyn Ledger>,
            WriteConfig {
                preflight_exists: false,
                ..fast_config()
            },
        );
        let session = WalletSession::random(1);
        let fp = fingerprint(b"estimate", None);
        write.submit(&session, &fp, true).await.unwrap();

        let err = write.submit(&session, &fp, true).await.unwrap_err();
        assert!(matches!(err, Error::DuplicateStamp { .. }));
    }

    #[tokio::test]
    async fn test_zero_balance_rejected_before_signing() {
        let (ledger, write, session) = setup();
        ledger.set_balance(session.address(), 0);

        let err = write
            .submit(&session, &fingerprint(b"poor", None), true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InsufficientFunds(_)));
        assert_eq!(ledger.stamp_count(), 0);
    }

    #[tokio::test]
    async fn test_transient_broadcast_failures_are_retried() {
        let (ledger, write, session) = setup();
        ledger.fail_next_broadcasts(2);

        write
            .submit(&session, &fingerprint(b"flaky", None), true)
            .await
            .unwrap();
        assert_eq!(ledger.stamp_count(), 1);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let (ledger, write, session) = setup();
        ledger.fail_next_broadcasts(3);

        let err = write
            .submit(&session, &fingerprint(b"down", None), true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TransportTimeout(_)));
        assert_eq!(ledger.stamp_count(), 0);
    }

    #[tokio::test]
    async fn test_reverted_receipt_reports_duplicate() {
        let (ledger, write, session) = setup();
        let other = WalletSession::random(31_337);
        let fp = fingerprint(b"race", None);

        // Both parties sign before either is mined.
        let theirs = ledger.sign_stamp(&other, &fp, true, 200_000).await.unwrap();
        let ours = ledger.sign_stamp(&session, &fp, true, 200_000).await.unwrap();
        ledger.broadcast(&theirs).await.unwrap();

        let hash = write.broadcast(&ours).await.unwrap();
        let err = write.confirm(&fp, &hash).await.unwrap_err();
        assert!(matches!(err, Error::DuplicateStamp { .. }));
    }

    #[tokio::test]
    async fn test_unknown_receipt_times_out() {
        let (_ledger, write, _session) = setup();
        let err = write
            .confirm(&fingerprint(b"ghost", None), &TxHash::from_bytes([1; 32]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TransportTimeout(_)));
    }

    /// Ledger whose first broadcast times out and whose later broadcasts
    /// report the nonce as spent, optionally landing the first one.
    struct NonceClash {
        inner: Arc<MemoryLedger>,
        land_first: bool,
        calls: parking_lot::Mutex<u32>,
    }

    #[async_trait::async_trait]
    impl Ledger for NonceClash {
        async fn latest_block(&self) -> Result<u64> {
            self.inner.latest_block().await
        }

        async fn read_stamp(&self, fingerprint: &Fingerprint) -> Result<crate::chain::StampStatus> {
            self.inner.read_stamp(fingerprint).await
        }

        async fn stamped_events(
            &self,
            owner: &crate::address::Address,
            from_block: u64,
            to_block: u64,
        ) -> Result<Vec<crate::chain::StampedEvent>> {
            self.inner.stamped_events(owner, from_block, to_block).await
        }

        async fn receipt(&self, tx: &TxHash) -> Result<Option<TransactionRecord>> {
            self.inner.receipt(tx).await
        }

        async fn balance(&self, address: &crate::address::Address) -> Result<u128> {
            self.inner.balance(address).await
        }

        async fn estimate_stamp(
            &self,
            from: &crate::address::Address,
            fingerprint: &Fingerprint,
            is_public: bool,
        ) -> Result<u64> {
            self.inner.estimate_stamp(from, fingerprint, is_public).await
        }

        async fn sign_stamp(
            &self,
            session: &WalletSession,
            fingerprint: &Fingerprint,
            is_public: bool,
            gas_limit: u64,
        ) -> Result<SignedStamp> {
            self.inner
                .sign_stamp(session, fingerprint, is_public, gas_limit)
                .await
        }

        async fn broadcast(&self, tx: &SignedStamp) -> Result<TxHash> {
            let call = {
                let mut calls = self.calls.lock();
                *calls += 1;
                *calls
            };
            if call == 1 {
                if self.land_first {
                    self.inner.broadcast(tx).await?;
                }
                return Err(Error::TransportTimeout("connection reset".to_string()));
            }
            Err(Error::Rejected("nonce too low".to_string()))
        }
    }

    fn nonce_clash(land_first: bool) -> (Arc<MemoryLedger>, WritePath, WalletSession) {
        let inner = Arc::new(MemoryLedger::new(31_337));
        let ledger = NonceClash {
            inner: Arc::clone(&inner),
            land_first,
            calls: parking_lot::Mutex::new(0),
        };
        let write = WritePath::new(Arc::new(ledger), fast_config());
        (inner, write, WalletSession::random(31_337))
    }

    #[tokio::test]
    async fn test_spent_nonce_accepted_when_own_attempt_landed() {
        let (inner, write, session) = nonce_clash(true);
        let fp = fingerprint(b"landed", None);

        let record = write.submit(&session, &fp, true).await.unwrap();
        assert_eq!(record.status, TxStatus::Success);
        assert_eq!(inner.stamp_count(), 1);
    }

    #[tokio::test]
    async fn test_spent_nonce_rejected_when_taken_by_another_tx() {
        let (inner, write, session) = nonce_clash(false);
        let fp = fingerprint(b"stolen nonce", None);

        let err = write.send(&session, &fp, true).await.unwrap_err();
        assert!(matches!(err, Error::Rejected(ref m) if m.contains("another transaction")));
        assert_eq!(inner.stamp_count(), 0);
    }

    #[test]
    fn test_gas_limit_padding() {
        let write = WritePath::new(Arc::new(MemoryLedger::new(1)), WriteConfig::default());
        assert_eq!(write.gas_limit_for(50_000), 200_000);
        assert_eq!(write.gas_limit_for(500_000), 600_000);
    }

    #[test]
    fn test_duplicate_reason_is_case_insensitive() {
        assert!(is_duplicate_reason("execution reverted: File Already Stamped"));
        assert!(!is_duplicate_reason("execution reverted: paused"));
    }
}
