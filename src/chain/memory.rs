//! In-process ledger.
//!
//! Behaves like the stamp contract on an instant-mining dev chain: every
//! broadcast is mined into its own block, duplicate stamps revert, and the
//! usual `FileStamped` events and receipts are produced. Fault knobs let
//! tests simulate outages, transient broadcast failures and slow log
//! queries.

use super::tx::LegacyTx;
use super::{
    abi, BlockHash, Ledger, SignedStamp, StampStatus, StampedEvent, TransactionRecord, TxHash,
    TxStatus, H256,
};
use crate::address::{keccak256, Address};
use crate::digest::Fingerprint;
use crate::error::{Error, Result};
use crate::session::WalletSession;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Gas charged for a successful `stampFile`.
const STAMP_GAS: u64 = 71_384;

/// Gas charged for a reverted `stampFile`.
const REVERT_GAS: u64 = 24_020;

/// Gas price used when signing against the in-memory chain.
const GAS_PRICE: u128 = 1_000_000_000;

/// Default balance for accounts that were never funded explicitly.
const DEFAULT_BALANCE: u128 = 10_000 * 1_000_000_000_000_000_000;

#[derive(Debug, Clone, Copy)]
struct StampRecord {
    owner: Address,
    timestamp_secs: u64,
    is_public: bool,
}

#[derive(Debug, Default)]
struct State {
    block: u64,
    genesis_time: u64,
    stamps: HashMap<Fingerprint, StampRecord>,
    events: Vec<StampedEvent>,
    receipts: HashMap<TxHash, TransactionRecord>,
    balances: HashMap<Address, u128>,
    nonces: HashMap<Address, u64>,
}

#[derive(Debug, Default)]
struct Faults {
    unavailable: bool,
    broadcast_failures: u32,
    slow_logs: Option<(u64, Duration)>,
}

/// In-memory [`Ledger`].
pub struct MemoryLedger {
    contract: Address,
    chain_id: u64,
    state: Mutex<State>,
    faults: Mutex<Faults>,
}

impl MemoryLedger {
    /// Create an empty chain at block 0.
    #[must_use]
    pub fn new(chain_id: u64) -> Self {
        Self {
            contract: Address::from_bytes([0x5a; 20]),
            chain_id,
            state: Mutex::new(State {
                genesis_time: 1_700_000_000,
                ..State::default()
            }),
            faults: Mutex::new(Faults::default()),
        }
    }

    /// Jump the chain head to `block`.
    pub fn set_latest_block(&self, block: u64) {
        self.state.lock().block = block;
    }

    /// Override an account balance.
    pub fn set_balance(&self, address: Address, wei: u128) {
        self.state.lock().balances.insert(address, wei);
    }

    /// Make every call fail with [`Error::GatewayUnavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.lock().unavailable = unavailable;
    }

    /// Fail the next `count` broadcasts with a transport timeout.
    pub fn fail_next_broadcasts(&self, count: u32) {
        self.faults.lock().broadcast_failures = count;
    }

    /// Delay log queries spanning more than `max_span` blocks by `delay`.
    pub fn set_slow_logs(&self, max_span: u64, delay: Duration) {
        self.faults.lock().slow_logs = Some((max_span, delay));
    }

    /// Record a stamp directly, as if mined at `block` with `timestamp_secs`.
    ///
    /// Used to seed history with arbitrary timestamps.
    pub fn seed_stamp(
        &self,
        fingerprint: Fingerprint,
        owner: Address,
        timestamp_secs: u64,
        is_public: bool,
        block: u64,
    ) -> TxHash {
        let mut state = self.state.lock();
        let mut seed = fingerprint.as_bytes().to_vec();
        seed.extend_from_slice(&block.to_be_bytes());
        let tx_hash = H256::from_bytes(keccak256(&seed));
        state.stamps.insert(
            fingerprint,
            StampRecord {
                owner,
                timestamp_secs,
                is_public,
            },
        );
        state.block = state.block.max(block);
        Self::push_mined(
            &mut state,
            tx_hash,
            block,
            Some(StampedEvent {
                fingerprint,
                owner,
                timestamp_secs,
                is_public,
                block_number: block,
                block_hash: block_hash(block),
                tx_hash,
            }),
        );
        tx_hash
    }

    /// Number of stamps recorded.
    #[must_use]
    pub fn stamp_count(&self) -> usize {
        self.state.lock().stamps.len()
    }

    /// Contract address reported in signed transactions.
    #[must_use]
    pub const fn contract(&self) -> Address {
        self.contract
    }

    fn check_available(&self) -> Result<()> {
        if self.faults.lock().unavailable {
            Err(Error::GatewayUnavailable(
                "connection refused (in-memory ledger offline)".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    fn push_mined(state: &mut State, tx_hash: TxHash, block: u64, event: Option<StampedEvent>) {
        let status = if event.is_some() {
            TxStatus::Success
        } else {
            TxStatus::Failed
        };
        state.receipts.insert(
            tx_hash,
            TransactionRecord {
                tx_hash,
                block_number: block,
                block_hash: block_hash(block),
                gas_used: if event.is_some() { STAMP_GAS } else { REVERT_GAS },
                status,
            },
        );
        if let Some(event) = event {
            state.events.push(event);
        }
    }
}

fn block_hash(block: u64) -> BlockHash {
    H256::from_bytes(keccak256(&block.to_be_bytes()))
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn latest_block(&self) -> Result<u64> {
        self.check_available()?;
        Ok(self.state.lock().block)
    }

    async fn read_stamp(&self, fingerprint: &Fingerprint) -> Result<StampStatus> {
        self.check_available()?;
        Ok(self
            .state
            .lock()
            .stamps
            .get(fingerprint)
            .map_or_else(StampStatus::absent, |s| {
                StampStatus::found(s.owner, s.timestamp_secs, s.is_public)
            }))
    }

    async fn stamped_events(
        &self,
        owner: &Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<StampedEvent>> {
        self.check_available()?;
        let slow = self.faults.lock().slow_logs;
        if let Some((max_span, delay)) = slow {
            if to_block.saturating_sub(from_block) > max_span {
                debug!("Simulating slow log query over {} blocks", to_block - from_block);
                tokio::time::sleep(delay).await;
            }
        }
        Ok(self
            .state
            .lock()
            .events
            .iter()
            .filter(|e| e.owner == *owner && e.block_number >= from_block && e.block_number <= to_block)
            .cloned()
            .collect())
    }

    async fn receipt(&self, tx: &TxHash) -> Result<Option<TransactionRecord>> {
        self.check_available()?;
        Ok(self.state.lock().receipts.get(tx).copied())
    }

    async fn balance(&self, address: &Address) -> Result<u128> {
        self.check_available()?;
        Ok(self
            .state
            .lock()
            .balances
            .get(address)
            .copied()
            .unwrap_or(DEFAULT_BALANCE))
    }

    async fn estimate_stamp(
        &self,
        _from: &Address,
        fingerprint: &Fingerprint,
        _is_public: bool,
    ) -> Result<u64> {
        self.check_available()?;
        if self.state.lock().stamps.contains_key(fingerprint) {
            return Err(Error::Rejected(
                "execution reverted: File already stamped".to_string(),
            ));
        }
        Ok(STAMP_GAS)
    }

    async fn sign_stamp(
        &self,
        session: &WalletSession,
        fingerprint: &Fingerprint,
        is_public: bool,
        gas_limit: u64,
    ) -> Result<SignedStamp> {
        self.check_available()?;
        let from = session.address();
        let nonce = {
            let mut state = self.state.lock();
            let nonce = state.nonces.entry(from).or_insert(0);
            let current = *nonce;
            *nonce += 1;
            current
        };
        let tx = LegacyTx {
            nonce,
            gas_price: GAS_PRICE,
            gas_limit,
            to: self.contract,
            value: 0,
            data: abi::encode_stamp_file(fingerprint, is_public),
            chain_id: self.chain_id,
        };
        let signed = session.sign(&tx)?;
        Ok(SignedStamp {
            hash: signed.hash,
            raw: signed.raw,
            from,
            fingerprint: *fingerprint,
            is_public,
        })
    }

    async fn broadcast(&self, tx: &SignedStamp) -> Result<TxHash> {
        self.check_available()?;
        {
            let mut faults = self.faults.lock();
            if faults.broadcast_failures > 0 {
                faults.broadcast_failures -= 1;
                return Err(Error::TransportTimeout(
                    "eth_sendRawTransaction timed out".to_string(),
                ));
            }
        }

        let mut state = self.state.lock();
        if state.receipts.contains_key(&tx.hash) {
            return Ok(tx.hash);
        }
        state.block += 1;
        let block = state.block;
        let timestamp_secs = state.genesis_time + block * 2;

        let event = if state.stamps.contains_key(&tx.fingerprint) {
            debug!("stampFile({}) reverted: already stamped", tx.fingerprint);
            None
        } else {
            state.stamps.insert(
                tx.fingerprint,
                StampRecord {
                    owner: tx.from,
                    timestamp_secs,
                    is_public: tx.is_public,
                },
            );
            Some(StampedEvent {
                fingerprint: tx.fingerprint,
                owner: tx.from,
                timestamp_secs,
                is_public: tx.is_public,
                block_number: block,
                block_hash: block_hash(block),
                tx_hash: tx.hash,
            })
        };
        Self::push_mined(&mut state, tx.hash, block, event);
        Ok(tx.hash)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::digest::fingerprint;

    #[tokio::test]
    async fn test_broadcast_mines_and_stamps() {
        let ledger = MemoryLedger::new(31_337);
        let session = WalletSession::random(31_337);
        let fp = fingerprint(b"memo", None);

        let signed = ledger.sign_stamp(&session, &fp, true, 200_000).await.unwrap();
        let hash = ledger.broadcast(&signed).await.unwrap();
        assert_eq!(hash, signed.hash);

        let status = ledger.read_stamp(&fp).await.unwrap();
        assert!(status.exists);
        assert_eq!(status.owner, Some(session.address()));

        let receipt = ledger.receipt(&hash).await.unwrap().unwrap();
        assert!(receipt.succeeded());
        assert_eq!(receipt.block_number, 1);
    }

    #[tokio::test]
    async fn test_second_stamp_reverts() {
        let ledger = MemoryLedger::new(1);
        let session = WalletSession::random(1);
        let fp = fingerprint(b"dup", None);

        let first = ledger.sign_stamp(&session, &fp, true, 200_000).await.unwrap();
        ledger.broadcast(&first).await.unwrap();
        let second = ledger.sign_stamp(&session, &fp, true, 200_000).await.unwrap();
        let hash = ledger.broadcast(&second).await.unwrap();

        let receipt = ledger.receipt(&hash).await.unwrap().unwrap();
        assert_eq!(receipt.status, TxStatus::Failed);
        assert_eq!(ledger.stamp_count(), 1);
        assert!(ledger.estimate_stamp(&session.address(), &fp, true).await.is_err());
    }

    #[tokio::test]
    async fn test_rebroadcast_is_idempotent() {
        let ledger = MemoryLedger::new(1);
        let session = WalletSession::random(1);
        let fp = fingerprint(b"again", None);
        let signed = ledger.sign_stamp(&session, &fp, false, 200_000).await.unwrap();

        ledger.broadcast(&signed).await.unwrap();
        ledger.broadcast(&signed).await.unwrap();
        assert_eq!(ledger.latest_block().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unavailable() {
        let ledger = MemoryLedger::new(1);
        ledger.set_unavailable(true);
        assert!(matches!(
            ledger.latest_block().await,
            Err(Error::GatewayUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_events_filtered_by_owner_and_range() {
        let ledger = MemoryLedger::new(1);
        let alice = Address::from_bytes([1; 20]);
        let bob = Address::from_bytes([2; 20]);
        ledger.seed_stamp(fingerprint(b"a", None), alice, 100, true, 10);
        ledger.seed_stamp(fingerprint(b"b", None), bob, 200, true, 20);
        ledger.seed_stamp(fingerprint(b"c", None), alice, 300, false, 30);

        let all = ledger.stamped_events(&alice, 0, 30).await.unwrap();
        assert_eq!(all.len(), 2);
        let recent = ledger.stamped_events(&alice, 15, 30).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].timestamp_secs, 300);
    }
}
