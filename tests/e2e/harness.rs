//! Test harness wiring a [`StampService`] to an in-memory ledger.
//!
//! The harness owns the ledger and side-store handles so tests can inject
//! faults and inspect state behind the service's back.

use async_trait::async_trait;
use chainstamp::chain::MemoryLedger;
use chainstamp::store::{InsertResult, MemoryStore};
use chainstamp::{
    Address, Error, Fingerprint, SideMetadata, SideStore, StampConfig, StampService,
    StampServiceBuilder, WalletSession,
};
use std::sync::Arc;
use tracing::info;

/// Chain id used by every harness ledger.
pub const TEST_CHAIN_ID: u64 = 31_337;

/// Error type for test harness operations.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// Service construction failed.
    #[error("Service setup failed: {0}")]
    Setup(#[from] Error),
}

/// Result type for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;

/// Which side-store the harness should attach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// No side-store.
    Disabled,
    /// A healthy in-memory store.
    Memory,
    /// A store whose every call fails.
    Failing,
}

/// Service plus the handles behind it.
pub struct TestHarness {
    /// The service under test.
    pub service: StampService,
    /// The ledger the service talks to.
    pub ledger: Arc<MemoryLedger>,
    /// The in-memory store, when [`StoreMode::Memory`].
    pub store: Option<Arc<MemoryStore>>,
    /// A funded signer.
    pub wallet: WalletSession,
}

impl TestHarness {
    /// Harness with a healthy in-memory side-store.
    ///
    /// # Errors
    ///
    /// Returns an error if the service cannot be built.
    pub fn setup() -> Result<Self> {
        Self::setup_with(StoreMode::Memory, fast_config())
    }

    /// Harness with the given store mode and configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the service cannot be built.
    pub fn setup_with(mode: StoreMode, config: StampConfig) -> Result<Self> {
        let ledger = Arc::new(MemoryLedger::new(TEST_CHAIN_ID));
        let store = (mode == StoreMode::Memory).then(|| Arc::new(MemoryStore::new()));
        let side_store: Option<Arc<dyn SideStore>> = match mode {
            StoreMode::Disabled => None,
            StoreMode::Memory => store.clone().map(|s| s as Arc<dyn SideStore>),
            StoreMode::Failing => Some(Arc::new(FailingStore)),
        };

        let service = StampServiceBuilder::new(config)
            .with_ledger(ledger.clone())
            .with_side_store(side_store)
            .build()?;
        let wallet = WalletSession::random(TEST_CHAIN_ID);
        info!("Harness ready, signer {}", wallet.address());

        Ok(Self {
            service,
            ledger,
            store,
            wallet,
        })
    }
}

/// Configuration with short polling and backoff intervals.
#[must_use]
pub fn fast_config() -> StampConfig {
    let mut config = StampConfig::default();
    config.chain.retry_backoff_ms = 10;
    config.chain.confirmation_poll_ms = 10;
    config.chain.confirmation_timeout_secs = 5;
    config
}

/// Side-store that fails every call.
pub struct FailingStore;

#[async_trait]
impl SideStore for FailingStore {
    async fn insert(&self, _metadata: &SideMetadata) -> chainstamp::Result<InsertResult> {
        Err(Error::SideStore("database is locked".to_string()))
    }

    async fn get(&self, _fingerprint: &Fingerprint) -> chainstamp::Result<Option<SideMetadata>> {
        Err(Error::SideStore("database is locked".to_string()))
    }

    async fn list_by_owner(&self, _owner: &Address) -> chainstamp::Result<Vec<SideMetadata>> {
        Err(Error::SideStore("database is locked".to_string()))
    }
}
