//! Stamp event system.
//!
//! Subscribers get a broadcast receiver; dropping it unsubscribes.

use crate::address::Address;
use crate::chain::TxHash;
use crate::digest::Fingerprint;
use tokio::sync::broadcast;

/// Events emitted by the stamp service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StampEvent {
    /// A stamp transaction was accepted by the ledger.
    Submitted {
        /// Fingerprint being stamped.
        fingerprint: Fingerprint,
        /// Transaction hash.
        tx_hash: TxHash,
    },

    /// A stamp is confirmed on chain.
    Confirmed {
        /// Stamped fingerprint.
        fingerprint: Fingerprint,
        /// Stamp owner.
        owner: Address,
        /// Including block.
        block_number: u64,
    },

    /// The stamp stands but its metadata could not be recorded.
    MetadataDegraded {
        /// Affected fingerprint.
        fingerprint: Fingerprint,
        /// Why recording failed.
        reason: String,
    },

    /// A history query fell back to the narrowed block window.
    HistoryNarrowed {
        /// Queried owner.
        owner: Address,
        /// First block of the narrowed window.
        from_block: u64,
    },
}

/// Channel for receiving stamp events.
pub type StampEventsChannel = broadcast::Receiver<StampEvent>;

/// Sender for stamp events.
pub type StampEventsSender = broadcast::Sender<StampEvent>;

/// Create a new event channel pair.
#[must_use]
pub fn create_event_channel() -> (StampEventsSender, StampEventsChannel) {
    broadcast::channel(256)
}
