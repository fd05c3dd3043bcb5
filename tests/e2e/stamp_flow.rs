//! Stamp, verify and history flows through [`StampService`].

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::harness::{fast_config, StoreMode, TestHarness};
use chainstamp::chain::NARROW_WINDOW;
use chainstamp::{
    fingerprint, Address, Classification, ConfirmRequest, Error, StampEvent, StampRequest,
    VerifyRequest,
};
use std::time::Duration;

fn request(bytes: &'static [u8], pin: Option<&str>) -> StampRequest {
    StampRequest {
        bytes: bytes.into(),
        file_name: "contract.pdf".to_string(),
        pin: pin.map(str::to_string),
        is_public: true,
    }
}

#[tokio::test]
async fn test_stamp_then_verify_round_trip() {
    let h = TestHarness::setup().unwrap();

    let receipt = h
        .service
        .stamp(&h.wallet, request(b"signed agreement", None))
        .await
        .unwrap();
    assert_eq!(receipt.fingerprint, fingerprint(b"signed agreement", None));
    assert_eq!(receipt.owner, h.wallet.address());
    assert!(receipt.block_number.is_some());
    assert!(receipt.warning.is_none());

    let answer = h
        .service
        .verify(VerifyRequest::from_bytes(&b"signed agreement"[..]))
        .await
        .unwrap();
    assert!(answer.exists);
    assert_eq!(answer.owner, Some(h.wallet.address()));
    assert_eq!(answer.is_public, Some(true));
    assert_eq!(answer.file_name.as_deref(), Some("contract.pdf"));
    assert_eq!(answer.tx_id, Some(receipt.tx_hash));

    let rows = h.service.stamps(&h.wallet.address()).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].file_size, b"signed agreement".len() as u64);
}

#[tokio::test]
async fn test_unstamped_file_is_not_found() {
    let h = TestHarness::setup().unwrap();
    let answer = h
        .service
        .verify(VerifyRequest::from_bytes(&b"never stamped"[..]))
        .await
        .unwrap();
    assert!(!answer.exists);
    assert!(answer.owner.is_none());
    assert!(answer.tx_id.is_none());
}

#[tokio::test]
async fn test_second_stamp_is_duplicate() {
    let h = TestHarness::setup().unwrap();
    h.service
        .stamp(&h.wallet, request(b"once", None))
        .await
        .unwrap();

    let err = h
        .service
        .stamp(&h.wallet, request(b"once", None))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DuplicateStamp { .. }));
    assert_eq!(err.classification(), Classification::AlreadyStamped);
    assert_eq!(h.ledger.stamp_count(), 1);
}

#[tokio::test]
async fn test_pin_changes_fingerprint() {
    let h = TestHarness::setup().unwrap();
    h.service
        .stamp(&h.wallet, request(b"salted", Some("4821")))
        .await
        .unwrap();

    let without = h
        .service
        .verify(VerifyRequest::from_bytes(&b"salted"[..]))
        .await
        .unwrap();
    assert!(!without.exists);

    let with = h
        .service
        .verify(VerifyRequest::from_bytes(&b"salted"[..]).with_pin(Some("4821".to_string())))
        .await
        .unwrap();
    assert!(with.exists);
}

#[tokio::test]
async fn test_short_pin_rejected_before_any_write() {
    let h = TestHarness::setup().unwrap();
    let err = h
        .service
        .stamp(&h.wallet, request(b"salted", Some("12")))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    assert_eq!(h.ledger.stamp_count(), 0);
}

#[tokio::test]
async fn test_failing_side_store_degrades_but_stamp_stands() {
    let h = TestHarness::setup_with(StoreMode::Failing, fast_config()).unwrap();
    let mut events = h.service.subscribe();

    let receipt = h
        .service
        .stamp(&h.wallet, request(b"degraded", None))
        .await
        .unwrap();
    assert!(receipt.warning.is_some());
    assert_eq!(h.ledger.stamp_count(), 1);

    assert!(matches!(events.recv().await.unwrap(), StampEvent::Submitted { .. }));
    assert!(matches!(events.recv().await.unwrap(), StampEvent::Confirmed { .. }));
    assert!(matches!(
        events.recv().await.unwrap(),
        StampEvent::MetadataDegraded { .. }
    ));

    let answer = h
        .service
        .verify(VerifyRequest::from_bytes(&b"degraded"[..]))
        .await
        .unwrap();
    assert!(answer.exists);
    assert!(answer.tx_id.is_none());
}

#[tokio::test]
async fn test_stamp_without_side_store() {
    let h = TestHarness::setup_with(StoreMode::Disabled, fast_config()).unwrap();
    assert!(!h.service.has_side_store());

    let receipt = h
        .service
        .stamp(&h.wallet, request(b"chain only", None))
        .await
        .unwrap();
    assert!(receipt.warning.is_none());
    assert!(h
        .service
        .stamps(&h.wallet.address())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_transient_broadcast_failures_are_retried() {
    let h = TestHarness::setup().unwrap();
    h.ledger.fail_next_broadcasts(2);

    h.service
        .stamp(&h.wallet, request(b"flaky network", None))
        .await
        .unwrap();
    assert_eq!(h.ledger.stamp_count(), 1);
}

#[tokio::test]
async fn test_confirm_takes_owner_from_chain() {
    let h = TestHarness::setup().unwrap();
    let chain_owner = Address::from_bytes([0x11; 20]);
    let fp = fingerprint(b"wallet signed", None);
    let tx_hash = h.ledger.seed_stamp(fp, chain_owner, 1_700_000_500, false, 42);

    let confirm = || ConfirmRequest {
        bytes: (&b"wallet signed"[..]).into(),
        file_name: "deed.pdf".to_string(),
        claimed_owner: Address::from_bytes([0x22; 20]),
        tx_hash,
        fingerprint: None,
    };

    let receipt = h.service.confirm(confirm()).await.unwrap();
    assert_eq!(receipt.owner, chain_owner);
    assert!(!receipt.is_public);
    assert_eq!(receipt.timestamp.timestamp(), 1_700_000_500);
    assert_eq!(h.store.as_ref().unwrap().len(), 1);

    let err = h.service.confirm(confirm()).await.unwrap_err();
    assert!(matches!(err, Error::DuplicateStamp { .. }));
}

#[tokio::test]
async fn test_confirm_before_mining_is_invalid() {
    let h = TestHarness::setup().unwrap();
    let err = h
        .service
        .confirm(ConfirmRequest {
            bytes: (&b"pending"[..]).into(),
            file_name: "pending.txt".to_string(),
            claimed_owner: h.wallet.address(),
            tx_hash: "0x1111111111111111111111111111111111111111111111111111111111111111"
                .parse()
                .unwrap(),
            fingerprint: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[tokio::test]
async fn test_history_newest_first() {
    let h = TestHarness::setup().unwrap();
    let owner = Address::from_bytes([0x33; 20]);
    h.ledger.seed_stamp(fingerprint(b"a", None), owner, 100, true, 10);
    h.ledger.seed_stamp(fingerprint(b"b", None), owner, 300, true, 20);
    h.ledger.seed_stamp(fingerprint(b"c", None), owner, 200, false, 30);
    h.ledger
        .seed_stamp(fingerprint(b"other", None), Address::from_bytes([0x44; 20]), 400, true, 40);

    let history = h.service.history(&owner, None).await.unwrap();
    let times: Vec<u64> = history.entries.iter().map(|e| e.timestamp_ms).collect();
    assert_eq!(times, vec![300_000, 200_000, 100_000]);
    assert!(!history.narrowed);
    assert!(history.entries.iter().all(|e| e.owner == owner));
}

#[tokio::test]
async fn test_history_narrows_when_full_range_is_slow() {
    let mut config = fast_config();
    config.chain.history_timeout_secs = 1;
    let h = TestHarness::setup_with(StoreMode::Memory, config).unwrap();
    let owner = Address::from_bytes([0x55; 20]);
    h.ledger.set_latest_block(5_000_000);
    h.ledger
        .seed_stamp(fingerprint(b"recent", None), owner, 1_000, true, 4_950_000);
    h.ledger.set_slow_logs(NARROW_WINDOW, Duration::from_secs(3));
    let mut events = h.service.subscribe();

    let history = h.service.history(&owner, None).await.unwrap();
    assert!(history.narrowed);
    assert_eq!(history.from_block, 5_000_000 - NARROW_WINDOW);
    assert_eq!(history.entries.len(), 1);
    assert_eq!(
        events.recv().await.unwrap(),
        StampEvent::HistoryNarrowed {
            owner,
            from_block: 5_000_000 - NARROW_WINDOW,
        }
    );
}

#[tokio::test]
async fn test_ledger_outage_is_unavailable() {
    let h = TestHarness::setup().unwrap();
    h.ledger.set_unavailable(true);
    let err = h
        .service
        .verify(VerifyRequest::from_bytes(&b"anything"[..]))
        .await
        .unwrap_err();
    assert_eq!(err.classification(), Classification::Unavailable);
}

#[test]
fn test_empty_file_fingerprint() {
    assert_eq!(
        fingerprint(b"", None).to_hex(),
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    );
}
