//! Tests against a real JSON-RPC node.
//!
//! Start Anvil, deploy the stamp contract, then run:
//!
//! ```text
//! CHAINSTAMP_E2E_CONTRACT=0x... cargo test --test e2e -- --ignored
//! ```
//!
//! `CHAINSTAMP_E2E_RPC` overrides the default `http://127.0.0.1:8545`.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::harness::{fast_config, TEST_CHAIN_ID};
use chainstamp::config::{Network, SideStoreBackend};
use chainstamp::{Error, StampRequest, StampService, StampServiceBuilder, VerifyRequest, WalletSession};
use rand::RngCore;

/// First pre-funded Anvil account.
const ANVIL_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

fn anvil_service() -> StampService {
    let contract = std::env::var("CHAINSTAMP_E2E_CONTRACT")
        .expect("CHAINSTAMP_E2E_CONTRACT must name the deployed stamp contract");
    let rpc = std::env::var("CHAINSTAMP_E2E_RPC")
        .unwrap_or_else(|_| "http://127.0.0.1:8545".to_string());

    let mut config = fast_config();
    config.chain.network = Network::Anvil;
    config.chain.rpc_url = Some(rpc);
    config.chain.contract_address = Some(contract);
    config.chain.chain_id = Some(TEST_CHAIN_ID);
    config.side_store.backend = SideStoreBackend::Memory;
    StampServiceBuilder::new(config).build().unwrap()
}

fn random_file() -> Vec<u8> {
    let mut bytes = vec![0u8; 256];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

#[tokio::test]
#[ignore = "Requires Anvil with the stamp contract deployed - run with --ignored"]
async fn test_anvil_stamp_verify_history() {
    let service = anvil_service();
    let wallet = WalletSession::from_hex(ANVIL_KEY, TEST_CHAIN_ID).unwrap();
    let bytes = random_file();

    let receipt = service
        .stamp(
            &wallet,
            StampRequest {
                bytes: bytes.clone().into(),
                file_name: "anvil.bin".to_string(),
                pin: None,
                is_public: true,
            },
        )
        .await
        .unwrap();
    assert_eq!(receipt.owner, wallet.address());
    assert!(receipt.gas_used.unwrap() > 0);

    let answer = service
        .verify(VerifyRequest::from_bytes(bytes.clone()))
        .await
        .unwrap();
    assert!(answer.exists);
    assert_eq!(answer.owner, Some(wallet.address()));

    let history = service.history(&wallet.address(), None).await.unwrap();
    assert!(history
        .entries
        .iter()
        .any(|e| e.fingerprint == receipt.fingerprint && e.tx_hash == receipt.tx_hash));

    let err = service
        .stamp(
            &wallet,
            StampRequest {
                bytes: bytes.into(),
                file_name: "anvil.bin".to_string(),
                pin: None,
                is_public: true,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DuplicateStamp { .. }));
}

#[tokio::test]
#[ignore = "Requires Anvil with the stamp contract deployed - run with --ignored"]
async fn test_anvil_unfunded_account() {
    let service = anvil_service();
    let wallet = WalletSession::random(TEST_CHAIN_ID);

    let err = service
        .stamp(
            &wallet,
            StampRequest {
                bytes: random_file().into(),
                file_name: "broke.bin".to_string(),
                pin: None,
                is_public: true,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InsufficientFunds(_)));
}
