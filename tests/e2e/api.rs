//! HTTP API tests driven through the router with `tower::ServiceExt::oneshot`.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::harness::{fast_config, StoreMode, TestHarness, TEST_CHAIN_ID};
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chainstamp::api::{router, ApiState};
use chainstamp::{fingerprint, Address, WalletSession};
use serde_json::Value;
use tower::ServiceExt;

const BOUNDARY: &str = "chainstamp-test-boundary";

/// Multipart body with an optional file part and text fields.
fn multipart(file: Option<(&str, &[u8])>, fields: &[(&str, &str)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some((file_name, data)) = file {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn post(uri: &str, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn app(h: &TestHarness, signer: Option<WalletSession>) -> Router {
    router(ApiState::new(h.service.clone(), signer), 1024 * 1024)
}

#[tokio::test]
async fn test_health_reports_capabilities() {
    let h = TestHarness::setup().unwrap();
    let (status, body) = send(&app(&h, None), get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sideStore"], true);
    assert_eq!(body["serverSigning"], false);
}

#[tokio::test]
async fn test_server_stamp_then_verify() {
    let h = TestHarness::setup().unwrap();
    let signer = WalletSession::random(TEST_CHAIN_ID);
    let owner = signer.address();
    let app = app(&h, Some(signer));

    let (status, body) = send(
        &app,
        post(
            "/api/stamp",
            multipart(Some(("report.txt", &b"quarterly report"[..])), &[("isPublic", "false")]),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    assert_eq!(
        body["fileHash"],
        fingerprint(b"quarterly report", None).to_string()
    );
    assert_eq!(body["ownerAddress"], owner.to_string());
    assert_eq!(body["isPublic"], false);
    assert_eq!(body["fileName"], "report.txt");

    let (status, body) = send(
        &app,
        post("/api/verify", multipart(Some(("copy.txt", &b"quarterly report"[..])), &[])),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["exists"], true);
    assert_eq!(body["fileName"], "report.txt");
    assert_eq!(body["ownerAddress"], owner.to_string());
}

#[tokio::test]
async fn test_duplicate_stamp_is_conflict() {
    let h = TestHarness::setup().unwrap();
    let app = app(&h, Some(WalletSession::random(TEST_CHAIN_ID)));
    let upload = || post("/api/stamp", multipart(Some(("a.txt", &b"same bytes"[..])), &[]));

    let (status, _) = send(&app, upload()).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, body) = send(&app, upload()).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["classification"], "AlreadyStamped");
}

#[tokio::test]
async fn test_verify_unknown_file() {
    let h = TestHarness::setup().unwrap();
    let (status, body) = send(
        &app(&h, None),
        post("/api/verify", multipart(Some(("x.bin", &b"\x00\x01"[..])), &[])),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["exists"], false);
    assert_eq!(body["message"], "File not found on blockchain");
}

#[tokio::test]
async fn test_missing_file_is_bad_request() {
    let h = TestHarness::setup().unwrap();
    let (status, body) = send(
        &app(&h, None),
        post("/api/verify", multipart(None, &[("pin", "1234")])),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["classification"], "InvalidInput");
}

#[tokio::test]
async fn test_verify_by_file_hash_alone() {
    let h = TestHarness::setup().unwrap();
    let owner = Address::from_bytes([0x12; 20]);
    let fp = fingerprint(b"hashed elsewhere", None);
    h.ledger.seed_stamp(fp, owner, 1_700_000_100, true, 5);
    let fp_field = fp.to_prefixed_hex();

    let (status, body) = send(
        &app(&h, None),
        post("/api/verify", multipart(None, &[("fileHash", fp_field.as_str())])),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["exists"], true);
    assert_eq!(body["ownerAddress"], owner.to_string());
}

#[tokio::test]
async fn test_stamp_without_signer_or_tx_hash() {
    let h = TestHarness::setup().unwrap();
    let (status, _) = send(
        &app(&h, None),
        post("/api/stamp", multipart(Some(("a.txt", &b"unsigned"[..])), &[])),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(h.ledger.stamp_count(), 0);
}

#[tokio::test]
async fn test_wallet_signed_stamp_is_confirmed() {
    let h = TestHarness::setup().unwrap();
    let owner = Address::from_bytes([0x77; 20]);
    let fp = fingerprint(b"wallet flow", None);
    let tx_hash = h.ledger.seed_stamp(fp, owner, 1_700_000_900, true, 7);
    let tx_field = tx_hash.to_string();
    let owner_field = owner.to_string();

    let (status, body) = send(
        &app(&h, None),
        post(
            "/api/stamp",
            multipart(
                Some(("w.txt", &b"wallet flow"[..])),
                &[
                    ("txHash", tx_field.as_str()),
                    ("ownerAddress", owner_field.as_str()),
                ],
            ),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["txHash"], tx_hash.to_string());
    assert_eq!(h.store.as_ref().unwrap().len(), 1);
}

#[tokio::test]
async fn test_history_and_stamps_listing() {
    let h = TestHarness::setup().unwrap();
    let owner = Address::from_bytes([0x66; 20]);
    h.ledger.seed_stamp(fingerprint(b"one", None), owner, 10, true, 3);
    h.ledger.seed_stamp(fingerprint(b"two", None), owner, 20, true, 4);
    let app = app(&h, None);

    let (status, body) = send(&app, get(&format!("/api/history/{owner}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);
    assert_eq!(body["transactions"][0]["timestampMs"], 20_000);

    let (status, body) = send(&app, get(&format!("/api/stamps/{owner}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 0);
}

#[tokio::test]
async fn test_bad_address_is_bad_request() {
    let h = TestHarness::setup().unwrap();
    let (status, body) = send(&app(&h, None), get("/api/history/not-an-address")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("Invalid address"));
}

#[tokio::test]
async fn test_side_store_failure_on_listing_is_unavailable() {
    let h = TestHarness::setup_with(StoreMode::Failing, fast_config()).unwrap();
    let owner = Address::from_bytes([0x10; 20]);
    let (status, _) = send(&app(&h, None), get(&format!("/api/stamps/{owner}"))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}
