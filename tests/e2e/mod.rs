//! End-to-end tests for chainstamp.
//!
//! Most tests run against the in-memory ledger and side-store through the
//! public service and HTTP surfaces. Tests that need a real JSON-RPC node
//! are `#[ignore]`d; run them with `cargo test --test e2e -- --ignored`
//! against a local Anvil with the stamp contract deployed.

mod anvil;
mod api;
mod harness;
mod stamp_flow;
