//! # chainstamp
//!
//! File fingerprinting with on-chain proof of existence.
//!
//! A file (optionally salted with a PIN) is reduced to a SHA-256
//! [`Fingerprint`], which is anchored on an EVM chain by calling the stamp
//! contract's `stampFile`. Anyone holding the file can later prove when it
//! was stamped and by whom by recomputing the fingerprint and asking the
//! contract.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      StampService                        │
//! ├──────────────────────────────────────────────────────────┤
//! │  verify: digest ─▶ ChainGateway ─▶ Reconciler            │
//! │  stamp:  digest ─▶ WritePath ─▶ ChainGateway ─▶ Reconciler│
//! ├──────────────────────────────────────────────────────────┤
//! │  Ledger (JSON-RPC / memory)    SideStore (SQLite / memory)│
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! The chain is authoritative. The side-store only adds file names, sizes
//! and transaction ids, and its failure never invalidates a stamp.
//!
//! ## Example
//!
//! ```rust,no_run
//! use chainstamp::{StampConfig, StampServiceBuilder, VerifyRequest};
//!
//! #[tokio::main]
//! async fn main() -> chainstamp::Result<()> {
//!     let mut config = StampConfig::default();
//!     config.chain.contract_address = Some("0x5FbDB2315678afecb367f032d93F642f64180aa3".into());
//!     let service = StampServiceBuilder::new(config).build()?;
//!
//!     let answer = service
//!         .verify(VerifyRequest::from_bytes(std::fs::read("contract.pdf")?))
//!         .await?;
//!     println!("stamped: {}", answer.exists);
//!     Ok(())
//! }
//! ```

pub mod address;
pub mod api;
pub mod chain;
pub mod config;
pub mod digest;
pub mod error;
pub mod event;
pub mod reconcile;
pub mod service;
pub mod session;
pub mod store;
pub mod verify;
pub mod write;

pub use address::Address;
pub use chain::{ChainGateway, History, HistoryEntry, Ledger, StampStatus, TransactionRecord, TxHash};
pub use config::{Network, StampConfig};
pub use digest::{fingerprint, fingerprint_reader, Fingerprint};
pub use error::{Classification, Error, Result};
pub use event::{StampEvent, StampEventsChannel};
pub use reconcile::{RecordOutcome, Reconciler};
pub use service::{ConfirmRequest, StampReceipt, StampRequest, StampService, StampServiceBuilder};
pub use session::WalletSession;
pub use store::{SideMetadata, SideStore};
pub use verify::{Verification, VerifyRequest};
pub use write::{WriteConfig, WritePath};
