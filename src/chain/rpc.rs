//! Ethereum JSON-RPC implementation of [`Ledger`].

use super::abi;
use super::tx::LegacyTx;
use super::{H256, Ledger, SignedStamp, StampStatus, StampedEvent, TransactionRecord, TxHash, TxStatus};
use crate::address::Address;
use crate::digest::Fingerprint;
use crate::error::{Error, Result};
use crate::session::WalletSession;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// JSON-RPC code some providers use for "request timed out / limit exceeded".
const RPC_LIMIT_EXCEEDED: i64 = -32002;

/// JSON-RPC code geth uses for execution reverts.
const RPC_EXECUTION_REVERTED: i64 = 3;

/// Resolved connection parameters for a ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainEndpoint {
    /// HTTP(S) JSON-RPC URL.
    pub rpc_url: String,
    /// Stamp contract address.
    pub contract: Address,
    /// EIP-155 chain id.
    pub chain_id: u64,
    /// Per-request HTTP timeout.
    pub request_timeout: Duration,
}

/// [`Ledger`] backed by an Ethereum JSON-RPC endpoint.
pub struct JsonRpcLedger {
    client: reqwest::Client,
    endpoint: ChainEndpoint,
    next_id: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcLog {
    topics: Vec<String>,
    data: String,
    block_number: Option<String>,
    block_hash: Option<String>,
    transaction_hash: Option<String>,
    #[serde(default)]
    removed: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: String,
    block_number: Option<String>,
    block_hash: Option<String>,
    gas_used: String,
    status: Option<String>,
}

impl JsonRpcLedger {
    /// Create a ledger client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::GatewayMisconfigured`] if the URL is empty or not
    /// HTTP(S), or [`Error::GatewayUnavailable`] if the HTTP client cannot
    /// be built.
    pub fn new(endpoint: ChainEndpoint) -> Result<Self> {
        let url = endpoint.rpc_url.trim();
        if url.is_empty() {
            return Err(Error::GatewayMisconfigured("RPC URL not configured".to_string()));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(Error::GatewayMisconfigured(format!(
                "RPC URL must be http(s): {url}"
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(endpoint.request_timeout)
            .build()
            .map_err(|e| Error::GatewayUnavailable(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint,
            next_id: AtomicU64::new(1),
        })
    }

    /// The endpoint this client talks to.
    #[must_use]
    pub fn endpoint(&self) -> &ChainEndpoint {
        &self.endpoint
    }

    async fn send(&self, method: &str, params: Value) -> Result<Option<Value>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        debug!("rpc {} #{}", method, id);

        let response = self
            .client
            .post(&self.endpoint.rpc_url)
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if status == reqwest::StatusCode::REQUEST_TIMEOUT
            || status == reqwest::StatusCode::GATEWAY_TIMEOUT
        {
            return Err(Error::TransportTimeout(format!("{method}: HTTP {status}")));
        }
        if !status.is_success() {
            return Err(Error::GatewayUnavailable(format!("{method}: HTTP {status}")));
        }

        let parsed: RpcResponse = response.json().await?;
        if let Some(err) = parsed.error {
            return Err(classify_rpc_error(method, &err));
        }
        Ok(parsed.result.filter(|v| !v.is_null()))
    }

    async fn request<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let value = self
            .send(method, params)
            .await?
            .ok_or_else(|| Error::GatewayUnavailable(format!("{method}: empty result")))?;
        Ok(serde_json::from_value(value)?)
    }

    /// Like [`Self::request`] but a `null` result is `None`.
    async fn request_opt<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<Option<T>> {
        self.send(method, params)
            .await?
            .map(serde_json::from_value)
            .transpose()
            .map_err(Error::from)
    }

    fn contract_hex(&self) -> String {
        format!("0x{}", hex::encode(self.endpoint.contract.as_bytes()))
    }

    async fn call(&self, data: &[u8]) -> Result<Vec<u8>> {
        let result: String = self
            .request(
                "eth_call",
                json!([{ "to": self.contract_hex(), "data": hex_data(data) }, "latest"]),
            )
            .await?;
        decode_hex_data(&result)
    }
}

#[async_trait]
impl Ledger for JsonRpcLedger {
    async fn latest_block(&self) -> Result<u64> {
        let result: String = self.request("eth_blockNumber", json!([])).await?;
        parse_quantity(&result).and_then(to_u64)
    }

    async fn read_stamp(&self, fingerprint: &Fingerprint) -> Result<StampStatus> {
        let data = self.call(&abi::encode_verify_file(fingerprint)).await?;
        abi::decode_verify_file(&data)
    }

    async fn stamped_events(
        &self,
        owner: &Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<StampedEvent>> {
        let filter = json!([{
            "address": self.contract_hex(),
            "topics": [
                hex_data(&abi::file_stamped_topic()),
                Value::Null,
                hex_data(&owner.to_word()),
            ],
            "fromBlock": quantity(u128::from(from_block)),
            "toBlock": quantity(u128::from(to_block)),
        }]);
        let logs: Vec<RpcLog> = self.request("eth_getLogs", filter).await?;
        debug!(
            "eth_getLogs returned {} logs for {} in [{}, {}]",
            logs.len(),
            owner,
            from_block,
            to_block
        );

        let mut events = Vec::with_capacity(logs.len());
        for log in logs.into_iter().filter(|l| !l.removed) {
            match decode_log(&log) {
                Ok(event) => events.push(event),
                Err(e) => warn!("Skipping undecodable FileStamped log: {e}"),
            }
        }
        Ok(events)
    }

    async fn receipt(&self, tx: &TxHash) -> Result<Option<TransactionRecord>> {
        let receipt: Option<RpcReceipt> = self
            .request_opt("eth_getTransactionReceipt", json!([tx.to_string()]))
            .await?;
        let Some(receipt) = receipt else {
            return Ok(None);
        };
        let (Some(block_number), Some(block_hash)) = (receipt.block_number, receipt.block_hash)
        else {
            return Ok(None);
        };
        let status = match receipt.status.as_deref().map(parse_quantity).transpose()? {
            Some(0) => TxStatus::Failed,
            _ => TxStatus::Success,
        };
        Ok(Some(TransactionRecord {
            tx_hash: receipt.transaction_hash.parse()?,
            block_number: parse_quantity(&block_number).and_then(to_u64)?,
            block_hash: block_hash.parse()?,
            gas_used: parse_quantity(&receipt.gas_used).and_then(to_u64)?,
            status,
        }))
    }

    async fn balance(&self, address: &Address) -> Result<u128> {
        let result: String = self
            .request("eth_getBalance", json!([address.to_checksum(), "latest"]))
            .await?;
        parse_quantity(&result)
    }

    async fn estimate_stamp(
        &self,
        from: &Address,
        fingerprint: &Fingerprint,
        is_public: bool,
    ) -> Result<u64> {
        let result: String = self
            .request(
                "eth_estimateGas",
                json!([{
                    "from": from.to_checksum(),
                    "to": self.contract_hex(),
                    "data": hex_data(&abi::encode_stamp_file(fingerprint, is_public)),
                }]),
            )
            .await?;
        parse_quantity(&result).and_then(to_u64)
    }

    async fn sign_stamp(
        &self,
        session: &WalletSession,
        fingerprint: &Fingerprint,
        is_public: bool,
        gas_limit: u64,
    ) -> Result<SignedStamp> {
        if session.chain_id() != self.endpoint.chain_id {
            return Err(Error::InvalidInput(format!(
                "session is for chain {} but the gateway is connected to chain {}",
                session.chain_id(),
                self.endpoint.chain_id
            )));
        }
        let from = session.address();
        let nonce: String = self
            .request("eth_getTransactionCount", json!([from.to_checksum(), "pending"]))
            .await?;
        let gas_price: String = self.request("eth_gasPrice", json!([])).await?;

        let tx = LegacyTx {
            nonce: parse_quantity(&nonce).and_then(to_u64)?,
            gas_price: parse_quantity(&gas_price)?,
            gas_limit,
            to: self.endpoint.contract,
            value: 0,
            data: abi::encode_stamp_file(fingerprint, is_public),
            chain_id: self.endpoint.chain_id,
        };
        let signed = session.sign(&tx)?;
        debug!(
            "Signed stampFile tx {} (nonce={}, gas_limit={})",
            signed.hash, tx.nonce, gas_limit
        );
        Ok(SignedStamp {
            hash: signed.hash,
            raw: signed.raw,
            from,
            fingerprint: *fingerprint,
            is_public,
        })
    }

    async fn broadcast(&self, tx: &SignedStamp) -> Result<TxHash> {
        match self
            .request::<String>("eth_sendRawTransaction", json!([hex_data(&tx.raw)]))
            .await
        {
            Ok(hash) => hash.parse(),
            Err(Error::Rejected(msg)) if is_already_known(&msg) => {
                debug!("Node already has tx {}: {}", tx.hash, msg);
                Ok(tx.hash)
            }
            Err(e) => Err(e),
        }
    }
}

fn decode_log(log: &RpcLog) -> Result<StampedEvent> {
    let topics = log
        .topics
        .iter()
        .map(|t| t.parse::<H256>().map(|h| *h.as_bytes()))
        .collect::<Result<Vec<_>>>()?;
    let data = decode_hex_data(&log.data)?;
    let decoded = abi::decode_file_stamped(&topics, &data)?;
    let missing = |field: &str| Error::GatewayUnavailable(format!("log missing {field}"));
    Ok(StampedEvent {
        fingerprint: decoded.fingerprint,
        owner: decoded.owner,
        timestamp_secs: decoded.timestamp_secs,
        is_public: decoded.is_public,
        block_number: parse_quantity(log.block_number.as_deref().ok_or_else(|| missing("blockNumber"))?)
            .and_then(to_u64)?,
        block_hash: log
            .block_hash
            .as_deref()
            .ok_or_else(|| missing("blockHash"))?
            .parse()?,
        tx_hash: log
            .transaction_hash
            .as_deref()
            .ok_or_else(|| missing("transactionHash"))?
            .parse()?,
    })
}

/// Map a JSON-RPC error object onto the crate's taxonomy.
fn classify_rpc_error(method: &str, err: &RpcError) -> Error {
    let lower = err.message.to_lowercase();
    let reason = err
        .data
        .as_ref()
        .and_then(Value::as_str)
        .and_then(|d| decode_hex_data(d).ok())
        .and_then(|d| abi::decode_revert_reason(&d));
    let detail = match &reason {
        Some(r) => format!("{}: {r}", err.message),
        None => err.message.clone(),
    };

    if err.code == RPC_LIMIT_EXCEEDED
        || lower.contains("timeout")
        || lower.contains("timed out")
        || lower.contains("query returned more than")
        || lower.contains("block range")
    {
        Error::TransportTimeout(format!("{method}: {detail}"))
    } else if lower.contains("insufficient funds") {
        Error::InsufficientFunds(detail)
    } else if err.code == RPC_EXECUTION_REVERTED
        || lower.contains("revert")
        || lower.contains("already known")
        || lower.contains("known transaction")
        || lower.contains("nonce too low")
        || lower.contains("underpriced")
    {
        Error::Rejected(detail)
    } else {
        Error::GatewayUnavailable(format!("{method}: rpc error {}: {detail}", err.code))
    }
}

fn is_already_known(msg: &str) -> bool {
    let lower = msg.to_lowercase();
    lower.contains("already known") || lower.contains("known transaction")
}

fn hex_data(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

fn decode_hex_data(s: &str) -> Result<Vec<u8>> {
    hex::decode(s.trim_start_matches("0x"))
        .map_err(|e| Error::GatewayUnavailable(format!("malformed hex from node: {e}")))
}

fn quantity(value: u128) -> String {
    format!("0x{value:x}")
}

/// Parse a JSON-RPC hex quantity such as `0x1a`.
fn parse_quantity(s: &str) -> Result<u128> {
    let clean = s.trim_start_matches("0x");
    if clean.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(clean, 16)
        .map_err(|e| Error::GatewayUnavailable(format!("malformed quantity {s}: {e}")))
}

fn to_u64(value: u128) -> Result<u64> {
    u64::try_from(value)
        .map_err(|_| Error::GatewayUnavailable(format!("quantity {value} exceeds 64 bits")))
}
