//! Solidity ABI encoding for the stamp contract.
//!
//! Only the handful of shapes the contract uses are supported: `bytes32`,
//! `bool`, `address` and `uint256` as static 32-byte words.

use super::StampStatus;
use crate::address::{keccak256, Address};
use crate::digest::Fingerprint;
use crate::error::{Error, Result};

/// `stampFile(bytes32 fileHash, bool isPublic)`.
pub const STAMP_FILE: &str = "stampFile(bytes32,bool)";

/// `verifyFile(bytes32) returns (bool exists, address owner, uint256 timestamp, bool isPublic)`.
pub const VERIFY_FILE: &str = "verifyFile(bytes32)";

/// `event FileStamped(bytes32 indexed fileHash, address indexed owner, uint256 timestamp, bool isPublic)`.
pub const FILE_STAMPED: &str = "FileStamped(bytes32,address,uint256,bool)";

/// Selector of the standard `Error(string)` revert payload.
const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

const WORD: usize = 32;

/// First four bytes of the Keccak-256 of a function signature.
#[must_use]
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Topic 0 of `FileStamped` logs.
#[must_use]
pub fn file_stamped_topic() -> [u8; 32] {
    keccak256(FILE_STAMPED.as_bytes())
}

/// Calldata for `stampFile`.
#[must_use]
pub fn encode_stamp_file(fingerprint: &Fingerprint, is_public: bool) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + 2 * WORD);
    data.extend_from_slice(&selector(STAMP_FILE));
    data.extend_from_slice(fingerprint.as_bytes());
    data.extend_from_slice(&bool_word(is_public));
    data
}

/// Calldata for `verifyFile`.
#[must_use]
pub fn encode_verify_file(fingerprint: &Fingerprint) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + WORD);
    data.extend_from_slice(&selector(VERIFY_FILE));
    data.extend_from_slice(fingerprint.as_bytes());
    data
}

/// Decode the four-word `verifyFile` return value.
///
/// # Errors
///
/// Returns [`Error::GatewayUnavailable`] if the payload is short or a word
/// is out of range. An empty payload usually means the contract address
/// has no code.
pub fn decode_verify_file(data: &[u8]) -> Result<StampStatus> {
    if data.len() < 4 * WORD {
        return Err(Error::GatewayUnavailable(format!(
            "verifyFile returned {} bytes, expected {}; is the contract deployed at the configured address?",
            data.len(),
            4 * WORD
        )));
    }
    let exists = word_to_bool(word(data, 0)?)?;
    if !exists {
        return Ok(StampStatus::absent());
    }
    let owner = Address::from_word(word(data, 1)?);
    let timestamp = word_to_u64(word(data, 2)?)?;
    let is_public = word_to_bool(word(data, 3)?)?;
    Ok(StampStatus::found(owner, timestamp, is_public))
}

/// Decoded non-indexed and indexed fields of a `FileStamped` log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStampedLog {
    /// Indexed `fileHash`.
    pub fingerprint: Fingerprint,
    /// Indexed `owner`.
    pub owner: Address,
    /// `timestamp` in seconds.
    pub timestamp_secs: u64,
    /// `isPublic`.
    pub is_public: bool,
}

/// Decode a `FileStamped` log from its topics and data.
///
/// # Errors
///
/// Returns [`Error::GatewayUnavailable`] for logs that do not match the
/// event's shape.
pub fn decode_file_stamped(topics: &[[u8; 32]], data: &[u8]) -> Result<FileStampedLog> {
    if topics.len() != 3 || topics[0] != file_stamped_topic() {
        return Err(Error::GatewayUnavailable(
            "log is not a FileStamped event".to_string(),
        ));
    }
    if data.len() < 2 * WORD {
        return Err(Error::GatewayUnavailable(format!(
            "FileStamped data is {} bytes, expected {}",
            data.len(),
            2 * WORD
        )));
    }
    Ok(FileStampedLog {
        fingerprint: Fingerprint::from_bytes(topics[1]),
        owner: Address::from_word(&topics[2]),
        timestamp_secs: word_to_u64(word(data, 0)?)?,
        is_public: word_to_bool(word(data, 1)?)?,
    })
}

/// Extract the message from an `Error(string)` revert payload.
#[must_use]
pub fn decode_revert_reason(data: &[u8]) -> Option<String> {
    let body = data.strip_prefix(&ERROR_STRING_SELECTOR)?;
    let offset = usize::try_from(word_to_u64(word(body, 0).ok()?).ok()?).ok()?;
    let start = offset.checked_add(WORD)?;
    let len_word: &[u8; 32] = body.get(offset..start)?.try_into().ok()?;
    let len = usize::try_from(word_to_u64(len_word).ok()?).ok()?;
    let bytes = body.get(start..start.checked_add(len)?)?;
    String::from_utf8(bytes.to_vec()).ok()
}

fn word(data: &[u8], index: usize) -> Result<&[u8; 32]> {
    data.get(index * WORD..(index + 1) * WORD)
        .and_then(|w| w.try_into().ok())
        .ok_or_else(|| Error::GatewayUnavailable(format!("ABI word {index} missing")))
}

fn bool_word(value: bool) -> [u8; 32] {
    let mut w = [0u8; 32];
    w[31] = u8::from(value);
    w
}

fn word_to_bool(w: &[u8; 32]) -> Result<bool> {
    match word_to_u64(w)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(Error::GatewayUnavailable(format!(
            "ABI bool out of range: {other}"
        ))),
    }
}

fn word_to_u64(w: &[u8; 32]) -> Result<u64> {
    if w[..24].iter().any(|b| *b != 0) {
        return Err(Error::GatewayUnavailable(
            "ABI integer does not fit in 64 bits".to_string(),
        ));
    }
    let mut tail = [0u8; 8];
    tail.copy_from_slice(&w[24..]);
    Ok(u64::from_be_bytes(tail))
}

/// Encode a `u64` as a big-endian ABI word.
#[must_use]
pub fn u64_word(value: u64) -> [u8; 32] {
    let mut w = [0u8; 32];
    w[24..].copy_from_slice(&value.to_be_bytes());
    w
}
