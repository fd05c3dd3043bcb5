//! File fingerprinting.
//!
//! A fingerprint is the SHA-256 digest of the raw file bytes. When the owner
//! supplies a PIN, the fingerprint becomes `sha256(hex(sha256(bytes)) || pin)`
//! so that the same file stamped with different PINs yields unrelated
//! on-chain identities.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::Read;
use std::str::FromStr;

/// Read buffer size for streaming digests.
const READ_CHUNK: usize = 64 * 1024;

/// A 32-byte file fingerprint, displayed as 64 lowercase hex characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Wrap raw digest bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw digest bytes, as passed to the contract's `bytes32` argument.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex without prefix.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// `0x`-prefixed hex, the `bytes32` form used on the wire.
    #[must_use]
    pub fn to_prefixed_hex(&self) -> String {
        format!("0x{}", self.to_hex())
    }
}

impl FromStr for Fingerprint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let clean = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        if clean.len() != 64 {
            return Err(Error::InvalidInput(format!(
                "fingerprint must be 64 hex characters, got {}",
                clean.len()
            )));
        }
        let mut out = [0u8; 32];
        hex::decode_to_slice(clean, &mut out)
            .map_err(|e| Error::InvalidInput(format!("fingerprint is not hex: {e}")))?;
        Ok(Self(out))
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Fingerprint> for String {
    fn from(fp: Fingerprint) -> Self {
        fp.to_hex()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

/// Fingerprint in-memory file bytes, optionally salted with a PIN.
///
/// An empty PIN is the same as no PIN.
#[must_use]
pub fn fingerprint(bytes: &[u8], pin: Option<&str>) -> Fingerprint {
    let digest: [u8; 32] = Sha256::digest(bytes).into();
    salt(digest, pin)
}

/// Fingerprint a stream without buffering it whole.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if the reader fails.
pub fn fingerprint_reader<R: Read>(mut reader: R, pin: Option<&str>) -> Result<Fingerprint> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = reader
            .read(&mut buf)
            .map_err(|e| Error::InvalidInput(format!("file is not readable: {e}")))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(salt(hasher.finalize().into(), pin))
}

fn salt(digest: [u8; 32], pin: Option<&str>) -> Fingerprint {
    match pin.filter(|p| !p.is_empty()) {
        None => Fingerprint(digest),
        Some(pin) => {
            let mut hasher = Sha256::new();
            hasher.update(hex::encode(digest).as_bytes());
            hasher.update(pin.as_bytes());
            Fingerprint(hasher.finalize().into())
        }
    }
}
