//! Legacy (EIP-155) transaction encoding and signing.

use super::H256;
use crate::address::{keccak256, Address};
use crate::error::{Error, Result};
use bytes::Bytes;
use k256::ecdsa::SigningKey;

/// An unsigned legacy transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTx {
    /// Sender nonce.
    pub nonce: u64,
    /// Gas price in wei.
    pub gas_price: u128,
    /// Gas limit.
    pub gas_limit: u64,
    /// Recipient (the stamp contract).
    pub to: Address,
    /// Value in wei.
    pub value: u128,
    /// Calldata.
    pub data: Vec<u8>,
    /// EIP-155 chain id.
    pub chain_id: u64,
}

/// A signed, encoded transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTx {
    /// Keccak-256 of `raw`.
    pub hash: H256,
    /// RLP bytes for `eth_sendRawTransaction`.
    pub raw: Bytes,
}

impl LegacyTx {
    /// RLP payload whose hash is signed (EIP-155 form).
    #[must_use]
    pub fn signing_payload(&self) -> Vec<u8> {
        let mut body = self.common_fields();
        rlp_uint(&mut body, u128::from(self.chain_id));
        rlp_uint(&mut body, 0);
        rlp_uint(&mut body, 0);
        rlp_list(&body)
    }

    /// Hash that gets signed.
    #[must_use]
    pub fn signing_hash(&self) -> [u8; 32] {
        keccak256(&self.signing_payload())
    }

    /// Sign with `key` and encode for broadcast.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the signing primitive fails or the
    /// chain id is too large for an EIP-155 `v`.
    pub fn sign(&self, key: &SigningKey) -> Result<SignedTx> {
        let sighash = self.signing_hash();
        let (signature, recovery_id) = key
            .sign_prehash_recoverable(&sighash)
            .map_err(|e| Error::InvalidInput(format!("transaction signing failed: {e}")))?;
        let v = self
            .chain_id
            .checked_mul(2)
            .and_then(|v| v.checked_add(35 + u64::from(recovery_id.to_byte())))
            .ok_or_else(|| {
                Error::InvalidInput(format!("chain id {} is out of range", self.chain_id))
            })?;
        let rs = signature.to_bytes();
        let (r, s) = rs.split_at(32);

        let mut body = self.common_fields();
        rlp_uint(&mut body, u128::from(v));
        rlp_scalar(&mut body, r);
        rlp_scalar(&mut body, s);
        let raw = rlp_list(&body);

        Ok(SignedTx {
            hash: H256::from_bytes(keccak256(&raw)),
            raw: Bytes::from(raw),
        })
    }

    fn common_fields(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(64 + self.data.len());
        rlp_uint(&mut body, u128::from(self.nonce));
        rlp_uint(&mut body, self.gas_price);
        rlp_uint(&mut body, u128::from(self.gas_limit));
        rlp_bytes(&mut body, self.to.as_bytes());
        rlp_uint(&mut body, self.value);
        rlp_bytes(&mut body, &self.data);
        body
    }
}

/// Derive the account address controlled by `key`.
#[must_use]
pub fn address_of(key: &SigningKey) -> Address {
    let point = key.verifying_key().to_encoded_point(false);
    // Uncompressed SEC1: 0x04 || X || Y
    let hash = keccak256(&point.as_bytes()[1..]);
    let mut out = [0u8; 20];
    out.copy_from_slice(&hash[12..]);
    Address::from_bytes(out)
}

/// Append an RLP byte string.
pub fn rlp_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    match bytes {
        [b] if *b < 0x80 => out.push(*b),
        _ => {
            rlp_length_prefix(out, 0x80, bytes.len());
            out.extend_from_slice(bytes);
        }
    }
}

/// Append an RLP unsigned integer (big-endian, no leading zeros).
pub fn rlp_uint(out: &mut Vec<u8>, value: u128) {
    rlp_scalar(out, &value.to_be_bytes());
}

fn rlp_scalar(out: &mut Vec<u8>, be: &[u8]) {
    let first = be.iter().position(|b| *b != 0).unwrap_or(be.len());
    rlp_bytes(out, &be[first..]);
}

/// Wrap an already-encoded payload as an RLP list.
#[must_use]
pub fn rlp_list(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 9);
    rlp_length_prefix(&mut out, 0xc0, payload.len());
    out.extend_from_slice(payload);
    out
}

#[allow(clippy::cast_possible_truncation)]
fn rlp_length_prefix(out: &mut Vec<u8>, offset: u8, len: usize) {
    if len <= 55 {
        out.push(offset + len as u8);
    } else {
        let be = (len as u64).to_be_bytes();
        let first = be.iter().position(|b| *b != 0).unwrap_or(7);
        let len_bytes = &be[first..];
        out.push(offset + 55 + len_bytes.len() as u8);
        out.extend_from_slice(len_bytes);
    }
}
