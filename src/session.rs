//! Signing session.
//!
//! A [`WalletSession`] is the signing capability for one account on one
//! chain. Operations that spend gas take it by reference; nothing in the
//! crate holds a session globally.

use crate::address::Address;
use crate::chain::tx::{address_of, LegacyTx, SignedTx};
use crate::error::{Error, Result};
use k256::ecdsa::SigningKey;
use rand::rngs::OsRng;
use std::fmt;

/// Private key plus the account and chain it signs for.
#[derive(Clone)]
pub struct WalletSession {
    key: SigningKey,
    address: Address,
    chain_id: u64,
}

impl WalletSession {
    /// Create a session from a signing key.
    #[must_use]
    pub fn new(key: SigningKey, chain_id: u64) -> Self {
        let address = address_of(&key);
        Self {
            key,
            address,
            chain_id,
        }
    }

    /// Parse a hex private key (with or without `0x`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the key is not 32 bytes of hex or
    /// is not a valid secp256k1 scalar.
    pub fn from_hex(private_key: &str, chain_id: u64) -> Result<Self> {
        let clean = private_key.trim().trim_start_matches("0x");
        let bytes = hex::decode(clean)
            .map_err(|e| Error::InvalidInput(format!("private key is not hex: {e}")))?;
        if bytes.len() != 32 {
            return Err(Error::InvalidInput(format!(
                "private key must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        let key = SigningKey::from_slice(&bytes)
            .map_err(|e| Error::InvalidInput(format!("invalid private key: {e}")))?;
        Ok(Self::new(key, chain_id))
    }

    /// Load the private key from an environment variable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the variable is unset, or the
    /// [`WalletSession::from_hex`] errors.
    pub fn from_env(var: &str, chain_id: u64) -> Result<Self> {
        let value = std::env::var(var)
            .map_err(|_| Error::Config(format!("{var} not set; no signing key available")))?;
        Self::from_hex(&value, chain_id)
    }

    /// Generate a fresh random key.
    #[must_use]
    pub fn random(chain_id: u64) -> Self {
        Self::new(SigningKey::random(&mut OsRng), chain_id)
    }

    /// Account address.
    #[must_use]
    pub const fn address(&self) -> Address {
        self.address
    }

    /// Chain id the session signs for.
    #[must_use]
    pub const fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Hex-encoded private key, for writing key files.
    #[must_use]
    pub fn secret_hex(&self) -> String {
        format!("0x{}", hex::encode(self.key.to_bytes()))
    }

    /// Sign a transaction, enforcing the session's chain id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] when the transaction targets another
    /// chain or signing fails.
    pub fn sign(&self, tx: &LegacyTx) -> Result<SignedTx> {
        if tx.chain_id != self.chain_id {
            return Err(Error::InvalidInput(format!(
                "session is bound to chain {} but transaction targets chain {}",
                self.chain_id, tx.chain_id
            )));
        }
        tx.sign(&self.key)
    }
}

impl fmt::Debug for WalletSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletSession")
            .field("address", &self.address)
            .field("chain_id", &self.chain_id)
            .finish_non_exhaustive()
    }
}
