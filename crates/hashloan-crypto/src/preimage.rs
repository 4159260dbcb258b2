use hashloan_core::{PreimageHash, Role};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;
use crate::hashing::{commit, sha256};

/// Derivation tag for borrower secrets.
pub const BORROWER_TAG: &[u8] = b"borrower";
/// Derivation tag for lender secrets.
pub const LENDER_TAG: &[u8] = b"lender";

/// A 32-byte hash-lock secret. Zeroized on drop.
///
/// Serializes as hex: once revealed on-chain a secret is public data and
/// travels inside loan events.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Preimage(#[serde(with = "hex::serde")] [u8; 32]);

impl Preimage {
    /// Generate a fresh random secret.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Deterministic secret: `SHA-256(tag || uint256_be(index))`.
    pub fn derive(tag: &[u8], index: u64) -> Self {
        let mut data = Vec::with_capacity(tag.len() + 32);
        data.extend_from_slice(tag);
        data.extend_from_slice(&[0u8; 24]);
        data.extend_from_slice(&index.to_be_bytes());
        let secret = sha256(&data);
        data.zeroize();
        Self(secret)
    }

    /// Deterministic secret for one side of a loan.
    pub fn derive_for(role: Role, index: u64) -> Self {
        match role {
            Role::Borrower => Self::derive(BORROWER_TAG, index),
            Role::Lender => Self::derive(LENDER_TAG, index),
        }
    }

    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidPreimageLength(bytes.len()))?;
        Ok(Self(arr))
    }

    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let mut bytes = hex::decode(s.trim_start_matches("0x"))
            .map_err(|e| CryptoError::InvalidInput(e.to_string()))?;
        let result = Self::from_slice(&bytes);
        bytes.zeroize();
        result
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// The commitment published in place of this secret.
    pub fn commitment(&self) -> PreimageHash {
        commit(&self.0)
    }

    /// Whether this secret opens `hash`.
    pub fn verify(&self, hash: &PreimageHash) -> bool {
        self.commitment() == *hash
    }
}

impl fmt::Debug for Preimage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Preimage(commitment={})", self.commitment())
    }
}
