use hashloan_core::PreimageHash;
use sha2::{Digest, Sha256};

/// SHA-256 of arbitrary data. Matches `OP_SHA256` in Bitcoin script.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Commitment to a secret: `SHA-256(secret)`.
pub fn commit(secret: &[u8]) -> PreimageHash {
    PreimageHash::from_bytes(sha256(secret))
}
