use secp256k1::{schnorr::Signature, Keypair, Message, XOnlyPublicKey, SECP256K1};
use zeroize::Zeroize;

use crate::error::CryptoError;

/// secp256k1 key pair used for Taproot script-path signatures.
/// Secret material is erased on drop.
pub struct KeyPair {
    inner: Keypair,
}

impl KeyPair {
    /// Generate a new random key pair.
    pub fn generate() -> Self {
        let inner = Keypair::new(SECP256K1, &mut rand::thread_rng());
        Self { inner }
    }

    /// Create a key pair from a 32-byte secret key.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKeyLength {
                expected: 32,
                actual: bytes.len(),
            });
        }
        let inner = Keypair::from_seckey_slice(SECP256K1, bytes)
            .map_err(|e| CryptoError::InvalidSecretKey(e.to_string()))?;
        Ok(Self { inner })
    }

    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let mut bytes = hex::decode(s).map_err(|e| CryptoError::InvalidInput(e.to_string()))?;
        let kp = Self::from_secret_bytes(&bytes);
        bytes.zeroize();
        kp
    }

    /// The x-only public key that appears in leaf scripts.
    pub fn x_only_public_key(&self) -> XOnlyPublicKey {
        self.inner.x_only_public_key().0
    }

    /// Raw secret key bytes. Prefer [`KeyPair::sign_digest`].
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.inner.secret_bytes()
    }

    /// BIP-340 Schnorr signature over a 32-byte digest.
    pub fn sign_digest(&self, digest: [u8; 32]) -> Signature {
        let msg = Message::from_digest(digest);
        SECP256K1.sign_schnorr_no_aux_rand(&msg, &self.inner)
    }
}

impl Drop for KeyPair {
    fn drop(&mut self) {
        self.inner.non_secure_erase();
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyPair({})", self.x_only_public_key())
    }
}

/// Verify a BIP-340 signature over a 32-byte digest.
pub fn verify_digest(
    signature: &Signature,
    digest: [u8; 32],
    pubkey: &XOnlyPublicKey,
) -> Result<(), CryptoError> {
    let msg = Message::from_digest(digest);
    SECP256K1
        .verify_schnorr(signature, &msg, pubkey)
        .map_err(|_| CryptoError::SignatureVerificationFailed)
}
