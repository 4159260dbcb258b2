/// Errors from hashing, preimage handling, and key operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("invalid secret key: {0}")]
    InvalidSecretKey(String),

    #[error("invalid preimage length: expected 32, got {0}")]
    InvalidPreimageLength(usize),

    #[error("signature verification failed")]
    SignatureVerificationFailed,

    #[error("invalid input: {0}")]
    InvalidInput(String),
}
