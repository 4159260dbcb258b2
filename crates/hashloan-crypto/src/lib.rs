pub mod error;
pub mod hashing;
pub mod keys;
pub mod preimage;

pub use error::CryptoError;
pub use hashing::{commit, sha256};
pub use keys::{verify_digest, KeyPair};
pub use preimage::{Preimage, BORROWER_TAG, LENDER_TAG};
