//! Hashloan Bitcoin side.
//!
//! Each loan has two Taproot outputs with an unspendable internal key:
//! an escrow output funded by the borrower and a collateral output it
//! moves into once the loan activates. Spends along cooperative leaves are
//! fixed as [`SpendTemplate`]s and signed before any secret is known; the
//! witness is assembled once the secret is public.

pub mod adapters;
pub mod error;
pub mod outputs;
pub mod scripts;
pub mod signing;
pub mod template;
pub mod traits;
pub mod transactions;
pub mod witness;

pub use error::UtxoError;
pub use outputs::{derive_taproot_address, LeafKind, LoanOutput, OutputKind};
pub use template::{PresignedSpend, SignatureEnvelope, SpendTemplate};
pub use traits::BitcoinNode;
pub use transactions::COLLATERAL_VOUT;
pub use witness::{assemble_witness, verify_spend};
