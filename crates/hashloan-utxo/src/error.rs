use bitcoin::OutPoint;
use hashloan_core::{CoreError, Role};
use hashloan_crypto::CryptoError;

use crate::outputs::{LeafKind, OutputKind};

/// Errors from output derivation, spend construction, and the Bitcoin node.
#[derive(Debug, thiserror::Error)]
pub enum UtxoError {
    /// A witness could not be assembled or does not satisfy the leaf.
    #[error("invalid witness: {0}")]
    InvalidWitness(String),

    #[error("{role} signature does not verify against the template digest")]
    SignatureMismatch { role: Role },

    #[error("{role} signature slot is already filled")]
    SlotFilled { role: Role },

    #[error("{role} does not sign leaf {leaf}")]
    UnexpectedSigner { role: Role, leaf: LeafKind },

    #[error("missing {role} signature")]
    MissingSignature { role: Role },

    #[error("template mismatch: {0}")]
    TemplateMismatch(String),

    #[error("leaf {leaf} does not belong to the {output} output")]
    WrongLeaf { leaf: LeafKind, output: OutputKind },

    #[error("insufficient funds: available {available} sat, required {required} sat")]
    InsufficientFunds { available: u64, required: u64 },

    #[error("taproot error: {0}")]
    Taproot(String),

    #[error("sighash error: {0}")]
    Sighash(String),

    #[error("input {0} not found")]
    MissingInput(OutPoint),

    #[error("input {0} already spent")]
    DoubleSpend(OutPoint),

    #[error("input {outpoint} has {confirmations} confirmations, relative lock needs {required}")]
    NonFinal {
        outpoint: OutPoint,
        confirmations: u64,
        required: u16,
    },

    #[error("bitcoin node error: {0}")]
    Node(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Core(#[from] CoreError),
}
