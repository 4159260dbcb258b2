//! Tapscript leaves for the escrow and collateral outputs.
//!
//! Hash-locked leaves check the secret length before hashing, so a secret
//! of any other size fails the script even if it would collide.

use bitcoin::opcodes::all::{
    OP_CHECKSIG, OP_CHECKSIGADD, OP_CSV, OP_DROP, OP_EQUALVERIFY, OP_NUMEQUALVERIFY, OP_PUSHNUM_1,
    OP_SHA256, OP_SIZE,
};
use bitcoin::script::Builder;
use bitcoin::{ScriptBuf, XOnlyPublicKey};
use hashloan_core::PreimageHash;

use crate::error::UtxoError;

/// BIP-341 "nothing up my sleeve" point. Nobody knows its discrete log,
/// which disables the key path on every loan output.
pub const NUMS_INTERNAL_KEY: [u8; 32] = [
    0x50, 0x92, 0x9b, 0x74, 0xc1, 0xa0, 0x49, 0x54, 0xb7, 0x8b, 0x4b, 0x60, 0xc5, 0x95, 0xc2, 0x11,
    0xf8, 0xb8, 0x53, 0xe6, 0xe8, 0x4b, 0xfa, 0x2b, 0xe9, 0x57, 0x12, 0xa7, 0xb0, 0xdd, 0x59, 0xe6,
];

/// Size of a protocol secret in bytes.
pub const SECRET_SIZE: i64 = 32;

pub fn nums_internal_key() -> Result<XOnlyPublicKey, UtxoError> {
    XOnlyPublicKey::from_slice(&NUMS_INTERNAL_KEY).map_err(|e| UtxoError::Taproot(e.to_string()))
}

fn hash_lock(builder: Builder, hash: &PreimageHash) -> Builder {
    builder
        .push_opcode(OP_SIZE)
        .push_int(SECRET_SIZE)
        .push_opcode(OP_EQUALVERIFY)
        .push_opcode(OP_SHA256)
        .push_slice(hash.to_bytes())
        .push_opcode(OP_EQUALVERIFY)
}

fn relative_lock(csv: u16, key: &XOnlyPublicKey) -> ScriptBuf {
    Builder::new()
        .push_int(i64::from(csv))
        .push_opcode(OP_CSV)
        .push_opcode(OP_DROP)
        .push_slice(key.serialize())
        .push_opcode(OP_CHECKSIG)
        .into_script()
}

/// E1: borrower's secret plus both signatures.
///
/// Witness (bottom to top): `sig_borrower sig_lender secret`.
pub fn escrow_cooperative(
    hash_borrower: &PreimageHash,
    borrower: &XOnlyPublicKey,
    lender: &XOnlyPublicKey,
) -> ScriptBuf {
    hash_lock(Builder::new(), hash_borrower)
        .push_slice(lender.serialize())
        .push_opcode(OP_CHECKSIG)
        .push_slice(borrower.serialize())
        .push_opcode(OP_CHECKSIGADD)
        .push_int(2)
        .push_opcode(OP_NUMEQUALVERIFY)
        .push_opcode(OP_PUSHNUM_1)
        .into_script()
}

/// E2: borrower alone after `csv` blocks.
pub fn escrow_timeout(csv: u16, borrower: &XOnlyPublicKey) -> ScriptBuf {
    relative_lock(csv, borrower)
}

/// C1: lender's secret plus the borrower's signature.
///
/// Witness (bottom to top): `sig_borrower secret`.
pub fn collateral_release(hash_lender: &PreimageHash, borrower: &XOnlyPublicKey) -> ScriptBuf {
    hash_lock(Builder::new(), hash_lender)
        .push_slice(borrower.serialize())
        .push_opcode(OP_CHECKSIG)
        .into_script()
}

/// C2: lender alone after `csv` blocks.
pub fn collateral_capture(csv: u16, lender: &XOnlyPublicKey) -> ScriptBuf {
    relative_lock(csv, lender)
}
