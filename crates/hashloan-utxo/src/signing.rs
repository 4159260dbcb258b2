use bitcoin::hashes::Hash;
use bitcoin::sighash::{Prevouts, SighashCache, TapSighashType};
use bitcoin::taproot::{LeafVersion, TapLeafHash};
use bitcoin::{Script, Transaction, TxOut, XOnlyPublicKey};
use hashloan_core::Role;
use hashloan_crypto::{verify_digest, KeyPair};
use secp256k1::schnorr::Signature;

use crate::error::UtxoError;

/// BIP-341 script-path sighash (`SIGHASH_DEFAULT`) for `input_index` spending
/// along `leaf_script`.
pub fn script_spend_sighash(
    tx: &Transaction,
    input_index: usize,
    prevouts: &[TxOut],
    leaf_script: &Script,
) -> Result<[u8; 32], UtxoError> {
    let leaf_hash = TapLeafHash::from_script(leaf_script, LeafVersion::TapScript);
    let sighash = SighashCache::new(tx)
        .taproot_script_spend_signature_hash(
            input_index,
            &Prevouts::All(prevouts),
            leaf_hash,
            TapSighashType::Default,
        )
        .map_err(|e| UtxoError::Sighash(e.to_string()))?;
    Ok(sighash.to_byte_array())
}

pub fn sign_sighash(keypair: &KeyPair, digest: [u8; 32]) -> Signature {
    keypair.sign_digest(digest)
}

/// Check `signature` from `role` over `digest`.
pub fn verify_sighash(
    signature: &Signature,
    digest: [u8; 32],
    key: &XOnlyPublicKey,
    role: Role,
) -> Result<(), UtxoError> {
    verify_digest(signature, digest, key).map_err(|_| UtxoError::SignatureMismatch { role })
}
