//! Witness assembly and verification for loan output spends.
//!
//! A script-path witness is `[signatures.., secret?, leaf script, control block]`
//! with signatures in the leaf's signer order.

use bitcoin::taproot::ControlBlock;
use bitcoin::{Script, ScriptBuf, Transaction, TxOut, Witness};
use hashloan_crypto::{sha256, Preimage};
use secp256k1::schnorr::Signature;
use secp256k1::SECP256K1;
use tracing::debug;

use crate::error::UtxoError;
use crate::outputs::{LeafKind, LoanOutput};
use crate::signing;
use crate::template::PresignedSpend;

fn check_commitment(output: &LoanOutput, cb: &ControlBlock, script: &Script) -> Result<(), UtxoError> {
    if !cb.verify_taproot_commitment(SECP256K1, output.output_key().to_inner(), script) {
        return Err(UtxoError::InvalidWitness(
            "control block does not commit to the leaf script".into(),
        ));
    }
    Ok(())
}

/// Build the witness for a presigned spend.
///
/// Every required slot must be filled, and the cooperative leaves need the
/// secret that opens the output's hash.
pub fn assemble_witness(spend: &PresignedSpend, secret: Option<&Preimage>) -> Result<Witness, UtxoError> {
    let output = spend.output();
    let leaf = spend.template().leaf();
    let script = output.leaf_script(leaf)?;
    let cb = output.control_block(leaf)?;
    check_commitment(output, &cb, script)?;

    let mut witness = Witness::new();
    for role in leaf.signers() {
        let sig = spend
            .signature(*role)
            .ok_or_else(|| UtxoError::InvalidWitness(format!("missing {role} signature")))?;
        signing::verify_sighash(sig, spend.digest(), &output.key_for(*role), *role)
            .map_err(|e| UtxoError::InvalidWitness(e.to_string()))?;
        witness.push(sig.serialize());
    }

    if leaf.requires_secret() {
        let secret = secret
            .ok_or_else(|| UtxoError::InvalidWitness(format!("leaf {leaf} needs a secret")))?;
        if !secret.verify(&output.hash()) {
            return Err(UtxoError::InvalidWitness(format!(
                "secret does not open {}",
                output.hash()
            )));
        }
        witness.push(secret.as_bytes());
    }

    witness.push(script.as_bytes());
    witness.push(cb.serialize());
    debug!(%leaf, items = witness.len(), "Witness assembled");
    Ok(witness)
}

/// Check that input `input_index` of `tx` is a valid script-path spend of
/// `output`, and return the leaf it spends.
///
/// Checks the control block against the leaf, each signature against the
/// sighash, the secret against the output's hash, and for timeout leaves
/// that the input sequence carries at least the leaf's CSV.
pub fn verify_spend(
    tx: &Transaction,
    input_index: usize,
    prevouts: &[TxOut],
    output: &LoanOutput,
) -> Result<LeafKind, UtxoError> {
    let input = tx
        .input
        .get(input_index)
        .ok_or_else(|| UtxoError::InvalidWitness(format!("no input {input_index}")))?;
    let prevout = prevouts
        .get(input_index)
        .ok_or_else(|| UtxoError::InvalidWitness(format!("no prevout {input_index}")))?;
    if prevout.script_pubkey != output.script_pubkey() {
        return Err(UtxoError::InvalidWitness(
            "prevout does not pay to the loan output".into(),
        ));
    }

    let items: Vec<&[u8]> = input.witness.iter().collect();
    if items.len() < 2 {
        return Err(UtxoError::InvalidWitness("witness too short".into()));
    }
    let cb = ControlBlock::decode(items[items.len() - 1])
        .map_err(|e| UtxoError::InvalidWitness(e.to_string()))?;
    let script = ScriptBuf::from_bytes(items[items.len() - 2].to_vec());
    check_commitment(output, &cb, &script)?;

    let leaf = output
        .leaf_for_script(&script)
        .ok_or_else(|| UtxoError::InvalidWitness("script is not a leaf of this output".into()))?;
    let signers = leaf.signers();
    let expected = signers.len() + usize::from(leaf.requires_secret()) + 2;
    if items.len() != expected {
        return Err(UtxoError::InvalidWitness(format!(
            "leaf {leaf} expects {expected} witness items, found {}",
            items.len()
        )));
    }

    let digest = signing::script_spend_sighash(tx, input_index, prevouts, &script)?;
    for (item, role) in items.iter().zip(signers) {
        let sig = Signature::from_slice(item)
            .map_err(|e| UtxoError::InvalidWitness(format!("{role} signature: {e}")))?;
        signing::verify_sighash(&sig, digest, &output.key_for(*role), *role)
            .map_err(|e| UtxoError::InvalidWitness(e.to_string()))?;
    }

    if leaf.requires_secret() {
        let secret = items[signers.len()];
        if secret.len() != 32 || sha256(secret) != output.hash().to_bytes() {
            return Err(UtxoError::InvalidWitness(format!(
                "secret does not open {}",
                output.hash()
            )));
        }
    }

    if leaf.is_timeout() {
        let sequence = input.sequence;
        let blocks = sequence.to_consensus_u32() & 0xffff;
        if tx.version.0 < 2
            || !sequence.is_relative_lock_time()
            || !sequence.is_height_locked()
            || blocks < u32::from(output.csv())
        {
            return Err(UtxoError::InvalidWitness(format!(
                "sequence {:#x} does not satisfy a {} block relative lock",
                sequence.to_consensus_u32(),
                output.csv()
            )));
        }
    }

    Ok(leaf)
}
