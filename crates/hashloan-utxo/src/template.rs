use bitcoin::{ScriptBuf, Transaction, TxOut, Txid};
use hashloan_core::{LoanId, Role};
use hashloan_crypto::{KeyPair, Preimage};
use secp256k1::schnorr::Signature;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::UtxoError;
use crate::outputs::{LeafKind, LoanOutput};
use crate::signing;
use crate::witness;

/// An unsigned single-input spend of a loan output along one leaf.
///
/// Fields are fixed at construction; every signature over it commits to
/// exactly these bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendTemplate {
    leaf: LeafKind,
    tx: Transaction,
    prevout: TxOut,
    leaf_script: ScriptBuf,
}

impl SpendTemplate {
    pub(crate) fn new(leaf: LeafKind, tx: Transaction, prevout: TxOut, leaf_script: ScriptBuf) -> Self {
        Self {
            leaf,
            tx,
            prevout,
            leaf_script,
        }
    }

    pub fn leaf(&self) -> LeafKind {
        self.leaf
    }

    pub fn tx(&self) -> &Transaction {
        &self.tx
    }

    pub fn prevout(&self) -> &TxOut {
        &self.prevout
    }

    pub fn leaf_script(&self) -> &ScriptBuf {
        &self.leaf_script
    }

    pub fn txid(&self) -> Txid {
        self.tx.compute_txid()
    }

    /// The digest every party signs.
    pub fn sighash(&self) -> Result<[u8; 32], UtxoError> {
        signing::script_spend_sighash(
            &self.tx,
            0,
            std::slice::from_ref(&self.prevout),
            &self.leaf_script,
        )
    }

    /// Check that this template spends `output` along a leaf of it.
    pub fn check_against(&self, output: &LoanOutput) -> Result<(), UtxoError> {
        if self.leaf.output() != output.kind() {
            return Err(UtxoError::WrongLeaf {
                leaf: self.leaf,
                output: output.kind(),
            });
        }
        if self.prevout.script_pubkey != output.script_pubkey() {
            return Err(UtxoError::TemplateMismatch(
                "prevout does not pay to the loan output".into(),
            ));
        }
        if &self.leaf_script != output.leaf_script(self.leaf)? {
            return Err(UtxoError::TemplateMismatch(format!(
                "script is not leaf {}",
                self.leaf
            )));
        }
        if self.tx.input.len() != 1 {
            return Err(UtxoError::TemplateMismatch(format!(
                "expected one input, found {}",
                self.tx.input.len()
            )));
        }
        Ok(())
    }
}

/// A template plus one signature slot per role the leaf requires.
///
/// Each slot can be filled once and only with a signature that verifies
/// against the template digest under that role's key.
#[derive(Debug, Clone)]
pub struct PresignedSpend {
    template: SpendTemplate,
    output: LoanOutput,
    digest: [u8; 32],
    borrower_sig: Option<Signature>,
    lender_sig: Option<Signature>,
}

impl PresignedSpend {
    pub fn new(template: SpendTemplate, output: LoanOutput) -> Result<Self, UtxoError> {
        template.check_against(&output)?;
        let digest = template.sighash()?;
        Ok(Self {
            template,
            output,
            digest,
            borrower_sig: None,
            lender_sig: None,
        })
    }

    pub fn template(&self) -> &SpendTemplate {
        &self.template
    }

    pub fn output(&self) -> &LoanOutput {
        &self.output
    }

    pub fn digest(&self) -> [u8; 32] {
        self.digest
    }

    pub fn signature(&self, role: Role) -> Option<&Signature> {
        match role {
            Role::Borrower => self.borrower_sig.as_ref(),
            Role::Lender => self.lender_sig.as_ref(),
        }
    }

    /// All required slots are filled.
    pub fn is_complete(&self) -> bool {
        self.template
            .leaf()
            .signers()
            .iter()
            .all(|role| self.signature(*role).is_some())
    }

    pub fn add_signature(&mut self, role: Role, signature: Signature) -> Result<(), UtxoError> {
        let leaf = self.template.leaf();
        if !leaf.signers().contains(&role) {
            return Err(UtxoError::UnexpectedSigner { role, leaf });
        }
        if self.signature(role).is_some() {
            return Err(UtxoError::SlotFilled { role });
        }
        signing::verify_sighash(&signature, self.digest, &self.output.key_for(role), role)?;

        match role {
            Role::Borrower => self.borrower_sig = Some(signature),
            Role::Lender => self.lender_sig = Some(signature),
        }
        debug!(%leaf, %role, txid = %self.template.txid(), "Signature slot filled");
        Ok(())
    }

    /// Sign as `role` with `keypair` and fill that slot.
    pub fn sign(&mut self, role: Role, keypair: &KeyPair) -> Result<Signature, UtxoError> {
        if keypair.x_only_public_key() != self.output.key_for(role) {
            return Err(UtxoError::SignatureMismatch { role });
        }
        let signature = signing::sign_sighash(keypair, self.digest);
        self.add_signature(role, signature)?;
        Ok(signature)
    }

    /// Package this party's signature for the counterparty.
    pub fn envelope(&self, loan_id: LoanId, role: Role) -> Result<SignatureEnvelope, UtxoError> {
        let signature = *self
            .signature(role)
            .ok_or(UtxoError::MissingSignature { role })?;
        Ok(SignatureEnvelope {
            loan_id,
            signer: role,
            template: self.template.clone(),
            signature,
        })
    }

    /// Fill a slot from a counterparty envelope. The envelope must be over
    /// the same template this party built.
    pub fn accept_envelope(&mut self, envelope: &SignatureEnvelope) -> Result<(), UtxoError> {
        if envelope.template != self.template {
            return Err(UtxoError::TemplateMismatch(format!(
                "envelope for loan {} signs a different {} spend",
                envelope.loan_id,
                envelope.template.leaf()
            )));
        }
        self.add_signature(envelope.signer, envelope.signature)
    }

    /// Attach the witness and return the broadcastable transaction.
    pub fn finalize(&self, secret: Option<&Preimage>) -> Result<Transaction, UtxoError> {
        let witness = witness::assemble_witness(self, secret)?;
        let mut tx = self.template.tx().clone();
        tx.input[0].witness = witness;
        Ok(tx)
    }
}

/// A signature handed from one party to the other, together with the
/// template it signs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureEnvelope {
    pub loan_id: LoanId,
    pub signer: Role,
    pub template: SpendTemplate,
    pub signature: Signature,
}

impl SignatureEnvelope {
    pub fn to_json(&self) -> Result<String, UtxoError> {
        serde_json::to_string(self).map_err(|e| UtxoError::TemplateMismatch(e.to_string()))
    }

    pub fn from_json(s: &str) -> Result<Self, UtxoError> {
        serde_json::from_str(s).map_err(|e| UtxoError::TemplateMismatch(e.to_string()))
    }

    /// Verify the signature against `output` without a local spend.
    pub fn verify(&self, output: &LoanOutput) -> Result<(), UtxoError> {
        self.template.check_against(output)?;
        if !self.template.leaf().signers().contains(&self.signer) {
            return Err(UtxoError::UnexpectedSigner {
                role: self.signer,
                leaf: self.template.leaf(),
            });
        }
        let digest = self.template.sighash()?;
        signing::verify_sighash(
            &self.signature,
            digest,
            &output.key_for(self.signer),
            self.signer,
        )
    }
}
