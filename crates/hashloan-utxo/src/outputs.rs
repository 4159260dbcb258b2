use std::fmt;

use bitcoin::key::TweakedPublicKey;
use bitcoin::taproot::{ControlBlock, LeafVersion, TaprootBuilder, TaprootSpendInfo};
use bitcoin::{Address, Network, Script, ScriptBuf, XOnlyPublicKey};
use hashloan_core::{Loan, PreimageHash, Role};
use secp256k1::SECP256K1;
use serde::{Deserialize, Serialize};

use crate::error::UtxoError;
use crate::scripts;

/// Which of a loan's two Bitcoin outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Escrow,
    Collateral,
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Escrow => write!(f, "escrow"),
            Self::Collateral => write!(f, "collateral"),
        }
    }
}

/// The four spending leaves across both outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LeafKind {
    /// E1: escrow into collateral on activation.
    EscrowCooperative,
    /// E2: escrow back to the borrower.
    EscrowTimeout,
    /// C1: collateral back to the borrower on repayment.
    CollateralRelease,
    /// C2: collateral to the lender on default.
    CollateralCapture,
}

impl LeafKind {
    pub fn output(&self) -> OutputKind {
        match self {
            Self::EscrowCooperative | Self::EscrowTimeout => OutputKind::Escrow,
            Self::CollateralRelease | Self::CollateralCapture => OutputKind::Collateral,
        }
    }

    /// Required signers in witness order, bottom of the stack first.
    pub fn signers(&self) -> &'static [Role] {
        match self {
            Self::EscrowCooperative => &[Role::Borrower, Role::Lender],
            Self::EscrowTimeout | Self::CollateralRelease => &[Role::Borrower],
            Self::CollateralCapture => &[Role::Lender],
        }
    }

    pub fn requires_secret(&self) -> bool {
        matches!(self, Self::EscrowCooperative | Self::CollateralRelease)
    }

    /// Timeout leaves carry a CSV and need the input sequence to match.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::EscrowTimeout | Self::CollateralCapture)
    }
}

impl fmt::Display for LeafKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::EscrowCooperative => "escrow-cooperative",
            Self::EscrowTimeout => "escrow-timeout",
            Self::CollateralRelease => "collateral-release",
            Self::CollateralCapture => "collateral-capture",
        };
        f.write_str(name)
    }
}

/// Build a script-path-only Taproot tree over `leaves` and derive its address.
///
/// Leaves are weighted equally, so two leaves both sit at depth 1.
pub fn derive_taproot_address(
    internal_key: XOnlyPublicKey,
    leaves: &[ScriptBuf],
    network: Network,
) -> Result<(Address, TaprootSpendInfo), UtxoError> {
    if leaves.is_empty() {
        return Err(UtxoError::Taproot("no leaves".into()));
    }
    let builder = TaprootBuilder::with_huffman_tree(leaves.iter().map(|s| (1, s.clone())))
        .map_err(|e| UtxoError::Taproot(e.to_string()))?;
    let spend_info = builder
        .finalize(SECP256K1, internal_key)
        .map_err(|_| UtxoError::Taproot("taproot tree is incomplete".into()))?;
    let address = Address::p2tr_tweaked(spend_info.output_key(), network);
    Ok((address, spend_info))
}

/// One of a loan's Taproot outputs with both of its leaves.
///
/// The internal key is the NUMS point, so only the two leaves can spend it.
#[derive(Debug, Clone)]
pub struct LoanOutput {
    kind: OutputKind,
    borrower_key: XOnlyPublicKey,
    lender_key: XOnlyPublicKey,
    hash: PreimageHash,
    csv: u16,
    cooperative: ScriptBuf,
    timeout: ScriptBuf,
    spend_info: TaprootSpendInfo,
}

impl LoanOutput {
    /// Escrow output: E1 on the borrower's hash, E2 after `escrow_csv`.
    pub fn escrow(
        borrower_key: XOnlyPublicKey,
        lender_key: XOnlyPublicKey,
        hash_borrower: PreimageHash,
        escrow_csv: u16,
    ) -> Result<Self, UtxoError> {
        let cooperative = scripts::escrow_cooperative(&hash_borrower, &borrower_key, &lender_key);
        let timeout = scripts::escrow_timeout(escrow_csv, &borrower_key);
        Self::build(
            OutputKind::Escrow,
            borrower_key,
            lender_key,
            hash_borrower,
            escrow_csv,
            cooperative,
            timeout,
        )
    }

    /// Collateral output: C1 on the lender's hash, C2 after `collateral_csv`.
    pub fn collateral(
        borrower_key: XOnlyPublicKey,
        lender_key: XOnlyPublicKey,
        hash_lender: PreimageHash,
        collateral_csv: u16,
    ) -> Result<Self, UtxoError> {
        let cooperative = scripts::collateral_release(&hash_lender, &borrower_key);
        let timeout = scripts::collateral_capture(collateral_csv, &lender_key);
        Self::build(
            OutputKind::Collateral,
            borrower_key,
            lender_key,
            hash_lender,
            collateral_csv,
            cooperative,
            timeout,
        )
    }

    /// Derive either output from an offered loan.
    pub fn for_loan(loan: &Loan, kind: OutputKind) -> Result<Self, UtxoError> {
        let lender_key = loan
            .lender_key
            .ok_or_else(|| UtxoError::TemplateMismatch(format!("loan {} has no lender key", loan.id)))?;
        let timelocks = loan.utxo_timelocks()?;
        match kind {
            OutputKind::Escrow => Self::escrow(
                loan.borrower_key,
                lender_key,
                loan.hash_borrower,
                timelocks.escrow_csv,
            ),
            OutputKind::Collateral => {
                let hash_lender = loan.hash_lender.ok_or_else(|| {
                    UtxoError::TemplateMismatch(format!("loan {} has no lender hash", loan.id))
                })?;
                Self::collateral(
                    loan.borrower_key,
                    lender_key,
                    hash_lender,
                    timelocks.collateral_csv,
                )
            }
        }
    }

    fn build(
        kind: OutputKind,
        borrower_key: XOnlyPublicKey,
        lender_key: XOnlyPublicKey,
        hash: PreimageHash,
        csv: u16,
        cooperative: ScriptBuf,
        timeout: ScriptBuf,
    ) -> Result<Self, UtxoError> {
        let internal_key = scripts::nums_internal_key()?;
        let spend_info = TaprootBuilder::new()
            .add_leaf(1, timeout.clone())
            .and_then(|b| b.add_leaf(1, cooperative.clone()))
            .map_err(|e| UtxoError::Taproot(e.to_string()))?
            .finalize(SECP256K1, internal_key)
            .map_err(|_| UtxoError::Taproot("taproot tree is incomplete".into()))?;

        Ok(Self {
            kind,
            borrower_key,
            lender_key,
            hash,
            csv,
            cooperative,
            timeout,
            spend_info,
        })
    }

    pub fn kind(&self) -> OutputKind {
        self.kind
    }

    pub fn borrower_key(&self) -> XOnlyPublicKey {
        self.borrower_key
    }

    pub fn lender_key(&self) -> XOnlyPublicKey {
        self.lender_key
    }

    pub fn key_for(&self, role: Role) -> XOnlyPublicKey {
        match role {
            Role::Borrower => self.borrower_key,
            Role::Lender => self.lender_key,
        }
    }

    /// Commitment the cooperative leaf checks.
    pub fn hash(&self) -> PreimageHash {
        self.hash
    }

    /// Relative lock on the timeout leaf, in Bitcoin blocks.
    pub fn csv(&self) -> u16 {
        self.csv
    }

    pub fn cooperative_leaf(&self) -> LeafKind {
        match self.kind {
            OutputKind::Escrow => LeafKind::EscrowCooperative,
            OutputKind::Collateral => LeafKind::CollateralRelease,
        }
    }

    pub fn timeout_leaf(&self) -> LeafKind {
        match self.kind {
            OutputKind::Escrow => LeafKind::EscrowTimeout,
            OutputKind::Collateral => LeafKind::CollateralCapture,
        }
    }

    pub fn leaf_script(&self, leaf: LeafKind) -> Result<&ScriptBuf, UtxoError> {
        if leaf == self.cooperative_leaf() {
            Ok(&self.cooperative)
        } else if leaf == self.timeout_leaf() {
            Ok(&self.timeout)
        } else {
            Err(UtxoError::WrongLeaf {
                leaf,
                output: self.kind,
            })
        }
    }

    /// Which leaf of this output `script` is, if any.
    pub fn leaf_for_script(&self, script: &Script) -> Option<LeafKind> {
        if script == self.cooperative.as_script() {
            Some(self.cooperative_leaf())
        } else if script == self.timeout.as_script() {
            Some(self.timeout_leaf())
        } else {
            None
        }
    }

    pub fn control_block(&self, leaf: LeafKind) -> Result<ControlBlock, UtxoError> {
        let script = self.leaf_script(leaf)?;
        self.spend_info
            .control_block(&(script.clone(), LeafVersion::TapScript))
            .ok_or_else(|| UtxoError::Taproot(format!("no control block for leaf {leaf}")))
    }

    pub fn output_key(&self) -> TweakedPublicKey {
        self.spend_info.output_key()
    }

    pub fn spend_info(&self) -> &TaprootSpendInfo {
        &self.spend_info
    }

    pub fn script_pubkey(&self) -> ScriptBuf {
        ScriptBuf::new_p2tr_tweaked(self.output_key())
    }

    pub fn address(&self, network: Network) -> Address {
        Address::p2tr_tweaked(self.output_key(), network)
    }
}
