//! Spend templates for the four loan output leaves.
//!
//! All templates are version 2, locktime 0, one input. Timeout spends set
//! the input sequence to the leaf's CSV.

use bitcoin::absolute::LockTime;
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};
use hashloan_core::config::BPS_DENOMINATOR;

use crate::error::UtxoError;
use crate::outputs::{LeafKind, LoanOutput, OutputKind};
use crate::template::SpendTemplate;

/// Index of the collateral output in the collateral-lock transaction.
/// Output 0 pays the origination fee to the lender.
pub const COLLATERAL_VOUT: u32 = 1;

/// Smallest output value relayed for a Taproot script.
pub const P2TR_DUST: Amount = Amount::from_sat(330);

/// `value * bps / 10_000`, rounded down.
pub fn fee_from_bps(value: Amount, bps: u32) -> Amount {
    let sats = u128::from(value.to_sat()) * u128::from(bps) / BPS_DENOMINATOR;
    Amount::from_sat(u64::try_from(sats).unwrap_or(u64::MAX))
}

fn single_input(outpoint: OutPoint, sequence: Sequence, outputs: Vec<TxOut>) -> Transaction {
    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: outpoint,
            script_sig: ScriptBuf::new(),
            sequence,
            witness: Witness::new(),
        }],
        output: outputs,
    }
}

fn spendable(value: Amount, deductions: Amount) -> Result<Amount, UtxoError> {
    let required = deductions.checked_add(P2TR_DUST).unwrap_or(Amount::MAX);
    if value < required {
        return Err(UtxoError::InsufficientFunds {
            available: value.to_sat(),
            required: required.to_sat(),
        });
    }
    Ok(value - deductions)
}

fn expect_kind(output: &LoanOutput, kind: OutputKind) -> Result<(), UtxoError> {
    if output.kind() != kind {
        return Err(UtxoError::TemplateMismatch(format!(
            "expected the {kind} output, got the {} output",
            output.kind()
        )));
    }
    Ok(())
}

fn template(
    output: &LoanOutput,
    leaf: LeafKind,
    outpoint: OutPoint,
    value: Amount,
    outputs: Vec<TxOut>,
) -> Result<SpendTemplate, UtxoError> {
    let sequence = if leaf.is_timeout() {
        Sequence::from_height(output.csv())
    } else {
        Sequence::ENABLE_RBF_NO_LOCKTIME
    };
    let tx = single_input(outpoint, sequence, outputs);
    let prevout = TxOut {
        value,
        script_pubkey: output.script_pubkey(),
    };
    Ok(SpendTemplate::new(
        leaf,
        tx,
        prevout,
        output.leaf_script(leaf)?.clone(),
    ))
}

/// E1: move the escrow into the collateral output, paying the origination
/// fee to the lender at output 0.
pub fn collateral_lock(
    escrow: &LoanOutput,
    escrow_outpoint: OutPoint,
    escrow_value: Amount,
    collateral: &LoanOutput,
    origination_fee: Amount,
    lender_script: ScriptBuf,
    miner_fee: Amount,
) -> Result<SpendTemplate, UtxoError> {
    expect_kind(escrow, OutputKind::Escrow)?;
    expect_kind(collateral, OutputKind::Collateral)?;
    if origination_fee < P2TR_DUST {
        return Err(UtxoError::InsufficientFunds {
            available: origination_fee.to_sat(),
            required: P2TR_DUST.to_sat(),
        });
    }
    let deductions = origination_fee
        .checked_add(miner_fee)
        .unwrap_or(Amount::MAX);
    let collateral_value = spendable(escrow_value, deductions)?;
    let outputs = vec![
        TxOut {
            value: origination_fee,
            script_pubkey: lender_script,
        },
        TxOut {
            value: collateral_value,
            script_pubkey: collateral.script_pubkey(),
        },
    ];
    template(
        escrow,
        LeafKind::EscrowCooperative,
        escrow_outpoint,
        escrow_value,
        outputs,
    )
}

/// E2: the borrower takes the escrow back after the relative lock.
pub fn escrow_exit(
    escrow: &LoanOutput,
    escrow_outpoint: OutPoint,
    escrow_value: Amount,
    destination: ScriptBuf,
    miner_fee: Amount,
) -> Result<SpendTemplate, UtxoError> {
    expect_kind(escrow, OutputKind::Escrow)?;
    sweep(escrow, LeafKind::EscrowTimeout, escrow_outpoint, escrow_value, destination, miner_fee)
}

/// C1: the borrower reclaims the collateral with the lender's secret.
pub fn collateral_release(
    collateral: &LoanOutput,
    collateral_outpoint: OutPoint,
    collateral_value: Amount,
    destination: ScriptBuf,
    miner_fee: Amount,
) -> Result<SpendTemplate, UtxoError> {
    expect_kind(collateral, OutputKind::Collateral)?;
    sweep(
        collateral,
        LeafKind::CollateralRelease,
        collateral_outpoint,
        collateral_value,
        destination,
        miner_fee,
    )
}

/// C2: the lender captures the collateral after the relative lock.
pub fn collateral_capture(
    collateral: &LoanOutput,
    collateral_outpoint: OutPoint,
    collateral_value: Amount,
    destination: ScriptBuf,
    miner_fee: Amount,
) -> Result<SpendTemplate, UtxoError> {
    expect_kind(collateral, OutputKind::Collateral)?;
    sweep(
        collateral,
        LeafKind::CollateralCapture,
        collateral_outpoint,
        collateral_value,
        destination,
        miner_fee,
    )
}

fn sweep(
    output: &LoanOutput,
    leaf: LeafKind,
    outpoint: OutPoint,
    value: Amount,
    destination: ScriptBuf,
    miner_fee: Amount,
) -> Result<SpendTemplate, UtxoError> {
    let outputs = vec![TxOut {
        value: spendable(value, miner_fee)?,
        script_pubkey: destination,
    }];
    template(output, leaf, outpoint, value, outputs)
}
