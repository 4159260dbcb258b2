//! Integration test: Bitcoin witnesses for outputs derived from live loans.
//!
//! Spends are fixed and signed through envelope exchange before either
//! secret exists; tampered witnesses, envelopes and templates are rejected
//! by both `verify_spend` and the node.

use bitcoin::{Amount as Sats, OutPoint, Witness};
use hashloan_core::{Loan, Role};
use hashloan_crypto::Preimage;
use hashloan_integration_tests::{World, ESCROW_SATS, MINER_FEE_SATS};
use hashloan_utxo::transactions::{self, fee_from_bps};
use hashloan_utxo::{
    verify_spend, BitcoinNode, LeafKind, LoanOutput, OutputKind, PresignedSpend, SignatureEnvelope,
    UtxoError,
};

fn replace_item(witness: &Witness, index: usize, item: Vec<u8>) -> Witness {
    let mut items: Vec<Vec<u8>> = witness.iter().map(|i| i.to_vec()).collect();
    items[index] = item;
    Witness::from_slice(&items)
}

async fn offered_world(index: u64) -> (World, Loan, OutPoint) {
    let world = World::new(index);
    let (id, outpoint) = world.request().await;
    let loan = world.offer(id);
    (world, loan, outpoint)
}

// =========================================================================
// Signing before reveal
// =========================================================================

#[tokio::test]
async fn test_spends_are_signed_before_any_secret_is_revealed() {
    let (world, loan, escrow_outpoint) = offered_world(20).await;
    let lock = world.presign_collateral_lock(&loan, escrow_outpoint);
    let release = world.presign_collateral_release(&loan, &lock);

    // Neither secret is public yet; the spends are complete but unusable.
    let chain = &world.book;
    assert!(chain.locks().revealed_secret(&loan.hash_borrower).is_none());
    assert!(lock.is_complete() && release.is_complete());
    assert!(lock.finalize(None).is_err());
    assert!(lock
        .finalize(Some(&Preimage::derive_for(Role::Borrower, 999)))
        .is_err());

    world.accept(loan.id);
    let secret = chain
        .locks()
        .revealed_secret(&loan.hash_borrower)
        .unwrap();
    let tx = lock.finalize(Some(&secret)).unwrap();
    assert_eq!(
        verify_spend(&tx, 0, &[lock.template().prevout().clone()], lock.output()).unwrap(),
        LeafKind::EscrowCooperative
    );
    world.bitcoin.broadcast(&tx).await.expect("collateral lock");

    // The lock pays the origination fee at output 0 and the collateral at 1.
    let fee = fee_from_bps(
        Sats::from_sat(ESCROW_SATS),
        world.book.params().origination_fee_bps,
    );
    assert_eq!(tx.output[0].value, fee);
    assert_eq!(tx.output[0].script_pubkey, world.lender.payout_script());
    assert_eq!(
        tx.output[1].value,
        Sats::from_sat(ESCROW_SATS - MINER_FEE_SATS) - fee
    );
    assert_eq!(tx.output[1].script_pubkey, release.output().script_pubkey());
}

// =========================================================================
// Control block / leaf script pairing
// =========================================================================

#[tokio::test]
async fn test_mismatched_control_block_is_rejected() {
    let (world, loan, escrow_outpoint) = offered_world(21).await;
    let lock = world.presign_collateral_lock(&loan, escrow_outpoint);
    let capture = world.collateral_capture(&loan, &lock);
    let tx = capture.finalize(None).unwrap();
    let prevouts = [capture.template().prevout().clone()];
    let collateral = capture.output();
    assert_eq!(
        verify_spend(&tx, 0, &prevouts, collateral).unwrap(),
        LeafKind::CollateralCapture
    );

    // Control block of the sibling leaf.
    let mut bad = tx.clone();
    let sibling = collateral
        .control_block(LeafKind::CollateralRelease)
        .unwrap()
        .serialize();
    bad.input[0].witness = replace_item(&tx.input[0].witness, 2, sibling);
    let err = verify_spend(&bad, 0, &prevouts, collateral).unwrap_err();
    assert!(matches!(err, UtxoError::InvalidWitness(ref msg) if msg.contains("control block")));

    // Control block from the escrow output's tree.
    let escrow = LoanOutput::for_loan(&loan, OutputKind::Escrow).unwrap();
    let foreign = escrow
        .control_block(LeafKind::EscrowTimeout)
        .unwrap()
        .serialize();
    bad.input[0].witness = replace_item(&tx.input[0].witness, 2, foreign);
    assert!(verify_spend(&bad, 0, &prevouts, collateral).is_err());

    // Right control block, swapped leaf script.
    let other_script = collateral
        .leaf_script(LeafKind::CollateralRelease)
        .unwrap()
        .to_bytes();
    bad.input[0].witness = replace_item(&tx.input[0].witness, 1, other_script);
    assert!(verify_spend(&bad, 0, &prevouts, collateral).is_err());
}

// =========================================================================
// Signatures bound to one template
// =========================================================================

#[tokio::test]
async fn test_signature_over_other_template_is_rejected() {
    let (world, loan, escrow_outpoint) = offered_world(22).await;
    let (escrow, collateral) = world.loan_outputs(&loan);
    let fee = fee_from_bps(Sats::from_sat(ESCROW_SATS), 100);

    let build = |miner_fee: u64| {
        transactions::collateral_lock(
            &escrow,
            escrow_outpoint,
            Sats::from_sat(ESCROW_SATS),
            &collateral,
            fee,
            world.lender.payout_script(),
            Sats::from_sat(miner_fee),
        )
        .unwrap()
    };

    let mut signed = PresignedSpend::new(build(MINER_FEE_SATS), escrow.clone()).unwrap();
    let borrower_sig = signed.sign(Role::Borrower, &world.borrower.keys).unwrap();
    signed.sign(Role::Lender, &world.lender.keys).unwrap();

    // A signature moved onto a different fee is refused by the slot.
    let mut other = PresignedSpend::new(build(MINER_FEE_SATS + 100), escrow.clone()).unwrap();
    let err = other.add_signature(Role::Borrower, borrower_sig).unwrap_err();
    assert!(matches!(err, UtxoError::SignatureMismatch { role: Role::Borrower }));

    // A complete witness grafted onto the other transaction fails verification
    // and the node refuses it.
    let witness = signed
        .finalize(Some(&world.borrower.secret))
        .unwrap()
        .input[0]
        .witness
        .clone();
    let mut grafted = other.template().tx().clone();
    grafted.input[0].witness = witness;
    let prevouts = [other.template().prevout().clone()];
    assert!(matches!(
        verify_spend(&grafted, 0, &prevouts, &escrow),
        Err(UtxoError::InvalidWitness(_))
    ));
    assert!(world.bitcoin.broadcast(&grafted).await.is_err());
}

#[tokio::test]
async fn test_tampered_envelope_is_rejected() {
    let (world, loan, escrow_outpoint) = offered_world(23).await;
    let lock = world.presign_collateral_lock(&loan, escrow_outpoint);
    let envelope = lock.envelope(loan.id, Role::Borrower).unwrap();
    envelope.verify(lock.output()).unwrap();

    // Round trip through JSON, then tamper with the signature.
    let json = envelope.to_json().unwrap();
    let mut value: serde_json::Value = serde_json::from_str(&json).unwrap();
    let lender_sig = lock.signature(Role::Lender).unwrap().to_string();
    value["signature"] = serde_json::Value::String(lender_sig);
    let forged = SignatureEnvelope::from_json(&value.to_string()).unwrap();
    assert!(forged.verify(lock.output()).is_err());

    let mut fresh = PresignedSpend::new(lock.template().clone(), lock.output().clone()).unwrap();
    assert!(fresh.accept_envelope(&forged).is_err());
    assert!(fresh.signature(Role::Borrower).is_none());

    // An envelope for another output's spend does not fit this template.
    let release = world.presign_collateral_release(&loan, &lock);
    let foreign = release.envelope(loan.id, Role::Borrower).unwrap();
    assert!(matches!(
        fresh.accept_envelope(&foreign),
        Err(UtxoError::TemplateMismatch(_))
    ));
    assert!(foreign.verify(lock.output()).is_err());

    // The genuine envelope still fills the slot exactly once.
    fresh.accept_envelope(&envelope).unwrap();
    assert!(matches!(
        fresh.accept_envelope(&envelope),
        Err(UtxoError::SlotFilled { .. })
    ));
}

#[tokio::test]
async fn test_timeout_spend_with_short_sequence_is_rejected() {
    let (world, loan, escrow_outpoint) = offered_world(24).await;
    let lock = world.presign_collateral_lock(&loan, escrow_outpoint);
    let capture = world.collateral_capture(&loan, &lock);
    let mut tx = capture.finalize(None).unwrap();
    tx.input[0].sequence = bitcoin::Sequence::from_height(capture.output().csv() - 1);

    // Changing the sequence changes the sighash, so the signature fails
    // first; either way the spend is invalid.
    let prevouts = [capture.template().prevout().clone()];
    assert!(matches!(
        verify_spend(&tx, 0, &prevouts, capture.output()),
        Err(UtxoError::InvalidWitness(_))
    ));
}
