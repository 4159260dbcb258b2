//! Integration test: full loan lifecycles across the settlement chain and
//! the Bitcoin side.
//!
//! Each scenario drives the loan book through one path of the state machine
//! and checks that the matching Bitcoin leaf becomes (or stays) spendable.

use std::sync::Arc;

use bitcoin::{Amount as Sats, OutPoint};
use hashloan_core::{CoreError, Invariant, LoanStatus, LoanTimelocks};
use hashloan_integration_tests::{
    params, World, BORROWER_FUNDS, ESCROW_SATS, LENDER_FUNDS, MINER_FEE_SATS, PRINCIPAL,
};
use hashloan_settlement::{Ledger, LoanBook, SettlementError};
use hashloan_utxo::transactions;
use hashloan_utxo::{verify_spend, BitcoinNode, LeafKind, PresignedSpend, UtxoError};

const BOND: u128 = 1;

// =========================================================================
// Invariant: timelock ordering is enforced before any value moves
// =========================================================================

#[test]
fn test_invariant_violation_rejected_at_creation() {
    let ledger = Arc::new(Ledger::new());
    let mut bad = params();
    bad.timelocks = LoanTimelocks {
        accept_window: 10,
        escrow_timeout: 10,
        repay_accept_window: 10,
        collateral_timeout: 200,
        loan_duration: 100,
    };
    let err = LoanBook::new(bad.clone(), ledger.clone()).err().expect("must reject");
    assert!(matches!(
        err,
        SettlementError::Core(CoreError::InvariantViolation(
            Invariant::EscrowOutlastsAcceptWindow { .. }
        ))
    ));

    bad.timelocks.escrow_timeout = 20;
    bad.timelocks.collateral_timeout = 110;
    let err = LoanBook::new(bad, ledger.clone()).err().expect("must reject");
    assert!(matches!(
        err,
        SettlementError::Core(CoreError::InvariantViolation(
            Invariant::CollateralOutlastsRepayment { .. }
        ))
    ));
    assert_eq!(ledger.total(), 0);
}

// =========================================================================
// Scenario A: request -> offer -> accept
// =========================================================================

#[tokio::test]
async fn test_scenario_a_accept_within_window() {
    let world = World::new(1);
    let (id, _) = world.request().await;
    let offered = world.offer(id);
    assert_eq!(offered.status, LoanStatus::Offered);
    assert_eq!(offered.bond_amount, Some(BOND));
    assert_eq!(world.balance(&world.lender), LENDER_FUNDS - PRINCIPAL - BOND);

    world.book.advance(9);
    let active = world.accept(id);
    assert_eq!(active.status, LoanStatus::Active);
    assert_eq!(active.activation_height, Some(9));

    // The borrower's secret is now public on the settlement chain.
    let revealed = world
        .book
        .locks()
        .revealed_secret(&world.borrower.secret.commitment())
        .expect("secret revealed");
    assert_eq!(revealed, world.borrower.secret);
    assert_eq!(world.balance(&world.borrower), BORROWER_FUNDS + PRINCIPAL);
    assert_eq!(world.book.held_bond(id), Some(BOND));
}

#[tokio::test]
async fn test_only_borrower_may_accept() {
    let world = World::new(2);
    let (id, _) = world.request().await;
    world.offer(id);

    let err = world
        .book
        .accept(&world.lender.account, id, &world.borrower.secret)
        .unwrap_err();
    assert!(matches!(err, SettlementError::RoleViolation { .. }));

    let err = world
        .book
        .accept(&world.borrower.account, id, &world.lender.secret)
        .unwrap_err();
    assert!(matches!(err, SettlementError::PreimageMismatch(_)));
    assert_eq!(world.book.get_loan(id).unwrap().status, LoanStatus::Offered);
}

// =========================================================================
// Scenario B: offer lapses -> withdraw-offer, borrower exits the escrow
// =========================================================================

#[tokio::test]
async fn test_scenario_b_offer_lapses() {
    let world = World::new(3);
    let (id, escrow_outpoint) = world.request().await;
    world.offer(id);

    world.book.advance(9);
    let err = world
        .book
        .withdraw_offer(&world.lender.account, id)
        .unwrap_err();
    assert!(matches!(
        err,
        SettlementError::TooEarly {
            height: 9,
            unlock_height: 10,
            ..
        }
    ));

    world.book.advance(1);
    let err = world
        .book
        .accept(&world.borrower.account, id, &world.borrower.secret)
        .unwrap_err();
    assert!(matches!(err, SettlementError::Expired { deadline: 10, .. }));

    let loan = world
        .book
        .withdraw_offer(&world.lender.account, id)
        .expect("withdraw");
    assert_eq!(loan.status, LoanStatus::RefundedToLender);
    assert_eq!(world.balance(&world.lender), LENDER_FUNDS);
    assert_eq!(world.book.held_bond(id), None);
    assert_eq!(world.book.active_loan_of(&world.borrower.account), None);

    // Accept stays closed after the refund.
    let err = world
        .book
        .accept(&world.borrower.account, id, &world.borrower.secret)
        .unwrap_err();
    assert!(matches!(err, SettlementError::Expired { .. }));

    // On Bitcoin the borrower takes the escrow back through E2.
    let escrow = world.escrow_output();
    let template = transactions::escrow_exit(
        &escrow,
        escrow_outpoint,
        Sats::from_sat(ESCROW_SATS),
        world.borrower.payout_script(),
        Sats::from_sat(MINER_FEE_SATS),
    )
    .unwrap();
    let mut exit = PresignedSpend::new(template, escrow.clone()).unwrap();
    exit.sign(hashloan_core::Role::Borrower, &world.borrower.keys)
        .unwrap();
    let tx = exit.finalize(None).unwrap();

    let err = world.bitcoin.broadcast(&tx).await.unwrap_err();
    assert!(matches!(err, UtxoError::NonFinal { .. }));

    // Funded at height 1; the escrow lock is 10 blocks.
    world.mine_to(u64::from(escrow.csv())).await;
    world.bitcoin.broadcast(&tx).await.expect("escrow exit");
    assert!(world
        .bitcoin
        .unspent_output(&escrow_outpoint)
        .await
        .unwrap()
        .is_none());
}

// =========================================================================
// Scenario C: activate -> repay -> release the collateral through C1
// =========================================================================

#[tokio::test]
async fn test_scenario_c_repaid_and_collateral_released() {
    let world = World::new(4);
    let (id, escrow_outpoint) = world.request().await;
    let offered = world.offer(id);

    // Both Bitcoin spends are signed before any secret is known.
    let lock = world.presign_collateral_lock(&offered, escrow_outpoint);
    let release = world.presign_collateral_release(&offered, &lock);
    assert!(lock.is_complete());
    assert!(release.is_complete());

    world.accept(id);
    let secret_b = world
        .book
        .locks()
        .revealed_secret(&offered.hash_borrower)
        .unwrap();
    let lock_tx = lock.finalize(Some(&secret_b)).unwrap();
    world.bitcoin.broadcast(&lock_tx).await.expect("collateral lock");
    world.bitcoin.mine_blocks(1).await.unwrap();

    world.book.advance(50);
    let repaying = world
        .book
        .attempt_repay(&world.borrower.account, id)
        .expect("attempt repay");
    assert_eq!(repaying.status, LoanStatus::RepaymentInProgress);

    // Without the lender's secret C1 cannot be completed.
    assert!(matches!(
        release.finalize(None),
        Err(UtxoError::InvalidWitness(_))
    ));

    world.book.advance(9);
    let repaid = world
        .book
        .accept_repay(&world.lender.account, id, &world.lender.secret)
        .expect("accept repay");
    assert_eq!(repaid.status, LoanStatus::Repaid);
    assert_eq!(world.balance(&world.lender), LENDER_FUNDS);
    assert_eq!(world.balance(&world.borrower), BORROWER_FUNDS);

    let secret_l = world
        .book
        .locks()
        .revealed_secret(&world.lender.secret.commitment())
        .expect("lender secret revealed");
    let release_tx = release.finalize(Some(&secret_l)).unwrap();
    world
        .bitcoin
        .broadcast(&release_tx)
        .await
        .expect("collateral release");
    assert_eq!(
        verify_spend(
            &release_tx,
            0,
            &[release.template().prevout().clone()],
            release.output()
        )
        .unwrap(),
        LeafKind::CollateralRelease
    );
    let collateral_outpoint = release_tx.input[0].previous_output;
    assert_eq!(collateral_outpoint.txid, lock_tx.compute_txid());
}

// =========================================================================
// Scenario D: repayment lapses -> withdraw-repay slashes the bond
// =========================================================================

#[tokio::test]
async fn test_scenario_d_repayment_lapses() {
    let world = World::new(5);
    let (loan, _) = world.activate().await;
    let id = loan.id;

    world
        .book
        .attempt_repay(&world.borrower.account, id)
        .expect("attempt repay");

    world.book.advance(5);
    let err = world
        .book
        .withdraw_repay(&world.borrower.account, id)
        .unwrap_err();
    assert!(matches!(err, SettlementError::TooEarly { unlock_height: 10, .. }));

    world.book.advance(5);
    let err = world
        .book
        .accept_repay(&world.lender.account, id, &world.lender.secret)
        .unwrap_err();
    assert!(matches!(err, SettlementError::Expired { deadline: 10, .. }));

    let refunded = world
        .book
        .withdraw_repay(&world.borrower.account, id)
        .expect("withdraw repay");
    assert_eq!(refunded.status, LoanStatus::RefundedToBorrower);
    assert_eq!(
        world.balance(&world.borrower),
        BORROWER_FUNDS + PRINCIPAL + BOND
    );
    assert_eq!(world.balance(&world.lender), LENDER_FUNDS - PRINCIPAL - BOND);
    assert!(world
        .book
        .locks()
        .revealed_secret(&world.lender.secret.commitment())
        .is_none());

    // Only the borrower may withdraw, and only once.
    let err = world
        .book
        .withdraw_repay(&world.borrower.account, id)
        .unwrap_err();
    assert!(matches!(err, SettlementError::Core(_) | SettlementError::AlreadySettled(_)));
}

#[tokio::test]
async fn test_withdraw_repay_after_claim_is_rejected() {
    let world = World::new(6);
    let (loan, _) = world.activate().await;
    world
        .book
        .attempt_repay(&world.borrower.account, loan.id)
        .unwrap();
    world
        .book
        .accept_repay(&world.lender.account, loan.id, &world.lender.secret)
        .unwrap();

    world.book.advance(20);
    assert!(world
        .book
        .withdraw_repay(&world.borrower.account, loan.id)
        .is_err());
    assert_eq!(world.balance(&world.lender), LENDER_FUNDS);
}

// =========================================================================
// Scenario E: no repayment -> default; lender captures through C2
// =========================================================================

#[tokio::test]
async fn test_scenario_e_default_and_capture() {
    let world = World::new(7);
    let (id, escrow_outpoint) = world.request().await;
    let offered = world.offer(id);
    let lock = world.presign_collateral_lock(&offered, escrow_outpoint);
    world.accept(id);

    let lock_tx = lock.finalize(Some(&world.borrower.secret)).unwrap();
    world.bitcoin.broadcast(&lock_tx).await.unwrap();
    let confirmed_at = world.bitcoin.mine_blocks(1).await.unwrap();

    world.book.advance(99);
    let err = world
        .book
        .default_loan(&world.lender.account, id)
        .unwrap_err();
    assert!(matches!(err, SettlementError::TooEarly { unlock_height: 100, .. }));

    world.book.advance(1);
    let err = world
        .book
        .attempt_repay(&world.borrower.account, id)
        .unwrap_err();
    assert!(matches!(err, SettlementError::Expired { .. }));

    let defaulted = world
        .book
        .default_loan(&world.lender.account, id)
        .expect("default");
    assert_eq!(defaulted.status, LoanStatus::Defaulted);
    assert_eq!(world.balance(&world.lender), LENDER_FUNDS - PRINCIPAL);
    assert_eq!(world.book.active_loan_of(&world.borrower.account), None);

    // The borrower can never complete C1: the lender's secret stays private.
    let release = world.presign_collateral_release(&offered, &lock);
    assert!(release.finalize(None).is_err());

    // C2 waits out the collateral lock, then the lender alone can spend.
    let capture = world.collateral_capture(&offered, &lock);
    let capture_tx = capture.finalize(None).unwrap();
    let csv = u64::from(capture.output().csv());

    world.mine_to(confirmed_at + csv - 2).await;
    let err = world.bitcoin.broadcast(&capture_tx).await.unwrap_err();
    assert!(matches!(err, UtxoError::NonFinal { .. }));

    world.mine_to(confirmed_at + csv - 1).await;
    world
        .bitcoin
        .broadcast(&capture_tx)
        .await
        .expect("collateral capture");
    let collateral_outpoint = OutPoint::new(lock_tx.compute_txid(), 1);
    let spender = world
        .bitcoin
        .spending_tx(&collateral_outpoint)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(spender.compute_txid(), capture_tx.compute_txid());
}

#[tokio::test]
async fn test_terminal_loan_can_be_deleted_and_borrower_reused() {
    let world = World::new(8);
    let (id, _) = world.request().await;
    world.offer(id);
    world.book.advance(10);
    world
        .book
        .withdraw_offer(&world.lender.account, id)
        .unwrap();

    let err = world
        .book
        .delete(&hashloan_core::Account::new("stranger"), id)
        .unwrap_err();
    assert!(matches!(err, SettlementError::NotAParty { .. }));

    world.book.delete(&world.borrower.account, id).unwrap();
    assert!(world.book.get_loan(id).is_none());
    assert!(world.book.is_empty());
}
