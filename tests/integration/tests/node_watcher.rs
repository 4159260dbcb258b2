//! Integration test: the devnet node completes presigned spends on its own.
//!
//! A borrower and lender register their signed E1 and C1 spends with the
//! node's watcher; once the book reveals each secret the watcher broadcasts
//! the matching Bitcoin transaction, and the mirror persists every step.

use std::time::Duration;

use bitcoin::OutPoint;
use hashloan_core::{LoanStatus, Role};
use hashloan_integration_tests::{
    params, temp_dir, Party, World, BORROWER_FUNDS, LENDER_FUNDS,
};
use hashloan_node::config::DevAccount;
use hashloan_node::{HashloanConfig, HashloanNode, SpendWatcher};
use hashloan_utxo::{BitcoinNode, LeafKind, COLLATERAL_VOUT};

fn config(dir: &std::path::Path, borrower: &Party, lender: &Party) -> HashloanConfig {
    let mut config = HashloanConfig::default();
    config.storage.data_dir = dir.to_path_buf();
    config.protocol = params();
    config.devnet.accounts = vec![
        DevAccount {
            name: borrower.account.clone(),
            balance: BORROWER_FUNDS,
        },
        DevAccount {
            name: lender.account.clone(),
            balance: LENDER_FUNDS,
        },
    ];
    config
}

async fn wait_for_spend(world: &World, outpoint: &OutPoint) -> bitcoin::Transaction {
    for _ in 0..200 {
        if let Some(tx) = world.bitcoin.spending_tx(outpoint).await.unwrap() {
            return tx;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("no spend of {outpoint} was broadcast");
}

async fn started_node(index: u64) -> (HashloanNode, World, std::path::PathBuf) {
    let dir = temp_dir("hashloan-node-it");
    let borrower = Party::new(Role::Borrower, index);
    let lender = Party::new(Role::Lender, index);
    let mut node = HashloanNode::new(config(&dir, &borrower, &lender)).unwrap();
    node.start().await.unwrap();
    let world = World::with(
        node.book().clone(),
        node.bitcoin().clone(),
        borrower,
        lender,
    );
    (node, world, dir)
}

// =========================================================================
// Happy path driven by the watcher
// =========================================================================

#[tokio::test]
async fn test_watcher_completes_lock_and_release() {
    let (mut node, world, dir) = started_node(40).await;
    assert_eq!(world.balance(&world.lender), LENDER_FUNDS);

    let (id, escrow_outpoint) = world.request().await;
    let offered = world.offer(id);
    let lock = world.presign_collateral_lock(&offered, escrow_outpoint);
    let release = world.presign_collateral_release(&offered, &lock);

    let watcher = node.watcher().clone();
    assert_eq!(watcher.watch(id, lock.clone()).await.unwrap(), None);
    assert_eq!(watcher.watch(id, release.clone()).await.unwrap(), None);
    assert_eq!(watcher.pending_len(), 2);

    // Accepting reveals the borrower's secret; the watcher moves the escrow.
    world.accept(id);
    let lock_tx = wait_for_spend(&world, &escrow_outpoint).await;
    assert_eq!(lock_tx.compute_txid(), lock.template().txid());
    assert!(!watcher.is_watching(id, LeafKind::EscrowCooperative));

    world
        .book
        .attempt_repay(&world.borrower.account, id)
        .unwrap();
    world
        .book
        .accept_repay(&world.lender.account, id, &world.lender.secret)
        .unwrap();

    // Accepting the repayment reveals the lender's secret; the collateral
    // returns to the borrower.
    let collateral_outpoint = OutPoint::new(lock_tx.compute_txid(), COLLATERAL_VOUT);
    let release_tx = wait_for_spend(&world, &collateral_outpoint).await;
    assert_eq!(release_tx.output[0].script_pubkey, world.borrower.payout_script());
    assert_eq!(watcher.pending_len(), 0);

    // The mirror catches up with the final state.
    let storage = node.storage().unwrap().clone();
    let mut status = None;
    for _ in 0..200 {
        status = storage.get_loan(id).unwrap().map(|l| l.status);
        if status == Some(LoanStatus::Repaid) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(status, Some(LoanStatus::Repaid));
    assert_eq!(storage.loans_of_borrower(&world.borrower.account).unwrap(), vec![id]);

    drop(storage);
    node.shutdown().await.unwrap();
    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn test_stored_signatures_restore_watched_spends() {
    let (mut node, world, dir) = started_node(43).await;
    let (id, escrow_outpoint) = world.request().await;
    let offered = world.offer(id);
    let lock = world.presign_collateral_lock(&offered, escrow_outpoint);
    let release = world.presign_collateral_release(&offered, &lock);
    node.watcher().watch(id, lock.clone()).await.unwrap();
    node.watcher().watch(id, release).await.unwrap();

    // Two lender-and-borrower signatures on E1, one borrower signature on C1.
    let storage = node.storage().unwrap().clone();
    assert_eq!(storage.envelopes_for(id).unwrap().len(), 3);

    // A watcher that never saw the registrations rebuilds both spends.
    let restored = SpendWatcher::new(node.book().clone(), node.bitcoin().clone());
    restored.attach_storage(Some(storage.clone()));
    assert_eq!(restored.restore().await.unwrap(), 2);
    assert!(restored.is_watching(id, LeafKind::EscrowCooperative));
    assert!(restored.is_watching(id, LeafKind::CollateralRelease));

    // Once the secret is out, the restored E1 completes to the same transaction.
    world.accept(id);
    let lock_tx = wait_for_spend(&world, &escrow_outpoint).await;
    assert_eq!(lock_tx.compute_txid(), lock.template().txid());
    assert_eq!(restored.replay().await, 1);
    assert!(!restored.is_watching(id, LeafKind::EscrowCooperative));

    restored.attach_storage(None);
    drop(restored);
    drop(storage);
    node.shutdown().await.unwrap();
    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn test_late_registration_broadcasts_immediately() {
    let (mut node, world, dir) = started_node(41).await;
    let (id, escrow_outpoint) = world.request().await;
    let offered = world.offer(id);
    let lock = world.presign_collateral_lock(&offered, escrow_outpoint);
    world.accept(id);

    // The secret is already public, so registering completes the spend.
    let txid = node
        .watcher()
        .watch(id, lock)
        .await
        .unwrap()
        .expect("broadcast on registration");
    let spender = world
        .bitcoin
        .spending_tx(&escrow_outpoint)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(spender.compute_txid(), txid);
    assert_eq!(node.watcher().pending_len(), 0);

    node.shutdown().await.unwrap();
    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn test_timeout_spend_cannot_be_watched() {
    let (mut node, world, dir) = started_node(42).await;
    let (id, escrow_outpoint) = world.request().await;
    let offered = world.offer(id);
    let lock = world.presign_collateral_lock(&offered, escrow_outpoint);
    let capture = world.collateral_capture(&offered, &lock);

    assert!(node.watcher().watch(id, capture).await.is_err());
    assert_eq!(node.watcher().pending_len(), 0);

    node.shutdown().await.unwrap();
    std::fs::remove_dir_all(&dir).ok();
}
