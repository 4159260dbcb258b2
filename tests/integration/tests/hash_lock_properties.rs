//! Integration test: properties of the settlement-chain value lock.
//!
//! Single settlement per digest, commit-reveal on the exact secret only,
//! and refunds that open exactly at the timelock.

use std::sync::Arc;

use hashloan_core::{Account, Role};
use hashloan_crypto::Preimage;
use hashloan_settlement::{HashLockManager, Ledger, LockStatus, LockTerms, SettlementError};

const AMOUNT: u128 = 50;
const TIMELOCK: u64 = 20;

fn setup() -> (Arc<Ledger>, HashLockManager, Account) {
    let ledger = Arc::new(Ledger::new());
    let funder = Account::new("funder");
    ledger.credit(&funder, 10_000).unwrap();
    let manager = HashLockManager::new(ledger.clone());
    (ledger, manager, funder)
}

fn terms(funder: &Account) -> LockTerms {
    LockTerms {
        amount: AMOUNT,
        refund_to: funder.clone(),
        timelock: TIMELOCK,
    }
}

// =========================================================================
// No double settlement
// =========================================================================

#[test]
fn test_claim_then_any_settlement_fails() {
    let (ledger, manager, funder) = setup();
    let secret = Preimage::derive_for(Role::Borrower, 1);
    let hash = secret.commitment();
    let claimant = Account::new("claimant");
    manager.lock(hash, terms(&funder), &funder, 0).unwrap();

    manager
        .claim(hash, &secret, &terms(&funder), &claimant, 5)
        .unwrap();
    assert_eq!(ledger.balance(&claimant), AMOUNT);

    let again = manager.claim(hash, &secret, &terms(&funder), &claimant, 6);
    assert!(matches!(again, Err(SettlementError::AlreadySettled(_))));
    let refund = manager.refund(hash, &terms(&funder), TIMELOCK);
    assert!(matches!(refund, Err(SettlementError::AlreadySettled(_))));
    assert_eq!(ledger.balance(&claimant), AMOUNT);
}

#[test]
fn test_refund_then_any_settlement_fails() {
    let (ledger, manager, funder) = setup();
    let secret = Preimage::derive_for(Role::Lender, 2);
    let hash = secret.commitment();
    manager.lock(hash, terms(&funder), &funder, 0).unwrap();

    manager.refund(hash, &terms(&funder), TIMELOCK).unwrap();
    assert_eq!(manager.status(&hash), Some(LockStatus::Refunded));
    assert_eq!(ledger.balance(&funder), 10_000);

    let refund = manager.refund(hash, &terms(&funder), TIMELOCK + 1);
    assert!(matches!(refund, Err(SettlementError::AlreadySettled(_))));
    // Even a claim made with the right secret loses once the lock settled.
    let claim = manager.claim(hash, &secret, &terms(&funder), &funder, 1);
    assert!(matches!(claim, Err(SettlementError::AlreadySettled(_))));
    assert!(manager.revealed_secret(&hash).is_none());
}

#[test]
fn test_concurrent_claims_have_one_winner() {
    let (ledger, manager, funder) = setup();
    let manager = Arc::new(manager);
    let secret = Preimage::derive_for(Role::Borrower, 3);
    let hash = secret.commitment();
    manager.lock(hash, terms(&funder), &funder, 0).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let manager = manager.clone();
            let secret = secret.clone();
            let funder = funder.clone();
            std::thread::spawn(move || {
                let claimant = Account::new(format!("claimant-{i}"));
                manager
                    .claim(hash, &secret, &terms(&funder), &claimant, 1)
                    .is_ok()
            })
        })
        .collect();

    let winners = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|won| *won)
        .count();
    assert_eq!(winners, 1);
    assert_eq!(ledger.total(), 10_000);
}

#[test]
fn test_lock_digest_is_single_use() {
    let (_, manager, funder) = setup();
    let hash = Preimage::derive_for(Role::Borrower, 4).commitment();
    manager.lock(hash, terms(&funder), &funder, 0).unwrap();
    manager.refund(hash, &terms(&funder), TIMELOCK).unwrap();

    // A settled digest can never be locked again.
    let relock = manager.lock(hash, terms(&funder), &funder, TIMELOCK);
    assert!(matches!(relock, Err(SettlementError::LockExists(_))));
}

// =========================================================================
// Commit-reveal round trip
// =========================================================================

#[test]
fn test_every_single_bit_flip_fails_claim() {
    let (_, manager, funder) = setup();
    let secret = Preimage::derive_for(Role::Lender, 5);
    let hash = secret.commitment();
    let claimant = Account::new("claimant");
    manager.lock(hash, terms(&funder), &funder, 0).unwrap();

    for bit in 0..256 {
        let mut bytes = *secret.as_bytes();
        bytes[bit / 8] ^= 1 << (bit % 8);
        let mutated = Preimage::from_bytes(bytes);
        let result = manager.claim(hash, &mutated, &terms(&funder), &claimant, 1);
        assert!(
            matches!(result, Err(SettlementError::PreimageMismatch(_))),
            "bit {bit} flip was accepted"
        );
    }
    assert_eq!(manager.status(&hash), Some(LockStatus::Locked));

    manager
        .claim(hash, &secret, &terms(&funder), &claimant, 1)
        .unwrap();
    assert_eq!(manager.revealed_secret(&hash), Some(secret));
}

#[test]
fn test_claim_requires_matching_terms() {
    let (_, manager, funder) = setup();
    let secret = Preimage::derive_for(Role::Borrower, 6);
    let hash = secret.commitment();
    manager.lock(hash, terms(&funder), &funder, 0).unwrap();

    let mut wrong = terms(&funder);
    wrong.amount += 1;
    let result = manager.claim(hash, &secret, &wrong, &funder, 1);
    assert!(matches!(result, Err(SettlementError::LockMismatch { .. })));
}

// =========================================================================
// Timeout monotonicity
// =========================================================================

#[test]
fn test_refund_opens_exactly_at_timelock() {
    let (_, manager, funder) = setup();

    for height in 0..(2 * TIMELOCK) {
        let hash = Preimage::derive(b"monotonic", height).commitment();
        manager.lock(hash, terms(&funder), &funder, 0).unwrap();
        let result = manager.refund(hash, &terms(&funder), height);
        if height < TIMELOCK {
            assert!(
                matches!(
                    result,
                    Err(SettlementError::TooEarly {
                        unlock_height: TIMELOCK,
                        ..
                    })
                ),
                "refund at {height} should be too early"
            );
        } else {
            assert!(result.is_ok(), "refund at {height} should succeed");
        }
    }
}

#[test]
fn test_claim_closes_exactly_at_timelock() {
    let (_, manager, funder) = setup();
    let claimant = Account::new("claimant");

    for height in [TIMELOCK - 1, TIMELOCK, TIMELOCK + 1] {
        let secret = Preimage::derive(b"closing", height);
        let hash = secret.commitment();
        manager.lock(hash, terms(&funder), &funder, 0).unwrap();
        let result = manager.claim(hash, &secret, &terms(&funder), &claimant, height);
        if height < TIMELOCK {
            assert!(result.is_ok());
        } else {
            assert!(matches!(result, Err(SettlementError::Expired { .. })));
        }
    }
}
