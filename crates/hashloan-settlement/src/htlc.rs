use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use hashloan_core::{Account, Amount, BlockHeight, PreimageHash};
use hashloan_crypto::Preimage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::SettlementError;
use crate::ledger::Ledger;

/// Status of a hash lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockStatus {
    /// Funds are held, awaiting claim or refund.
    Locked,
    /// The secret was revealed and funds released to the claimant.
    Claimed,
    /// The timelock passed and funds went back to the refund account.
    Refunded,
}

impl std::fmt::Display for LockStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Locked => write!(f, "Locked"),
            Self::Claimed => write!(f, "Claimed"),
            Self::Refunded => write!(f, "Refunded"),
        }
    }
}

/// Terms a lock is created with. Claims and refunds must present the same terms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockTerms {
    pub amount: Amount,
    pub refund_to: Account,
    /// Absolute height at which the claim window closes and refund opens.
    pub timelock: BlockHeight,
}

/// A hash-locked, time-locked value escrow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashLock {
    /// SHA-256 of the secret that releases the funds.
    pub hash: PreimageHash,
    pub terms: LockTerms,
    pub funder: Account,
    pub status: LockStatus,
    /// Where the funds went once settled.
    pub settled_to: Option<Account>,
    /// Public once claimed.
    pub secret: Option<Preimage>,
    pub lock_height: BlockHeight,
    pub settle_height: Option<BlockHeight>,
    pub created_at: DateTime<Utc>,
}

/// Manager for hash-lock lifecycle operations.
///
/// Every lock is keyed by its digest and can be created once and settled
/// once. Operations on one digest are serialized by the map entry lock, so
/// of two concurrent claims exactly one wins.
pub struct HashLockManager {
    locks: DashMap<PreimageHash, HashLock>,
    ledger: Arc<Ledger>,
}

impl HashLockManager {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self {
            locks: DashMap::new(),
            ledger,
        }
    }

    /// Escrow `terms.amount` from `funder` under `hash`.
    ///
    /// Fails with `LockExists` if a lock for `hash` was ever created.
    pub fn lock(
        &self,
        hash: PreimageHash,
        terms: LockTerms,
        funder: &Account,
        now: BlockHeight,
    ) -> Result<HashLock, SettlementError> {
        if terms.amount == 0 {
            return Err(SettlementError::InvalidAmount("cannot lock zero".into()));
        }
        let vacant = match self.locks.entry(hash) {
            Entry::Occupied(_) => return Err(SettlementError::LockExists(hash)),
            Entry::Vacant(v) => v,
        };

        self.ledger.debit(funder, terms.amount)?;

        let lock = HashLock {
            hash,
            terms,
            funder: funder.clone(),
            status: LockStatus::Locked,
            settled_to: None,
            secret: None,
            lock_height: now,
            settle_height: None,
            created_at: Utc::now(),
        };
        vacant.insert(lock.clone());
        tracing::info!(
            hash = %hash,
            amount = lock.terms.amount,
            timelock = lock.terms.timelock,
            "value locked"
        );
        Ok(lock)
    }

    /// Release the funds under `hash` to `claim_to` by revealing `secret`.
    ///
    /// Succeeds only while `now < timelock` and only if `SHA-256(secret)`
    /// equals `hash`.
    pub fn claim(
        &self,
        hash: PreimageHash,
        secret: &Preimage,
        terms: &LockTerms,
        claim_to: &Account,
        now: BlockHeight,
    ) -> Result<HashLock, SettlementError> {
        let mut entry = self
            .locks
            .get_mut(&hash)
            .ok_or(SettlementError::LockNotFound(hash))?;
        let lock = entry.value_mut();

        if lock.status != LockStatus::Locked {
            return Err(SettlementError::AlreadySettled(hash));
        }
        check_terms(lock, terms)?;

        if now >= lock.terms.timelock {
            return Err(SettlementError::Expired {
                action: "claim",
                height: now,
                deadline: lock.terms.timelock,
            });
        }

        if !secret.verify(&hash) {
            return Err(SettlementError::PreimageMismatch(hash));
        }

        self.ledger.credit(claim_to, lock.terms.amount)?;
        lock.status = LockStatus::Claimed;
        lock.settled_to = Some(claim_to.clone());
        lock.secret = Some(secret.clone());
        lock.settle_height = Some(now);

        tracing::info!(hash = %hash, claim_to = %claim_to, "lock claimed, secret revealed");
        Ok(lock.clone())
    }

    /// Return the funds under `hash` to the refund account once `now >= timelock`.
    pub fn refund(
        &self,
        hash: PreimageHash,
        terms: &LockTerms,
        now: BlockHeight,
    ) -> Result<HashLock, SettlementError> {
        let mut entry = self
            .locks
            .get_mut(&hash)
            .ok_or(SettlementError::LockNotFound(hash))?;
        let lock = entry.value_mut();

        if lock.status != LockStatus::Locked {
            return Err(SettlementError::AlreadySettled(hash));
        }
        check_terms(lock, terms)?;

        if now < lock.terms.timelock {
            return Err(SettlementError::TooEarly {
                action: "refund",
                height: now,
                unlock_height: lock.terms.timelock,
            });
        }

        self.ledger.credit(&lock.terms.refund_to, lock.terms.amount)?;
        lock.status = LockStatus::Refunded;
        lock.settled_to = Some(lock.terms.refund_to.clone());
        lock.settle_height = Some(now);

        tracing::info!(hash = %hash, refund_to = %lock.terms.refund_to, "lock refunded");
        Ok(lock.clone())
    }

    pub fn get(&self, hash: &PreimageHash) -> Option<HashLock> {
        self.locks.get(hash).map(|e| e.value().clone())
    }

    pub fn status(&self, hash: &PreimageHash) -> Option<LockStatus> {
        self.locks.get(hash).map(|e| e.status)
    }

    /// The secret revealed by a successful claim, if any.
    pub fn revealed_secret(&self, hash: &PreimageHash) -> Option<Preimage> {
        self.locks.get(hash).and_then(|e| e.secret.clone())
    }

    /// Total value currently held in unsettled locks.
    pub fn locked_value(&self) -> Amount {
        self.locks
            .iter()
            .filter(|e| e.status == LockStatus::Locked)
            .map(|e| e.terms.amount)
            .sum()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

fn check_terms(lock: &HashLock, terms: &LockTerms) -> Result<(), SettlementError> {
    let field = if lock.terms.amount != terms.amount {
        "amount"
    } else if lock.terms.refund_to != terms.refund_to {
        "refund account"
    } else if lock.terms.timelock != terms.timelock {
        "timelock"
    } else {
        return Ok(());
    };
    Err(SettlementError::LockMismatch {
        hash: lock.hash,
        field,
    })
}
