use async_trait::async_trait;
use bitcoin::XOnlyPublicKey;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use hashloan_core::{
    Account, Actor, Amount, BlockHeight, CoreError, Loan, LoanAction, LoanId, LoanRequest,
    LoanStateMachine, PreimageHash, ProtocolParams,
};
use hashloan_crypto::Preimage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::SettlementError;
use crate::events::{LoanEvent, LoanEventKind};
use crate::htlc::{HashLockManager, LockStatus, LockTerms};
use crate::ledger::Ledger;
use crate::traits::SettlementChain;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// The settlement-chain loan contract.
///
/// Each transition holds the loan's map entry for its whole duration, so
/// transitions on one loan are serialized while distinct loans proceed in
/// parallel. Window-closing checks (`Expired`) run before the state check,
/// window-opening checks (`TooEarly`) after it.
pub struct LoanBook {
    /// Identifies this book instance. Loan ids and event sequence numbers
    /// are only unique within one epoch.
    epoch: Uuid,
    params: ProtocolParams,
    ledger: Arc<Ledger>,
    locks: HashLockManager,
    loans: DashMap<LoanId, Loan>,
    active_by_borrower: DashMap<Account, LoanId>,
    /// Every commitment ever used, by the loan that used it.
    commitments: DashMap<PreimageHash, LoanId>,
    held_bonds: DashMap<LoanId, Amount>,
    events: DashMap<u64, LoanEvent>,
    next_loan_id: AtomicU64,
    next_seq: AtomicU64,
    height: AtomicU64,
    event_tx: broadcast::Sender<LoanEvent>,
}

impl LoanBook {
    pub fn new(params: ProtocolParams, ledger: Arc<Ledger>) -> Result<Self, SettlementError> {
        params.validate()?;
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            epoch: Uuid::now_v7(),
            params,
            locks: HashLockManager::new(ledger.clone()),
            ledger,
            loans: DashMap::new(),
            active_by_borrower: DashMap::new(),
            commitments: DashMap::new(),
            held_bonds: DashMap::new(),
            events: DashMap::new(),
            next_loan_id: AtomicU64::new(1),
            next_seq: AtomicU64::new(0),
            height: AtomicU64::new(0),
            event_tx,
        })
    }

    pub fn epoch(&self) -> Uuid {
        self.epoch
    }

    // ---- chain clock ----

    pub fn height(&self) -> BlockHeight {
        self.height.load(Ordering::SeqCst)
    }

    /// Produce `blocks` empty blocks. Returns the new height.
    pub fn advance(&self, blocks: u64) -> BlockHeight {
        self.height.fetch_add(blocks, Ordering::SeqCst) + blocks
    }

    /// Move the height forward to `height`. Never moves it back.
    pub fn advance_to(&self, height: BlockHeight) -> BlockHeight {
        self.height.fetch_max(height, Ordering::SeqCst).max(height)
    }

    // ---- transitions ----

    /// Open a loan. The borrower must not have another non-terminal loan.
    pub fn request(
        &self,
        caller: &Account,
        request: LoanRequest,
    ) -> Result<LoanId, SettlementError> {
        let now = self.height();
        let vacant = match self.active_by_borrower.entry(caller.clone()) {
            Entry::Occupied(e) => {
                return Err(SettlementError::ActiveLoanExists {
                    borrower: caller.clone(),
                    loan_id: *e.get(),
                });
            }
            Entry::Vacant(v) => v,
        };

        let mut loan = Loan::new(LoanId(0), caller.clone(), request, &self.params, now)?;
        let commitment = match self.commitments.entry(loan.hash_borrower) {
            Entry::Occupied(_) => {
                return Err(SettlementError::DuplicateCommitment(loan.hash_borrower));
            }
            Entry::Vacant(v) => v,
        };

        let id = LoanId(self.next_loan_id.fetch_add(1, Ordering::SeqCst));
        loan.id = id;
        commitment.insert(id);
        vacant.insert(id);

        let kind = LoanEventKind::Requested {
            borrower: caller.clone(),
            principal: loan.principal,
            hash_borrower: loan.hash_borrower,
            borrower_key: loan.borrower_key,
            escrow_outpoint: loan.escrow_outpoint,
        };
        let _guard = self.loans.entry(id).or_insert(loan);
        self.emit(id, now, kind);

        tracing::info!(loan_id = %id, borrower = %caller, "loan requested");
        Ok(id)
    }

    /// Lock the principal under the borrower's hash and post the bond.
    pub fn offer(
        &self,
        caller: &Account,
        loan_id: LoanId,
        hash_lender: PreimageHash,
        lender_key: XOnlyPublicKey,
    ) -> Result<Loan, SettlementError> {
        let now = self.height();
        let mut entry = self.loan_mut(loan_id)?;
        let loan = entry.value_mut();

        authorize(loan, caller, LoanAction::Offer)?;
        let next = LoanStateMachine::transition(loan.status, LoanAction::Offer)?;

        if hash_lender == loan.hash_borrower {
            return Err(SettlementError::DuplicateCommitment(hash_lender));
        }
        let commitment = match self.commitments.entry(hash_lender) {
            Entry::Occupied(_) => return Err(SettlementError::DuplicateCommitment(hash_lender)),
            Entry::Vacant(v) => v,
        };

        let bond = self.params.bond_for(loan.principal)?;
        let needed = loan.principal.checked_add(bond).ok_or_else(|| {
            SettlementError::InvalidAmount(format!("principal {} plus bond overflows", loan.principal))
        })?;
        let available = self.ledger.balance(caller);
        if available < needed {
            return Err(SettlementError::InsufficientBalance {
                account: caller.clone(),
                available,
                required: needed,
            });
        }

        let deadline = now.saturating_add(loan.timelocks.accept_window);
        let terms = LockTerms {
            amount: loan.principal,
            refund_to: caller.clone(),
            timelock: deadline,
        };
        self.ledger.debit(caller, bond)?;
        if let Err(e) = self.locks.lock(loan.hash_borrower, terms, caller, now) {
            self.ledger.credit(caller, bond)?;
            return Err(e);
        }
        commitment.insert(loan_id);
        self.held_bonds.insert(loan_id, bond);

        loan.lender = Some(caller.clone());
        loan.lender_key = Some(lender_key);
        loan.hash_lender = Some(hash_lender);
        loan.bond_amount = Some(bond);
        loan.offer_height = Some(now);
        loan.status = next;

        self.emit(
            loan_id,
            now,
            LoanEventKind::Offered {
                lender: caller.clone(),
                bond_amount: bond,
                hash_lender,
                lender_key,
                accept_deadline: deadline,
            },
        );
        tracing::info!(loan_id = %loan_id, lender = %caller, bond, "loan offered");
        Ok(loan.clone())
    }

    /// Reclaim principal and bond after the borrower let the offer lapse.
    pub fn withdraw_offer(&self, caller: &Account, loan_id: LoanId) -> Result<Loan, SettlementError> {
        let now = self.height();
        let loan = {
            let mut entry = self.loan_mut(loan_id)?;
            let loan = entry.value_mut();

            authorize(loan, caller, LoanAction::WithdrawOffer)?;
            let next = LoanStateMachine::transition(loan.status, LoanAction::WithdrawOffer)?;

            let deadline = required(loan.accept_deadline(), loan_id, "offer height")?;
            if now < deadline {
                return Err(SettlementError::TooEarly {
                    action: LoanAction::WithdrawOffer.as_str(),
                    height: now,
                    unlock_height: deadline,
                });
            }

            let terms = LockTerms {
                amount: loan.principal,
                refund_to: caller.clone(),
                timelock: deadline,
            };
            self.locks.refund(loan.hash_borrower, &terms, now)?;
            self.release_bond(loan_id, caller)?;
            loan.status = next;

            self.emit(loan_id, now, LoanEventKind::RefundedToLender);
            tracing::info!(loan_id = %loan_id, "offer withdrawn, lender refunded");
            loan.clone()
        };
        self.clear_active(&loan);
        Ok(loan)
    }

    /// Claim the principal by revealing the borrower's secret.
    pub fn accept(
        &self,
        caller: &Account,
        loan_id: LoanId,
        secret_borrower: &Preimage,
    ) -> Result<Loan, SettlementError> {
        let now = self.height();
        let mut entry = self.loan_mut(loan_id)?;
        let loan = entry.value_mut();

        authorize(loan, caller, LoanAction::Accept)?;
        if let Some(deadline) = loan.accept_deadline() {
            if now >= deadline {
                return Err(SettlementError::Expired {
                    action: LoanAction::Accept.as_str(),
                    height: now,
                    deadline,
                });
            }
        }
        let next = LoanStateMachine::transition(loan.status, LoanAction::Accept)?;

        let deadline = required(loan.accept_deadline(), loan_id, "offer height")?;
        let lender = required(loan.lender.clone(), loan_id, "lender")?;
        let terms = LockTerms {
            amount: loan.principal,
            refund_to: lender,
            timelock: deadline,
        };
        self.locks
            .claim(loan.hash_borrower, secret_borrower, &terms, caller, now)?;

        loan.activation_height = Some(now);
        loan.status = next;

        self.emit(
            loan_id,
            now,
            LoanEventKind::Activated {
                secret_borrower: secret_borrower.clone(),
            },
        );
        tracing::info!(loan_id = %loan_id, "loan activated, borrower secret revealed");
        Ok(loan.clone())
    }

    /// Lock the principal back under the lender's hash. Anyone may repay.
    pub fn attempt_repay(&self, caller: &Account, loan_id: LoanId) -> Result<Loan, SettlementError> {
        let now = self.height();
        let mut entry = self.loan_mut(loan_id)?;
        let loan = entry.value_mut();

        authorize(loan, caller, LoanAction::AttemptRepay)?;
        if let Some(maturity) = loan.maturity_height() {
            if now >= maturity {
                return Err(SettlementError::Expired {
                    action: LoanAction::AttemptRepay.as_str(),
                    height: now,
                    deadline: maturity,
                });
            }
        }
        let next = LoanStateMachine::transition(loan.status, LoanAction::AttemptRepay)?;

        let hash_lender = required(loan.hash_lender, loan_id, "lender commitment")?;
        let deadline = now.saturating_add(loan.timelocks.repay_accept_window);
        let terms = LockTerms {
            amount: loan.principal,
            refund_to: caller.clone(),
            timelock: deadline,
        };
        self.locks.lock(hash_lender, terms, caller, now)?;

        loan.repayment_height = Some(now);
        loan.repayer = Some(caller.clone());
        loan.status = next;

        self.emit(
            loan_id,
            now,
            LoanEventKind::RepaymentAttempted {
                repayer: caller.clone(),
                repay_accept_deadline: deadline,
            },
        );
        tracing::info!(loan_id = %loan_id, repayer = %caller, "repayment locked");
        Ok(loan.clone())
    }

    /// Take the repayment by revealing the lender's secret; the bond returns
    /// to the lender.
    pub fn accept_repay(
        &self,
        caller: &Account,
        loan_id: LoanId,
        secret_lender: &Preimage,
    ) -> Result<Loan, SettlementError> {
        let now = self.height();
        let loan = {
            let mut entry = self.loan_mut(loan_id)?;
            let loan = entry.value_mut();

            authorize(loan, caller, LoanAction::AcceptRepay)?;
            if let Some(deadline) = loan.repay_accept_deadline() {
                if now >= deadline {
                    return Err(SettlementError::Expired {
                        action: LoanAction::AcceptRepay.as_str(),
                        height: now,
                        deadline,
                    });
                }
            }
            let next = LoanStateMachine::transition(loan.status, LoanAction::AcceptRepay)?;

            let hash_lender = required(loan.hash_lender, loan_id, "lender commitment")?;
            let deadline =
                required(loan.repay_accept_deadline(), loan_id, "repayment height")?;
            let repayer = required(loan.repayer.clone(), loan_id, "repayer")?;
            let terms = LockTerms {
                amount: loan.principal,
                refund_to: repayer,
                timelock: deadline,
            };
            self.locks
                .claim(hash_lender, secret_lender, &terms, caller, now)?;
            self.release_bond(loan_id, caller)?;
            loan.status = next;

            self.emit(
                loan_id,
                now,
                LoanEventKind::Repaid {
                    secret_lender: secret_lender.clone(),
                },
            );
            tracing::info!(loan_id = %loan_id, "repayment accepted, lender secret revealed");
            loan.clone()
        };
        self.clear_active(&loan);
        Ok(loan)
    }

    /// Refund the repayer after the lender let the repayment lapse; the
    /// lender's bond is slashed to the borrower.
    pub fn withdraw_repay(&self, caller: &Account, loan_id: LoanId) -> Result<Loan, SettlementError> {
        let now = self.height();
        let loan = {
            let mut entry = self.loan_mut(loan_id)?;
            let loan = entry.value_mut();

            authorize(loan, caller, LoanAction::WithdrawRepay)?;
            let next = LoanStateMachine::transition(loan.status, LoanAction::WithdrawRepay)?;

            let hash_lender = required(loan.hash_lender, loan_id, "lender commitment")?;
            match self.locks.status(&hash_lender) {
                Some(LockStatus::Locked) => {}
                Some(_) => return Err(SettlementError::AlreadySettled(hash_lender)),
                None => return Err(SettlementError::LockNotFound(hash_lender)),
            }

            let deadline =
                required(loan.repay_accept_deadline(), loan_id, "repayment height")?;
            if now < deadline {
                return Err(SettlementError::TooEarly {
                    action: LoanAction::WithdrawRepay.as_str(),
                    height: now,
                    unlock_height: deadline,
                });
            }

            let repayer = required(loan.repayer.clone(), loan_id, "repayer")?;
            let terms = LockTerms {
                amount: loan.principal,
                refund_to: repayer,
                timelock: deadline,
            };
            self.locks.refund(hash_lender, &terms, now)?;
            let bond = self.release_bond(loan_id, &loan.borrower)?;
            loan.status = next;

            self.emit(
                loan_id,
                now,
                LoanEventKind::RefundedToBorrower { bond_amount: bond },
            );
            tracing::warn!(loan_id = %loan_id, bond, "repayment not accepted, lender bond slashed");
            loan.clone()
        };
        self.clear_active(&loan);
        Ok(loan)
    }

    /// Mark an unrepaid loan as defaulted; the bond returns to the lender.
    /// Collateral capture happens on the Bitcoin side.
    pub fn default_loan(&self, caller: &Account, loan_id: LoanId) -> Result<Loan, SettlementError> {
        let now = self.height();
        let loan = {
            let mut entry = self.loan_mut(loan_id)?;
            let loan = entry.value_mut();

            authorize(loan, caller, LoanAction::Default)?;
            let next = LoanStateMachine::transition(loan.status, LoanAction::Default)?;

            let maturity = required(loan.maturity_height(), loan_id, "activation height")?;
            if now < maturity {
                return Err(SettlementError::TooEarly {
                    action: LoanAction::Default.as_str(),
                    height: now,
                    unlock_height: maturity,
                });
            }

            self.release_bond(loan_id, caller)?;
            loan.status = next;

            self.emit(loan_id, now, LoanEventKind::Defaulted);
            tracing::warn!(loan_id = %loan_id, "loan defaulted");
            loan.clone()
        };
        self.clear_active(&loan);
        Ok(loan)
    }

    /// Remove a terminal loan. Either party may delete it.
    pub fn delete(&self, caller: &Account, loan_id: LoanId) -> Result<Loan, SettlementError> {
        let now = self.height();
        match self.loans.entry(loan_id) {
            Entry::Vacant(_) => Err(SettlementError::LoanNotFound(loan_id)),
            Entry::Occupied(e) => {
                let loan = e.get();
                if loan.role_of(caller).is_none() {
                    return Err(SettlementError::NotAParty {
                        loan_id,
                        caller: caller.clone(),
                    });
                }
                if !loan.status.is_terminal() {
                    return Err(SettlementError::NotTerminal {
                        loan_id,
                        status: loan.status,
                    });
                }
                let loan = e.remove();
                self.emit(loan_id, now, LoanEventKind::Deleted);
                tracing::info!(loan_id = %loan_id, "loan deleted");
                Ok(loan)
            }
        }
    }

    // ---- queries ----

    pub fn get_loan(&self, loan_id: LoanId) -> Option<Loan> {
        self.loans.get(&loan_id).map(|e| e.value().clone())
    }

    /// Loans where `account` is borrower or lender, ordered by id.
    pub fn loans_of(&self, account: &Account) -> Vec<Loan> {
        let mut loans: Vec<Loan> = self
            .loans
            .iter()
            .filter(|e| e.role_of(account).is_some())
            .map(|e| e.value().clone())
            .collect();
        loans.sort_by_key(|l| l.id);
        loans
    }

    pub fn active_loan_of(&self, borrower: &Account) -> Option<LoanId> {
        self.active_by_borrower.get(borrower).map(|e| *e)
    }

    /// Bond currently held for a loan.
    pub fn held_bond(&self, loan_id: LoanId) -> Option<Amount> {
        self.held_bonds.get(&loan_id).map(|e| *e)
    }

    /// Events with `seq >= from_seq`, in order.
    pub fn events_since(&self, from_seq: u64) -> Vec<LoanEvent> {
        let mut events: Vec<LoanEvent> = self
            .events
            .iter()
            .filter(|e| *e.key() >= from_seq)
            .map(|e| e.value().clone())
            .collect();
        events.sort_by_key(|e| e.seq);
        events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LoanEvent> {
        self.event_tx.subscribe()
    }

    pub fn params(&self) -> &ProtocolParams {
        &self.params
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn locks(&self) -> &HashLockManager {
        &self.locks
    }

    pub fn len(&self) -> usize {
        self.loans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loans.is_empty()
    }

    // ---- internals ----

    fn loan_mut(
        &self,
        loan_id: LoanId,
    ) -> Result<dashmap::mapref::one::RefMut<'_, LoanId, Loan>, SettlementError> {
        self.loans
            .get_mut(&loan_id)
            .ok_or(SettlementError::LoanNotFound(loan_id))
    }

    fn release_bond(&self, loan_id: LoanId, to: &Account) -> Result<Amount, SettlementError> {
        let (_, bond) = self
            .held_bonds
            .remove(&loan_id)
            .ok_or_else(|| missing(loan_id, "held bond"))?;
        self.ledger.credit(to, bond)?;
        tracing::debug!(loan_id = %loan_id, to = %to, bond, "bond released");
        Ok(bond)
    }

    /// Free the borrower for a new loan. Called after the loan entry is released.
    fn clear_active(&self, loan: &Loan) {
        self.active_by_borrower
            .remove_if(&loan.borrower, |_, id| *id == loan.id);
    }

    fn emit(&self, loan_id: LoanId, height: BlockHeight, kind: LoanEventKind) {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let event = LoanEvent {
            seq,
            loan_id,
            height,
            timestamp: Utc::now(),
            kind,
        };
        tracing::debug!(seq, loan_id = %loan_id, event = event.kind.name(), "loan event");
        self.events.insert(seq, event.clone());
        // No subscribers is not an error; replay covers late joiners.
        let _ = self.event_tx.send(event);
    }
}

fn authorize(loan: &Loan, caller: &Account, action: LoanAction) -> Result<(), SettlementError> {
    let expected = action.actor();
    let allowed = match expected {
        Actor::Borrower => *caller == loan.borrower,
        // The lender is not known until the offer; anyone but the borrower may offer.
        Actor::Lender if action == LoanAction::Offer => *caller != loan.borrower,
        Actor::Lender => loan.lender.as_ref() == Some(caller),
        Actor::Anyone => true,
    };
    if allowed {
        Ok(())
    } else {
        Err(SettlementError::RoleViolation {
            action,
            expected,
            caller: caller.clone(),
        })
    }
}

fn missing(loan_id: LoanId, what: &str) -> SettlementError {
    SettlementError::Core(CoreError::InvalidParameter(format!(
        "loan {loan_id} has no {what}"
    )))
}

fn required<T>(value: Option<T>, loan_id: LoanId, what: &str) -> Result<T, SettlementError> {
    value.ok_or_else(|| missing(loan_id, what))
}

#[async_trait]
impl SettlementChain for LoanBook {
    fn epoch(&self) -> Uuid {
        self.epoch
    }

    async fn height(&self) -> BlockHeight {
        LoanBook::height(self)
    }

    async fn loan(&self, id: LoanId) -> Option<Loan> {
        self.get_loan(id)
    }

    async fn events_since(&self, from_seq: u64) -> Vec<LoanEvent> {
        LoanBook::events_since(self, from_seq)
    }

    async fn revealed_secret(&self, hash: &PreimageHash) -> Option<Preimage> {
        self.locks.revealed_secret(hash)
    }

    fn subscribe(&self) -> broadcast::Receiver<LoanEvent> {
        LoanBook::subscribe(self)
    }
}
