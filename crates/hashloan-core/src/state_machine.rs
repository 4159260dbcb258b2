use std::fmt;

use crate::error::CoreError;

/// Lifecycle states of a loan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum LoanStatus {
    /// Borrower has posted the request and the escrow outpoint.
    Requested,
    /// Lender has locked the principal under the borrower's hash and posted a bond.
    Offered,
    /// Borrower revealed their secret and took the principal.
    Active,
    /// Principal has been locked back under the lender's hash.
    RepaymentInProgress,
    /// Lender revealed their secret and took the repayment. Final state.
    Repaid,
    /// Loan duration elapsed without repayment. Final state.
    Defaulted,
    /// Borrower never accepted the offer; lender reclaimed principal and bond. Final state.
    RefundedToLender,
    /// Lender never accepted the repayment; repayer refunded, bond slashed to borrower. Final state.
    RefundedToBorrower,
}

impl LoanStatus {
    /// Whether this is a terminal state. Terminal loans are immutable.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Repaid | Self::Defaulted | Self::RefundedToLender | Self::RefundedToBorrower
        )
    }
}

impl fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => write!(f, "Requested"),
            Self::Offered => write!(f, "Offered"),
            Self::Active => write!(f, "Active"),
            Self::RepaymentInProgress => write!(f, "RepaymentInProgress"),
            Self::Repaid => write!(f, "Repaid"),
            Self::Defaulted => write!(f, "Defaulted"),
            Self::RefundedToLender => write!(f, "RefundedToLender"),
            Self::RefundedToBorrower => write!(f, "RefundedToBorrower"),
        }
    }
}

/// Role-gated calls that move a loan between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum LoanAction {
    Offer,
    WithdrawOffer,
    Accept,
    AttemptRepay,
    AcceptRepay,
    WithdrawRepay,
    Default,
}

impl LoanAction {
    /// Which party may submit this action.
    pub fn actor(&self) -> Actor {
        match self {
            Self::Offer | Self::WithdrawOffer | Self::AcceptRepay | Self::Default => Actor::Lender,
            Self::Accept | Self::WithdrawRepay => Actor::Borrower,
            Self::AttemptRepay => Actor::Anyone,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::WithdrawOffer => "withdraw-offer",
            Self::Accept => "accept",
            Self::AttemptRepay => "attempt-repay",
            Self::AcceptRepay => "accept-repay",
            Self::WithdrawRepay => "withdraw-repay",
            Self::Default => "default",
        }
    }
}

impl fmt::Display for LoanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who is allowed to submit an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Borrower,
    Lender,
    Anyone,
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Borrower => write!(f, "borrower"),
            Self::Lender => write!(f, "lender"),
            Self::Anyone => write!(f, "anyone"),
        }
    }
}

/// The loan state machine. Enforces the transition table; role and
/// timelock checks live with the executor that owns the loan.
pub struct LoanStateMachine;

impl LoanStateMachine {
    /// Apply an action to a status, returning the new status or an error
    /// if the action is not valid from the current status.
    pub fn transition(current: LoanStatus, action: LoanAction) -> Result<LoanStatus, CoreError> {
        use LoanAction as A;
        use LoanStatus as S;

        let next = match (current, action) {
            (S::Requested, A::Offer) => S::Offered,
            (S::Offered, A::WithdrawOffer) => S::RefundedToLender,
            (S::Offered, A::Accept) => S::Active,
            (S::Active, A::AttemptRepay) => S::RepaymentInProgress,
            (S::Active, A::Default) => S::Defaulted,
            (S::RepaymentInProgress, A::AcceptRepay) => S::Repaid,
            (S::RepaymentInProgress, A::WithdrawRepay) => S::RefundedToBorrower,
            (from, action) => {
                return Err(CoreError::InvalidStateTransition { from, action });
            }
        };

        tracing::debug!(
            from = %current,
            to = %next,
            action = %action,
            "loan state transition"
        );

        Ok(next)
    }

    /// Check whether an action is valid from the given status without applying it.
    pub fn can_transition(current: LoanStatus, action: LoanAction) -> bool {
        Self::transition(current, action).is_ok()
    }
}
