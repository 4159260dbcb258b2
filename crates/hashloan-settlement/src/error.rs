use hashloan_core::{Account, Actor, Amount, CoreError, LoanAction, LoanId, LoanStatus, PreimageHash};

/// Errors from the settlement chain.
///
/// Timing errors carry the current height and the threshold so a caller
/// can tell whether to wait or take the timeout path instead.
#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    #[error("preimage does not open lock {0}")]
    PreimageMismatch(PreimageHash),

    #[error("{action} expired: height {height} is at or past deadline {deadline}")]
    Expired {
        action: &'static str,
        height: u64,
        deadline: u64,
    },

    #[error("{action} too early: height {height} is before unlock height {unlock_height}")]
    TooEarly {
        action: &'static str,
        height: u64,
        unlock_height: u64,
    },

    #[error("lock {0} is already settled")]
    AlreadySettled(PreimageHash),

    #[error("lock {0} already exists")]
    LockExists(PreimageHash),

    #[error("lock {0} not found")]
    LockNotFound(PreimageHash),

    #[error("lock {hash}: {field} does not match the locked terms")]
    LockMismatch {
        hash: PreimageHash,
        field: &'static str,
    },

    #[error("{action} must be called by the {expected}, not {caller}")]
    RoleViolation {
        action: LoanAction,
        expected: Actor,
        caller: Account,
    },

    #[error("{caller} is not a party to loan {loan_id}")]
    NotAParty { loan_id: LoanId, caller: Account },

    #[error("loan {0} not found")]
    LoanNotFound(LoanId),

    #[error("borrower {borrower} already has non-terminal loan {loan_id}")]
    ActiveLoanExists { borrower: Account, loan_id: LoanId },

    #[error("commitment {0} has already been used")]
    DuplicateCommitment(PreimageHash),

    #[error("insufficient balance for {account}: available {available}, required {required}")]
    InsufficientBalance {
        account: Account,
        available: Amount,
        required: Amount,
    },

    #[error("loan {loan_id} is {status}; only terminal loans can be deleted")]
    NotTerminal { loan_id: LoanId, status: LoanStatus },

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}
