use crate::state_machine::{LoanAction, LoanStatus};
use crate::timelock::Invariant;

/// Core protocol errors.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid state transition: cannot {action} a loan in status {from}")]
    InvalidStateTransition {
        from: LoanStatus,
        action: LoanAction,
    },

    #[error("timelock invariant violated: {0}")]
    InvariantViolation(Invariant),

    #[error("timelock {name} = {value} blocks exceeds the relative lock limit of {max}")]
    TimelockOutOfRange {
        name: &'static str,
        value: u64,
        max: u64,
    },

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("invalid hex encoding: {0}")]
    InvalidHex(String),
}
