//! Hashloan core: shared types, protocol parameters, the timelock
//! coordinator, and the loan lifecycle state machine.

pub mod config;
pub mod error;
pub mod loan;
pub mod state_machine;
pub mod timelock;
pub mod types;

pub use config::ProtocolParams;
pub use error::CoreError;
pub use loan::{Loan, LoanRequest};
pub use state_machine::{Actor, LoanAction, LoanStateMachine, LoanStatus};
pub use timelock::{BlockRatio, Invariant, LoanTimelocks, UtxoTimelocks};
pub use types::{Account, Amount, BlockHeight, LoanId, PreimageHash, Role};
