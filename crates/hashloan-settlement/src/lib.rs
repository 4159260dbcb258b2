//! Hashloan settlement chain.
//!
//! Provides the hash-locked value transfer primitive, a native-unit
//! ledger, and the loan book that executes the role-gated lifecycle
//! transitions and publishes loan events.

pub mod book;
pub mod error;
pub mod events;
pub mod htlc;
pub mod ledger;
pub mod traits;

pub use book::LoanBook;
pub use error::SettlementError;
pub use events::{LoanEvent, LoanEventKind};
pub use htlc::{HashLock, HashLockManager, LockStatus, LockTerms};
pub use ledger::Ledger;
pub use traits::SettlementChain;
