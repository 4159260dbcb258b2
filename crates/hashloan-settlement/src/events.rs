use bitcoin::{OutPoint, XOnlyPublicKey};
use chrono::{DateTime, Utc};
use hashloan_core::config::amount_string;
use hashloan_core::{Account, Amount, BlockHeight, LoanId, LoanStatus, PreimageHash};
use hashloan_crypto::Preimage;
use serde::{Deserialize, Serialize};

/// An event emitted by the loan book. Sequence numbers are gap-free and
/// strictly increasing, so a mirror can resume from the last one it saw.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanEvent {
    pub seq: u64,
    pub loan_id: LoanId,
    pub height: BlockHeight,
    pub timestamp: DateTime<Utc>,
    pub kind: LoanEventKind,
}

/// Amounts are carried as strings: internally tagged enums cannot buffer `u128`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoanEventKind {
    Requested {
        borrower: Account,
        #[serde(with = "amount_string")]
        principal: Amount,
        hash_borrower: PreimageHash,
        borrower_key: XOnlyPublicKey,
        escrow_outpoint: OutPoint,
    },
    Offered {
        lender: Account,
        #[serde(with = "amount_string")]
        bond_amount: Amount,
        hash_lender: PreimageHash,
        lender_key: XOnlyPublicKey,
        accept_deadline: BlockHeight,
    },
    /// The borrower's secret is now public.
    Activated { secret_borrower: Preimage },
    RepaymentAttempted {
        repayer: Account,
        repay_accept_deadline: BlockHeight,
    },
    /// The lender's secret is now public.
    Repaid { secret_lender: Preimage },
    Defaulted,
    RefundedToLender,
    RefundedToBorrower {
        #[serde(with = "amount_string")]
        bond_amount: Amount,
    },
    Deleted,
}

impl LoanEventKind {
    /// The loan status this event leaves behind, if it changes status.
    pub fn resulting_status(&self) -> Option<LoanStatus> {
        match self {
            Self::Requested { .. } => Some(LoanStatus::Requested),
            Self::Offered { .. } => Some(LoanStatus::Offered),
            Self::Activated { .. } => Some(LoanStatus::Active),
            Self::RepaymentAttempted { .. } => Some(LoanStatus::RepaymentInProgress),
            Self::Repaid { .. } => Some(LoanStatus::Repaid),
            Self::Defaulted => Some(LoanStatus::Defaulted),
            Self::RefundedToLender => Some(LoanStatus::RefundedToLender),
            Self::RefundedToBorrower { .. } => Some(LoanStatus::RefundedToBorrower),
            Self::Deleted => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Requested { .. } => "requested",
            Self::Offered { .. } => "offered",
            Self::Activated { .. } => "activated",
            Self::RepaymentAttempted { .. } => "repayment_attempted",
            Self::Repaid { .. } => "repaid",
            Self::Defaulted => "defaulted",
            Self::RefundedToLender => "refunded_to_lender",
            Self::RefundedToBorrower { .. } => "refunded_to_borrower",
            Self::Deleted => "deleted",
        }
    }
}
