use bitcoin::{OutPoint, XOnlyPublicKey};
use serde::{Deserialize, Serialize};

use crate::config::ProtocolParams;
use crate::error::CoreError;
use crate::state_machine::LoanStatus;
use crate::timelock::{BlockRatio, LoanTimelocks, UtxoTimelocks};
use crate::types::{Account, Amount, BlockHeight, LoanId, PreimageHash, Role};

/// What a borrower submits to open a loan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanRequest {
    pub principal: Amount,
    pub hash_borrower: PreimageHash,
    pub borrower_key: XOnlyPublicKey,
    /// Funding output the borrower created at the escrow address.
    pub escrow_outpoint: OutPoint,
}

/// The central loan aggregate as recorded by the settlement chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Loan {
    pub id: LoanId,
    pub borrower: Account,
    pub lender: Option<Account>,

    pub principal: Amount,
    /// Set exactly once, at offer.
    pub bond_amount: Option<Amount>,
    /// Charged on the Bitcoin side when the escrow moves to collateral.
    pub origination_fee: Amount,

    pub hash_borrower: PreimageHash,
    pub hash_lender: Option<PreimageHash>,

    pub borrower_key: XOnlyPublicKey,
    pub lender_key: Option<XOnlyPublicKey>,

    pub escrow_outpoint: OutPoint,

    /// Frozen at request time.
    pub timelocks: LoanTimelocks,
    pub block_ratio: BlockRatio,

    pub request_height: BlockHeight,
    pub offer_height: Option<BlockHeight>,
    pub activation_height: Option<BlockHeight>,
    pub repayment_height: Option<BlockHeight>,

    /// Account that funded the repayment lock; refunds go back here.
    pub repayer: Option<Account>,

    pub status: LoanStatus,
}

impl Loan {
    /// Build a new loan in `Requested`, freezing the current parameters.
    ///
    /// This is the only place the timelock ordering is checked; a violation
    /// rejects the request before any value moves.
    pub fn new(
        id: LoanId,
        borrower: Account,
        request: LoanRequest,
        params: &ProtocolParams,
        height: BlockHeight,
    ) -> Result<Self, CoreError> {
        params.check_principal(request.principal)?;
        params.timelocks.validate()?;
        params.timelocks.to_utxo(&params.block_ratio)?;
        let origination_fee = params.origination_fee_for(request.principal)?;

        Ok(Self {
            id,
            borrower,
            lender: None,
            principal: request.principal,
            bond_amount: None,
            origination_fee,
            hash_borrower: request.hash_borrower,
            hash_lender: None,
            borrower_key: request.borrower_key,
            lender_key: None,
            escrow_outpoint: request.escrow_outpoint,
            timelocks: params.timelocks,
            block_ratio: params.block_ratio,
            request_height: height,
            offer_height: None,
            activation_height: None,
            repayment_height: None,
            repayer: None,
            status: LoanStatus::Requested,
        })
    }

    /// Which party `account` is on this loan, if any.
    pub fn role_of(&self, account: &Account) -> Option<Role> {
        if *account == self.borrower {
            Some(Role::Borrower)
        } else if self.lender.as_ref() == Some(account) {
            Some(Role::Lender)
        } else {
            None
        }
    }

    /// Last height (exclusive) at which the offer can be accepted.
    pub fn accept_deadline(&self) -> Option<BlockHeight> {
        self.offer_height
            .map(|h| h.saturating_add(self.timelocks.accept_window))
    }

    /// Height from which the loan can be defaulted.
    pub fn maturity_height(&self) -> Option<BlockHeight> {
        self.activation_height
            .map(|h| h.saturating_add(self.timelocks.loan_duration))
    }

    /// Last height (exclusive) at which a repayment can be accepted.
    pub fn repay_accept_deadline(&self) -> Option<BlockHeight> {
        self.repayment_height
            .map(|h| h.saturating_add(self.timelocks.repay_accept_window))
    }

    /// Relative locks for this loan's Bitcoin outputs.
    pub fn utxo_timelocks(&self) -> Result<UtxoTimelocks, CoreError> {
        self.timelocks.to_utxo(&self.block_ratio)
    }

    /// Re-check the per-loan invariants. Any failure here after request time
    /// is a protocol bug.
    pub fn check_invariants(&self) -> Result<(), CoreError> {
        self.timelocks.validate()?;
        if self.hash_lender == Some(self.hash_borrower) {
            return Err(CoreError::InvalidParameter(format!(
                "loan {}: borrower and lender commitments are equal",
                self.id
            )));
        }
        Ok(())
    }
}
