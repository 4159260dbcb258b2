//! Shared fixtures for the cross-crate tests: a funded borrower and lender,
//! scaled-down protocol parameters, and helpers that drive both chains.

use std::sync::Arc;

use bitcoin::secp256k1::SECP256K1;
use bitcoin::{Amount as Sats, Network, OutPoint, ScriptBuf};
use hashloan_core::{
    Account, Amount, BlockRatio, Loan, LoanId, LoanRequest, LoanTimelocks, ProtocolParams, Role,
};
use hashloan_crypto::{KeyPair, Preimage};
use hashloan_settlement::{Ledger, LoanBook};
use hashloan_utxo::adapters::InMemoryBitcoinNode;
use hashloan_utxo::transactions::{self, fee_from_bps};
use hashloan_utxo::{BitcoinNode, LoanOutput, OutputKind, PresignedSpend, COLLATERAL_VOUT};

pub const PRINCIPAL: Amount = 10;
pub const LENDER_FUNDS: Amount = 1_000;
pub const BORROWER_FUNDS: Amount = 100;
pub const ESCROW_SATS: u64 = 100_000;
pub const MINER_FEE_SATS: u64 = 500;

/// tB = 10, t0 = 20, tL = 10, tD = 100, t1 = 200 at a 1:2 block ratio,
/// so the Bitcoin relative locks are 10 and 100 blocks. Bond is 10 %.
pub fn params() -> ProtocolParams {
    ProtocolParams {
        block_ratio: BlockRatio::new(1, 2).expect("valid ratio"),
        lender_bond_bps: 1_000,
        min_loan_amount: 1,
        max_loan_amount: 1_000,
        timelocks: LoanTimelocks {
            accept_window: 10,
            escrow_timeout: 20,
            repay_accept_window: 10,
            collateral_timeout: 200,
            loan_duration: 100,
        },
        ..Default::default()
    }
}

pub struct Party {
    pub account: Account,
    pub keys: KeyPair,
    pub secret: Preimage,
}

impl Party {
    pub fn new(role: Role, index: u64) -> Self {
        Self {
            account: Account::new(format!("{role}-{index}")),
            keys: KeyPair::generate(),
            secret: Preimage::derive_for(role, index),
        }
    }

    /// A key-path P2TR script paying this party.
    pub fn payout_script(&self) -> ScriptBuf {
        ScriptBuf::new_p2tr(SECP256K1, self.keys.x_only_public_key(), None)
    }
}

/// Both chains plus one borrower and one lender.
pub struct World {
    pub book: Arc<LoanBook>,
    pub bitcoin: Arc<InMemoryBitcoinNode>,
    pub borrower: Party,
    pub lender: Party,
}

impl World {
    pub fn new(index: u64) -> Self {
        let ledger = Arc::new(Ledger::new());
        let borrower = Party::new(Role::Borrower, index);
        let lender = Party::new(Role::Lender, index);
        ledger
            .credit(&borrower.account, BORROWER_FUNDS)
            .expect("credit borrower");
        ledger
            .credit(&lender.account, LENDER_FUNDS)
            .expect("credit lender");
        Self::with(
            Arc::new(LoanBook::new(params(), ledger).expect("valid params")),
            Arc::new(InMemoryBitcoinNode::new(Network::Regtest)),
            borrower,
            lender,
        )
    }

    pub fn with(
        book: Arc<LoanBook>,
        bitcoin: Arc<InMemoryBitcoinNode>,
        borrower: Party,
        lender: Party,
    ) -> Self {
        Self {
            book,
            bitcoin,
            borrower,
            lender,
        }
    }

    pub fn balance(&self, party: &Party) -> Amount {
        self.book.ledger().balance(&party.account)
    }

    /// The escrow output the borrower funds before requesting. The lender's
    /// key is agreed off-chain beforehand.
    pub fn escrow_output(&self) -> LoanOutput {
        let csv = params()
            .timelocks
            .to_utxo(&params().block_ratio)
            .expect("valid timelocks")
            .escrow_csv;
        LoanOutput::escrow(
            self.borrower.keys.x_only_public_key(),
            self.lender.keys.x_only_public_key(),
            self.borrower.secret.commitment(),
            csv,
        )
        .expect("escrow output")
    }

    /// Fund the escrow on Bitcoin and open the loan on the settlement chain.
    pub async fn request(&self) -> (LoanId, OutPoint) {
        let escrow = self.escrow_output();
        self.bitcoin.register_output(&escrow);
        let outpoint = self
            .bitcoin
            .fund_address(&escrow.address(Network::Regtest), Sats::from_sat(ESCROW_SATS))
            .await
            .expect("fund escrow");

        let id = self
            .book
            .request(
                &self.borrower.account,
                LoanRequest {
                    principal: PRINCIPAL,
                    hash_borrower: self.borrower.secret.commitment(),
                    borrower_key: self.borrower.keys.x_only_public_key(),
                    escrow_outpoint: outpoint,
                },
            )
            .expect("request");
        (id, outpoint)
    }

    pub fn offer(&self, id: LoanId) -> Loan {
        self.book
            .offer(
                &self.lender.account,
                id,
                self.lender.secret.commitment(),
                self.lender.keys.x_only_public_key(),
            )
            .expect("offer")
    }

    pub fn accept(&self, id: LoanId) -> Loan {
        self.book
            .accept(&self.borrower.account, id, &self.borrower.secret)
            .expect("accept")
    }

    /// Request, offer and accept in one go.
    pub async fn activate(&self) -> (Loan, OutPoint) {
        let (id, outpoint) = self.request().await;
        self.offer(id);
        (self.accept(id), outpoint)
    }

    /// Both outputs derived from the offered loan, registered with the node.
    pub fn loan_outputs(&self, loan: &Loan) -> (LoanOutput, LoanOutput) {
        let escrow = LoanOutput::for_loan(loan, OutputKind::Escrow).expect("escrow");
        let collateral = LoanOutput::for_loan(loan, OutputKind::Collateral).expect("collateral");
        self.bitcoin.register_output(&escrow);
        self.bitcoin.register_output(&collateral);
        (escrow, collateral)
    }

    /// E1, signed by both parties through an envelope exchange.
    pub fn presign_collateral_lock(&self, loan: &Loan, escrow_outpoint: OutPoint) -> PresignedSpend {
        let (escrow, collateral) = self.loan_outputs(loan);
        let template = transactions::collateral_lock(
            &escrow,
            escrow_outpoint,
            Sats::from_sat(ESCROW_SATS),
            &collateral,
            fee_from_bps(Sats::from_sat(ESCROW_SATS), params().origination_fee_bps),
            self.lender.payout_script(),
            Sats::from_sat(MINER_FEE_SATS),
        )
        .expect("collateral lock template");

        // The borrower signs first and hands the envelope to the lender.
        let mut borrower_view = PresignedSpend::new(template.clone(), escrow.clone())
            .expect("borrower view");
        borrower_view
            .sign(Role::Borrower, &self.borrower.keys)
            .expect("borrower signs");
        let wire = borrower_view
            .envelope(loan.id, Role::Borrower)
            .expect("envelope")
            .to_json()
            .expect("json");

        let mut lender_view = PresignedSpend::new(template, escrow).expect("lender view");
        let received = hashloan_utxo::SignatureEnvelope::from_json(&wire).expect("decode");
        lender_view.accept_envelope(&received).expect("accept envelope");
        lender_view
            .sign(Role::Lender, &self.lender.keys)
            .expect("lender signs");
        lender_view
    }

    /// C1 spending the collateral created by `lock`, signed by the borrower.
    pub fn presign_collateral_release(&self, loan: &Loan, lock: &PresignedSpend) -> PresignedSpend {
        let (_, collateral) = self.loan_outputs(loan);
        let outpoint = OutPoint::new(lock.template().txid(), COLLATERAL_VOUT);
        let value = lock.template().tx().output[COLLATERAL_VOUT as usize].value;
        let template = transactions::collateral_release(
            &collateral,
            outpoint,
            value,
            self.borrower.payout_script(),
            Sats::from_sat(MINER_FEE_SATS),
        )
        .expect("collateral release template");
        let mut spend = PresignedSpend::new(template, collateral).expect("release spend");
        spend
            .sign(Role::Borrower, &self.borrower.keys)
            .expect("borrower signs");
        spend
    }

    /// C2 spending the collateral created by `lock`, signed by the lender.
    pub fn collateral_capture(&self, loan: &Loan, lock: &PresignedSpend) -> PresignedSpend {
        let (_, collateral) = self.loan_outputs(loan);
        let outpoint = OutPoint::new(lock.template().txid(), COLLATERAL_VOUT);
        let value = lock.template().tx().output[COLLATERAL_VOUT as usize].value;
        let template = transactions::collateral_capture(
            &collateral,
            outpoint,
            value,
            self.lender.payout_script(),
            Sats::from_sat(MINER_FEE_SATS),
        )
        .expect("collateral capture template");
        let mut spend = PresignedSpend::new(template, collateral).expect("capture spend");
        spend
            .sign(Role::Lender, &self.lender.keys)
            .expect("lender signs");
        spend
    }

    /// Mine until the node tip reaches `height`.
    pub async fn mine_to(&self, height: u64) {
        let tip = self.bitcoin.tip_height().await.expect("tip");
        if height > tip {
            self.bitcoin
                .mine_blocks(height - tip)
                .await
                .expect("mine");
        }
    }
}

/// A fresh scratch directory for storage-backed tests.
pub fn temp_dir(prefix: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("{prefix}-{}", rand::random::<u64>()))
}
