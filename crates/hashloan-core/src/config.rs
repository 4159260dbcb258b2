use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::timelock::{BlockRatio, LoanTimelocks};
use crate::types::Amount;

/// Basis-point denominator (100% = 10 000 bps).
pub const BPS_DENOMINATOR: u128 = 10_000;

/// Protocol parameters. Each loan copies the timelocks at request time, so
/// changing these never affects loans already in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolParams {
    /// Bitcoin : settlement-chain block ratio.
    #[serde(default)]
    pub block_ratio: BlockRatio,
    /// Lender bond as a fraction of principal, in basis points.
    #[serde(default = "default_lender_bond_bps")]
    pub lender_bond_bps: u32,
    /// Origination fee as a fraction of principal, in basis points.
    #[serde(default = "default_origination_fee_bps")]
    pub origination_fee_bps: u32,
    /// Smallest principal accepted at request time.
    #[serde(default = "default_min_loan_amount", with = "amount_string")]
    pub min_loan_amount: Amount,
    /// Largest principal accepted at request time.
    #[serde(default = "default_max_loan_amount", with = "amount_string")]
    pub max_loan_amount: Amount,
    /// Confirmations before a Bitcoin output is treated as final.
    #[serde(default = "default_utxo_confirmations")]
    pub utxo_confirmations: u32,
    /// Confirmations before a settlement-chain event is treated as final.
    #[serde(default = "default_settlement_confirmations")]
    pub settlement_confirmations: u32,
    /// Loan timelocks in settlement-chain blocks.
    #[serde(default = "default_timelocks")]
    pub timelocks: LoanTimelocks,
}

impl Default for ProtocolParams {
    fn default() -> Self {
        Self {
            block_ratio: BlockRatio::default(),
            lender_bond_bps: default_lender_bond_bps(),
            origination_fee_bps: default_origination_fee_bps(),
            min_loan_amount: default_min_loan_amount(),
            max_loan_amount: default_max_loan_amount(),
            utxo_confirmations: default_utxo_confirmations(),
            settlement_confirmations: default_settlement_confirmations(),
            timelocks: default_timelocks(),
        }
    }
}

impl ProtocolParams {
    /// Validate the parameter set as a whole.
    pub fn validate(&self) -> Result<(), CoreError> {
        self.timelocks.validate()?;
        self.timelocks.to_utxo(&self.block_ratio)?;
        if self.lender_bond_bps as u128 > BPS_DENOMINATOR {
            return Err(CoreError::InvalidParameter(format!(
                "lender bond {} bps exceeds 100%",
                self.lender_bond_bps
            )));
        }
        if self.origination_fee_bps as u128 > BPS_DENOMINATOR {
            return Err(CoreError::InvalidParameter(format!(
                "origination fee {} bps exceeds 100%",
                self.origination_fee_bps
            )));
        }
        if self.min_loan_amount == 0 || self.min_loan_amount > self.max_loan_amount {
            return Err(CoreError::InvalidParameter(format!(
                "loan limits [{}, {}] are not a valid range",
                self.min_loan_amount, self.max_loan_amount
            )));
        }
        Ok(())
    }

    /// Reject a principal outside the configured limits.
    pub fn check_principal(&self, principal: Amount) -> Result<(), CoreError> {
        if principal < self.min_loan_amount || principal > self.max_loan_amount {
            return Err(CoreError::InvalidAmount(format!(
                "principal {principal} outside [{}, {}]",
                self.min_loan_amount, self.max_loan_amount
            )));
        }
        Ok(())
    }

    pub fn bond_for(&self, principal: Amount) -> Result<Amount, CoreError> {
        apply_bps(principal, self.lender_bond_bps)
    }

    pub fn origination_fee_for(&self, principal: Amount) -> Result<Amount, CoreError> {
        apply_bps(principal, self.origination_fee_bps)
    }
}

fn apply_bps(amount: Amount, bps: u32) -> Result<Amount, CoreError> {
    amount
        .checked_mul(bps as u128)
        .map(|v| v / BPS_DENOMINATOR)
        .ok_or_else(|| CoreError::InvalidAmount(format!("{amount} overflows at {bps} bps")))
}

// Default value functions
fn default_timelocks() -> LoanTimelocks {
    LoanTimelocks {
        accept_window: 100,
        escrow_timeout: 200,
        repay_accept_window: 150,
        collateral_timeout: 560_000,
        loan_duration: 540_000,
    }
}
fn default_lender_bond_bps() -> u32 {
    1_000
}
fn default_origination_fee_bps() -> u32 {
    100
}
fn default_min_loan_amount() -> Amount {
    5_000_000_000_000_000
}
fn default_max_loan_amount() -> Amount {
    100_000_000_000_000_000_000
}
fn default_utxo_confirmations() -> u32 {
    6
}
fn default_settlement_confirmations() -> u32 {
    12
}

/// Amounts exceed TOML's 64-bit integers, so they are carried as decimal strings.
pub mod amount_string {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u128, D::Error> {
        let s = String::deserialize(d)?;
        s.replace('_', "").parse().map_err(D::Error::custom)
    }
}
