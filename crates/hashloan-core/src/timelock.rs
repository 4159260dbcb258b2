//! Timelock coordinator.
//!
//! Loan timelocks are expressed in settlement-chain blocks and frozen into
//! each loan at request time. The only place they are converted into
//! Bitcoin block counts is [`LoanTimelocks::to_utxo`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Largest block count a BIP-68 relative lock can express.
pub const MAX_RELATIVE_BLOCKS: u64 = u16::MAX as u64;

/// The timelock ordering invariants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invariant {
    /// `escrow_timeout > accept_window`: the borrower cannot pull the escrow
    /// back while the lender still has a live offer.
    EscrowOutlastsAcceptWindow {
        escrow_timeout: u64,
        accept_window: u64,
    },
    /// `collateral_timeout > repay_accept_window + loan_duration`: the lender
    /// cannot capture collateral while a repayment can still be accepted.
    CollateralOutlastsRepayment {
        collateral_timeout: u64,
        repay_accept_window: u64,
        loan_duration: u64,
    },
}

impl fmt::Display for Invariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EscrowOutlastsAcceptWindow {
                escrow_timeout,
                accept_window,
            } => write!(
                f,
                "escrow timeout ({escrow_timeout}) must exceed accept window ({accept_window})"
            ),
            Self::CollateralOutlastsRepayment {
                collateral_timeout,
                repay_accept_window,
                loan_duration,
            } => write!(
                f,
                "collateral timeout ({collateral_timeout}) must exceed repay accept window \
                 ({repay_accept_window}) + loan duration ({loan_duration})"
            ),
        }
    }
}

/// Ratio of Bitcoin blocks to settlement-chain blocks, e.g. `1:20`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BlockRatio {
    pub utxo: u32,
    pub settlement: u32,
}

impl BlockRatio {
    pub fn new(utxo: u32, settlement: u32) -> Result<Self, CoreError> {
        if utxo == 0 || settlement == 0 {
            return Err(CoreError::InvalidParameter(format!(
                "block ratio {utxo}:{settlement} must be non-zero"
            )));
        }
        Ok(Self { utxo, settlement })
    }

    /// Convert a settlement-chain block count into Bitcoin blocks, rounding up
    /// so the UTXO-side timeout never fires before the window it protects.
    pub fn to_utxo_blocks(&self, settlement_blocks: u64) -> u64 {
        let num = settlement_blocks as u128 * self.utxo as u128;
        num.div_ceil(self.settlement as u128) as u64
    }

    /// Convert a Bitcoin block count into settlement-chain blocks.
    pub fn to_settlement_blocks(&self, utxo_blocks: u64) -> u64 {
        (utxo_blocks as u128 * self.settlement as u128 / self.utxo as u128) as u64
    }
}

impl Default for BlockRatio {
    fn default() -> Self {
        Self {
            utxo: 1,
            settlement: 20,
        }
    }
}

impl fmt::Display for BlockRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.utxo, self.settlement)
    }
}

impl FromStr for BlockRatio {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (a, b) = s
            .split_once(':')
            .ok_or_else(|| CoreError::InvalidParameter(format!("block ratio '{s}' is not N:M")))?;
        let parse = |v: &str| {
            v.trim()
                .parse::<u32>()
                .map_err(|e| CoreError::InvalidParameter(format!("block ratio '{s}': {e}")))
        };
        Self::new(parse(a)?, parse(b)?)
    }
}

impl TryFrom<String> for BlockRatio {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<BlockRatio> for String {
    fn from(r: BlockRatio) -> Self {
        r.to_string()
    }
}

/// The five loan timelocks, in settlement-chain blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanTimelocks {
    /// tB: how long an offer stays acceptable.
    pub accept_window: u64,
    /// t0: relative lock on the escrow output's borrower exit.
    pub escrow_timeout: u64,
    /// tL: how long a repayment stays acceptable.
    pub repay_accept_window: u64,
    /// t1: relative lock on the collateral output's lender capture.
    pub collateral_timeout: u64,
    /// tD: loan term after activation.
    pub loan_duration: u64,
}

impl LoanTimelocks {
    /// Check both ordering invariants.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.escrow_timeout <= self.accept_window {
            return Err(CoreError::InvariantViolation(
                Invariant::EscrowOutlastsAcceptWindow {
                    escrow_timeout: self.escrow_timeout,
                    accept_window: self.accept_window,
                },
            ));
        }
        let repayment_horizon = self.repay_accept_window.saturating_add(self.loan_duration);
        if self.collateral_timeout <= repayment_horizon {
            return Err(CoreError::InvariantViolation(
                Invariant::CollateralOutlastsRepayment {
                    collateral_timeout: self.collateral_timeout,
                    repay_accept_window: self.repay_accept_window,
                    loan_duration: self.loan_duration,
                },
            ));
        }
        Ok(())
    }

    /// Derive the relative locks for the two Taproot outputs.
    pub fn to_utxo(&self, ratio: &BlockRatio) -> Result<UtxoTimelocks, CoreError> {
        let escrow = checked_relative("escrow_timeout", ratio.to_utxo_blocks(self.escrow_timeout))?;
        let collateral = checked_relative(
            "collateral_timeout",
            ratio.to_utxo_blocks(self.collateral_timeout),
        )?;
        Ok(UtxoTimelocks {
            escrow_csv: escrow,
            collateral_csv: collateral,
        })
    }
}

fn checked_relative(name: &'static str, blocks: u64) -> Result<u16, CoreError> {
    if blocks == 0 || blocks > MAX_RELATIVE_BLOCKS {
        return Err(CoreError::TimelockOutOfRange {
            name,
            value: blocks,
            max: MAX_RELATIVE_BLOCKS,
        });
    }
    Ok(blocks as u16)
}

/// Relative locks for the Bitcoin outputs, in Bitcoin blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoTimelocks {
    /// CSV on escrow leaf E2.
    pub escrow_csv: u16,
    /// CSV on collateral leaf C2.
    pub collateral_csv: u16,
}
