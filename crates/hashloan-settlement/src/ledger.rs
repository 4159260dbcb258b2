use dashmap::DashMap;
use hashloan_core::{Account, Amount};

use crate::error::SettlementError;

/// Native-unit balances on the settlement chain.
///
/// Thread-safe: each account's balance is updated under its own entry lock.
pub struct Ledger {
    balances: DashMap<Account, Amount>,
}

impl Ledger {
    pub fn new() -> Self {
        Self {
            balances: DashMap::new(),
        }
    }

    pub fn balance(&self, account: &Account) -> Amount {
        self.balances.get(account).map(|b| *b).unwrap_or(0)
    }

    /// Add funds to an account. Returns the new balance.
    pub fn credit(&self, account: &Account, amount: Amount) -> Result<Amount, SettlementError> {
        let mut entry = self.balances.entry(account.clone()).or_insert(0);
        let updated = entry.checked_add(amount).ok_or_else(|| {
            SettlementError::InvalidAmount(format!("credit of {amount} to {account} overflows"))
        })?;
        *entry = updated;
        tracing::trace!(account = %account, amount, balance = updated, "ledger credit");
        Ok(updated)
    }

    /// Remove funds from an account. Returns the new balance.
    pub fn debit(&self, account: &Account, amount: Amount) -> Result<Amount, SettlementError> {
        let mut entry = self.balances.entry(account.clone()).or_insert(0);
        if *entry < amount {
            return Err(SettlementError::InsufficientBalance {
                account: account.clone(),
                available: *entry,
                required: amount,
            });
        }
        *entry -= amount;
        tracing::trace!(account = %account, amount, balance = *entry, "ledger debit");
        Ok(*entry)
    }

    /// Sum of all balances.
    pub fn total(&self) -> Amount {
        self.balances.iter().map(|e| *e.value()).sum()
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}
