use async_trait::async_trait;
use bitcoin::{Address, Amount, OutPoint, Transaction, TxOut, Txid};

use crate::error::UtxoError;

/// The slice of a Bitcoin node the loan participants need.
#[async_trait]
pub trait BitcoinNode: Send + Sync {
    /// Height of the best block.
    async fn tip_height(&self) -> Result<u64, UtxoError>;

    /// Submit a fully witnessed transaction to the mempool.
    async fn broadcast(&self, tx: &Transaction) -> Result<Txid, UtxoError>;

    /// Confirmations of the transaction that created `outpoint`:
    /// `Some(0)` while in the mempool, `None` if unknown.
    async fn confirmations(&self, outpoint: &OutPoint) -> Result<Option<u64>, UtxoError>;

    /// The output at `outpoint` if it exists and is unspent.
    async fn unspent_output(&self, outpoint: &OutPoint) -> Result<Option<TxOut>, UtxoError>;

    /// The transaction that spent `outpoint`, if any.
    async fn spending_tx(&self, outpoint: &OutPoint) -> Result<Option<Transaction>, UtxoError>;

    /// Pay `amount` to `address` from the node's wallet.
    async fn fund_address(&self, address: &Address, amount: Amount) -> Result<OutPoint, UtxoError>;

    /// Mine `n` blocks and return the new tip. Regtest only.
    async fn mine_blocks(&self, n: u64) -> Result<u64, UtxoError>;
}
