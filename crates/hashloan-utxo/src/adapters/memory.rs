use std::collections::HashMap;

use async_trait::async_trait;
use bitcoin::absolute::LockTime;
use bitcoin::transaction::Version;
use bitcoin::{
    Address, Amount, Network, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness,
};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::UtxoError;
use crate::outputs::LoanOutput;
use crate::traits::BitcoinNode;
use crate::witness;

#[derive(Debug, Clone)]
struct Utxo {
    txout: TxOut,
    /// `None` while the creating transaction is in the mempool.
    height: Option<u64>,
}

#[derive(Debug, Default)]
struct ChainState {
    tip: u64,
    utxos: HashMap<OutPoint, Utxo>,
    spent_by: HashMap<OutPoint, Txid>,
    txs: HashMap<Txid, (Transaction, Option<u64>)>,
    mempool: Vec<Txid>,
    faucet_nonce: u64,
}

impl ChainState {
    fn confirmations(&self, height: Option<u64>) -> u64 {
        match height {
            Some(h) => self.tip.saturating_sub(h) + 1,
            None => 0,
        }
    }
}

/// In-process regtest chain.
///
/// Enforces what the loan protocol relies on: inputs exist and are unspent,
/// spends of registered loan outputs carry a valid witness, and timeout
/// leaves wait out their relative lock before they can enter a block.
/// Spends of unregistered outputs are accepted without script checks.
pub struct InMemoryBitcoinNode {
    network: Network,
    state: Mutex<ChainState>,
    policies: DashMap<ScriptBuf, LoanOutput>,
}

impl InMemoryBitcoinNode {
    pub fn new(network: Network) -> Self {
        Self {
            network,
            state: Mutex::new(ChainState::default()),
            policies: DashMap::new(),
        }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Enforce `output`'s spend conditions on every UTXO paying to it.
    pub fn register_output(&self, output: &LoanOutput) {
        self.policies.insert(output.script_pubkey(), output.clone());
    }

    fn check_inputs(state: &ChainState, tx: &Transaction) -> Result<Vec<TxOut>, UtxoError> {
        let mut prevouts = Vec::with_capacity(tx.input.len());
        for input in &tx.input {
            let outpoint = input.previous_output;
            if state.spent_by.contains_key(&outpoint) {
                return Err(UtxoError::DoubleSpend(outpoint));
            }
            let utxo = state
                .utxos
                .get(&outpoint)
                .ok_or(UtxoError::MissingInput(outpoint))?;
            prevouts.push(utxo.txout.clone());
        }
        Ok(prevouts)
    }

    fn check_scripts(
        &self,
        state: &ChainState,
        tx: &Transaction,
        prevouts: &[TxOut],
    ) -> Result<(), UtxoError> {
        for (index, prevout) in prevouts.iter().enumerate() {
            let Some(output) = self.policies.get(&prevout.script_pubkey) else {
                continue;
            };
            let leaf = witness::verify_spend(tx, index, prevouts, &output)?;
            if !leaf.is_timeout() {
                continue;
            }

            // The spend can enter the next block only once the input has
            // aged `csv` blocks by then.
            let outpoint = tx.input[index].previous_output;
            let height = state.utxos.get(&outpoint).and_then(|u| u.height);
            let aged = match height {
                Some(h) => (state.tip + 1).saturating_sub(h),
                None => 0,
            };
            if aged < u64::from(output.csv()) {
                return Err(UtxoError::NonFinal {
                    outpoint,
                    confirmations: state.confirmations(height),
                    required: output.csv(),
                });
            }
        }
        Ok(())
    }

    fn apply(state: &mut ChainState, tx: &Transaction, height: Option<u64>) -> Txid {
        let txid = tx.compute_txid();
        for input in &tx.input {
            state.utxos.remove(&input.previous_output);
            state.spent_by.insert(input.previous_output, txid);
        }
        for (vout, txout) in tx.output.iter().enumerate() {
            state.utxos.insert(
                OutPoint::new(txid, vout as u32),
                Utxo {
                    txout: txout.clone(),
                    height,
                },
            );
        }
        state.txs.insert(txid, (tx.clone(), height));
        txid
    }

    /// Mine `n` blocks; the first one confirms the whole mempool.
    fn mine(state: &mut ChainState, n: u64) -> u64 {
        if n == 0 {
            return state.tip;
        }
        let height = state.tip + 1;
        let mempool = std::mem::take(&mut state.mempool);
        for txid in &mempool {
            let Some((tx, confirmed)) = state.txs.get_mut(txid) else {
                continue;
            };
            *confirmed = Some(height);
            for vout in 0..tx.output.len() {
                if let Some(utxo) = state.utxos.get_mut(&OutPoint::new(*txid, vout as u32)) {
                    utxo.height = Some(height);
                }
            }
        }
        state.tip += n;
        debug!(tip = state.tip, confirmed = mempool.len(), "Mined blocks");
        state.tip
    }
}

#[async_trait]
impl BitcoinNode for InMemoryBitcoinNode {
    async fn tip_height(&self) -> Result<u64, UtxoError> {
        Ok(self.state.lock().await.tip)
    }

    async fn broadcast(&self, tx: &Transaction) -> Result<Txid, UtxoError> {
        let mut state = self.state.lock().await;
        let txid = tx.compute_txid();
        if state.txs.contains_key(&txid) {
            return Ok(txid);
        }

        let prevouts = Self::check_inputs(&state, tx)?;
        self.check_scripts(&state, tx, &prevouts)?;

        let available: u64 = prevouts.iter().map(|o| o.value.to_sat()).sum();
        let spent: u64 = tx.output.iter().map(|o| o.value.to_sat()).sum();
        if spent > available {
            return Err(UtxoError::InsufficientFunds {
                available,
                required: spent,
            });
        }

        Self::apply(&mut state, tx, None);
        state.mempool.push(txid);
        debug!(%txid, inputs = tx.input.len(), "Transaction accepted to mempool");
        Ok(txid)
    }

    async fn confirmations(&self, outpoint: &OutPoint) -> Result<Option<u64>, UtxoError> {
        let state = self.state.lock().await;
        Ok(state
            .txs
            .get(&outpoint.txid)
            .filter(|(tx, _)| (outpoint.vout as usize) < tx.output.len())
            .map(|(_, height)| state.confirmations(*height)))
    }

    async fn unspent_output(&self, outpoint: &OutPoint) -> Result<Option<TxOut>, UtxoError> {
        let state = self.state.lock().await;
        Ok(state.utxos.get(outpoint).map(|u| u.txout.clone()))
    }

    async fn spending_tx(&self, outpoint: &OutPoint) -> Result<Option<Transaction>, UtxoError> {
        let state = self.state.lock().await;
        Ok(state
            .spent_by
            .get(outpoint)
            .and_then(|txid| state.txs.get(txid))
            .map(|(tx, _)| tx.clone()))
    }

    /// Funding transactions are mined immediately in their own block.
    async fn fund_address(&self, address: &Address, amount: Amount) -> Result<OutPoint, UtxoError> {
        let mut state = self.state.lock().await;
        state.faucet_nonce += 1;
        let tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: ScriptBuf::from_bytes(state.faucet_nonce.to_le_bytes().to_vec()),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: amount,
                script_pubkey: address.script_pubkey(),
            }],
        };
        let txid = Self::apply(&mut state, &tx, None);
        // The faucet input is not a real outpoint.
        state.spent_by.remove(&OutPoint::null());
        state.mempool.push(txid);
        let height = Self::mine(&mut state, 1);
        info!(%address, sats = amount.to_sat(), height, "Funded address");
        Ok(OutPoint::new(txid, 0))
    }

    async fn mine_blocks(&self, n: u64) -> Result<u64, UtxoError> {
        let mut state = self.state.lock().await;
        Ok(Self::mine(&mut state, n))
    }
}
