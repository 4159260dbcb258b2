//! Completes presigned Bitcoin spends once the settlement chain reveals
//! the secret they wait on.
//!
//! A borrower registers the fully signed E1 spend and the C1 spend. When
//! the book emits `Activated` the escrow moves into the collateral output.
//! When it emits `Repaid` the collateral returns to the borrower. Both
//! are broadcast without further input from either party.
//!
//! While storage is attached the signatures of every registered spend are
//! persisted, so a restarted node can pick the spends up again.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use anyhow::Result;
use bitcoin::Txid;
use dashmap::DashMap;
use hashloan_core::LoanId;
use hashloan_crypto::Preimage;
use hashloan_settlement::{LoanEvent, LoanEventKind, SettlementChain};
use hashloan_utxo::{BitcoinNode, LeafKind, LoanOutput, PresignedSpend};
use tokio::sync::{broadcast, watch};

use crate::storage::Storage;

type SpendKey = (LoanId, LeafKind);

pub struct SpendWatcher {
    chain: Arc<dyn SettlementChain>,
    bitcoin: Arc<dyn BitcoinNode>,
    pending: DashMap<SpendKey, PresignedSpend>,
    /// Registered signatures are written here while the node is running.
    storage: RwLock<Option<Arc<Storage>>>,
}

impl SpendWatcher {
    pub fn new(chain: Arc<dyn SettlementChain>, bitcoin: Arc<dyn BitcoinNode>) -> Self {
        Self {
            chain,
            bitcoin,
            pending: DashMap::new(),
            storage: RwLock::new(None),
        }
    }

    /// Persist signatures of spends registered from now on. `None` detaches.
    pub fn attach_storage(&self, storage: Option<Arc<Storage>>) {
        *self.storage.write().unwrap_or_else(PoisonError::into_inner) = storage;
    }

    fn storage(&self) -> Option<Arc<Storage>> {
        self.storage
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Register a signed spend that needs a secret to complete.
    ///
    /// If the secret is already public the spend is broadcast right away and
    /// its txid returned.
    pub async fn watch(&self, loan_id: LoanId, spend: PresignedSpend) -> Result<Option<Txid>> {
        let leaf = spend.template().leaf();
        if !leaf.requires_secret() {
            anyhow::bail!("leaf {leaf} needs no secret, broadcast it directly");
        }
        if !spend.is_complete() {
            anyhow::bail!("spend for loan {loan_id} on leaf {leaf} is missing signatures");
        }

        if let Some(storage) = self.storage() {
            for role in leaf.signers() {
                storage.put_envelope(&spend.envelope(loan_id, *role)?)?;
            }
        }

        let hash = spend.output().hash();
        let key = (loan_id, leaf);
        self.pending.insert(key, spend);

        // The reveal, and the event carrying it, may have landed before the insert.
        if let Some(secret) = self.chain.revealed_secret(&hash).await {
            return self.complete_pending(key, &secret).await;
        }

        tracing::info!(%loan_id, %leaf, "watching for secret");
        Ok(None)
    }

    /// Stop watching a spend, e.g. after the loan took another path.
    pub fn unwatch(&self, loan_id: LoanId, leaf: LeafKind) -> Option<PresignedSpend> {
        self.pending.remove(&(loan_id, leaf)).map(|(_, spend)| spend)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_watching(&self, loan_id: LoanId, leaf: LeafKind) -> bool {
        self.pending.contains_key(&(loan_id, leaf))
    }

    /// React to one book event. Returns the txid if a spend was broadcast.
    pub async fn handle_event(&self, event: &LoanEvent) -> Result<Option<Txid>> {
        let loan_id = event.loan_id;
        match &event.kind {
            LoanEventKind::Activated { secret_borrower } => {
                self.complete_pending((loan_id, LeafKind::EscrowCooperative), secret_borrower)
                    .await
            }
            LoanEventKind::Repaid { secret_lender } => {
                self.complete_pending((loan_id, LeafKind::CollateralRelease), secret_lender)
                    .await
            }
            kind if kind.resulting_status().map_or(true, |s| s.is_terminal()) => {
                // No secret will ever arrive for this loan.
                for leaf in [LeafKind::EscrowCooperative, LeafKind::CollateralRelease] {
                    if self.pending.remove(&(loan_id, leaf)).is_some() {
                        tracing::debug!(%loan_id, %leaf, event = kind.name(), "dropped pending spend");
                    }
                }
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    /// Take the spend pending under `key` and broadcast it with `secret`.
    /// Whoever removes the entry completes it; a failed spend goes back.
    async fn complete_pending(&self, key: SpendKey, secret: &Preimage) -> Result<Option<Txid>> {
        let Some((_, spend)) = self.pending.remove(&key) else {
            return Ok(None);
        };
        match self.complete(key.0, &spend, secret).await {
            Ok(txid) => Ok(Some(txid)),
            Err(e) => {
                self.pending.entry(key).or_insert(spend);
                Err(e)
            }
        }
    }

    async fn complete(
        &self,
        loan_id: LoanId,
        spend: &PresignedSpend,
        secret: &Preimage,
    ) -> Result<Txid> {
        if !secret.verify(&spend.output().hash()) {
            anyhow::bail!("revealed secret does not open the {} output", spend.output().kind());
        }
        let tx = spend.finalize(Some(secret))?;
        let txid = self.bitcoin.broadcast(&tx).await?;
        tracing::info!(
            %loan_id,
            leaf = %spend.template().leaf(),
            %txid,
            "broadcast presigned spend"
        );
        Ok(txid)
    }

    /// Follow `events` until the channel closes or `shutdown` flips.
    pub async fn run(
        &self,
        mut events: broadcast::Receiver<LoanEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Ok(ev) => {
                            if let Err(e) = self.handle_event(&ev).await {
                                tracing::error!(
                                    loan_id = %ev.loan_id,
                                    error = %e,
                                    "presigned spend failed"
                                );
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!(missed = n, "watcher lagged, replaying");
                            self.replay().await;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
                _ = shutdown.changed() => {
                    tracing::info!("spend watcher shutting down");
                    break;
                }
            }
        }
        Ok(())
    }

    /// Retry every pending spend against secrets already on chain.
    pub async fn replay(&self) -> usize {
        let pending: Vec<(SpendKey, _)> = self
            .pending
            .iter()
            .map(|e| (*e.key(), e.value().output().hash()))
            .collect();
        let mut completed = 0;
        for (key, hash) in pending {
            let Some(secret) = self.chain.revealed_secret(&hash).await else {
                continue;
            };
            match self.complete_pending(key, &secret).await {
                Ok(Some(_)) => completed += 1,
                Ok(None) => {}
                Err(e) => tracing::error!(loan_id = %key.0, error = %e, "replayed spend failed"),
            }
        }
        completed
    }

    /// Rebuild spends from stored envelopes and watch the complete ones.
    ///
    /// Loans the chain no longer knows, or that already finished, are
    /// skipped. Returns how many spends were registered.
    pub async fn restore(&self) -> Result<usize> {
        let Some(storage) = self.storage() else {
            return Ok(0);
        };

        let mut spends: HashMap<SpendKey, PresignedSpend> = HashMap::new();
        for envelope in storage.envelopes()? {
            let key = (envelope.loan_id, envelope.template.leaf());
            let spend = match spends.entry(key) {
                Entry::Occupied(e) => e.into_mut(),
                Entry::Vacant(v) => {
                    let Some(loan) = self.chain.loan(key.0).await else {
                        continue;
                    };
                    if loan.status.is_terminal() {
                        continue;
                    }
                    let output = LoanOutput::for_loan(&loan, key.1.output())?;
                    v.insert(PresignedSpend::new(envelope.template.clone(), output)?)
                }
            };
            spend.accept_envelope(&envelope)?;
        }

        let mut restored = 0;
        for ((loan_id, leaf), spend) in spends {
            if !spend.is_complete() || self.is_watching(loan_id, leaf) {
                continue;
            }
            self.watch(loan_id, spend).await?;
            restored += 1;
        }
        if restored > 0 {
            tracing::info!(restored, "restored presigned spends from storage");
        }
        Ok(restored)
    }
}
