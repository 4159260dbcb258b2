//! Follows the loan book's event stream and keeps RocksDB in step.
//!
//! The mirror is eventually consistent: it resumes from a stored cursor,
//! replays anything it missed, then applies live events. Events it has
//! already applied are skipped, so a replay that overlaps the live stream
//! is harmless.
//!
//! Stored state is tagged with the book's epoch. State mirrored from an
//! earlier book, whose loan ids and sequence numbers the current book
//! reuses, is dropped before the first replay.

use std::sync::Arc;

use anyhow::Result;
use hashloan_settlement::{LoanEvent, LoanEventKind, SettlementChain};
use tokio::sync::{broadcast, watch};

use crate::storage::Storage;

pub struct EventMirror {
    chain: Arc<dyn SettlementChain>,
    storage: Arc<Storage>,
}

impl EventMirror {
    pub fn new(chain: Arc<dyn SettlementChain>, storage: Arc<Storage>) -> Self {
        Self { chain, storage }
    }

    /// Drop stored state that was mirrored from another book. Returns
    /// `true` if anything was dropped.
    pub fn reconcile(&self) -> Result<bool> {
        let epoch = self.chain.epoch();
        match self.storage.book_epoch()? {
            Some(stored) if stored == epoch => Ok(false),
            Some(stored) => {
                tracing::warn!(%stored, %epoch, "mirrored state belongs to another book, resetting");
                self.storage.reset_for_epoch(epoch)?;
                Ok(true)
            }
            None => {
                self.storage.reset_for_epoch(epoch)?;
                Ok(false)
            }
        }
    }

    /// Replay every event after the stored cursor. Returns how many were applied.
    pub async fn catch_up(&self) -> Result<usize> {
        self.reconcile()?;
        let from = self.storage.mirror_cursor()?;
        let events = self.chain.events_since(from).await;
        let mut applied = 0;
        for event in &events {
            if self.apply(event).await? {
                applied += 1;
            }
        }
        if applied > 0 {
            tracing::info!(from, applied, "mirror caught up");
        }
        Ok(applied)
    }

    /// Apply one event. Returns `false` if it was already applied.
    pub async fn apply(&self, event: &LoanEvent) -> Result<bool> {
        let cursor = self.storage.mirror_cursor()?;
        if event.seq < cursor {
            return Ok(false);
        }
        if event.seq > cursor {
            // A gap means the live stream ran ahead of the replay.
            anyhow::bail!("mirror gap: expected event {cursor}, got {}", event.seq);
        }

        let record_id = self.storage.put_event(event)?;
        match &event.kind {
            LoanEventKind::Deleted => {
                self.storage.delete_loan(event.loan_id)?;
                self.storage.delete_envelopes(event.loan_id)?;
            }
            kind => {
                if let LoanEventKind::Requested { borrower, .. } = kind {
                    self.storage.index_borrower_loan(borrower, event.loan_id)?;
                }
                if let Some(loan) = self.chain.loan(event.loan_id).await {
                    self.storage.put_loan(&loan)?;
                }
            }
        }
        self.storage.set_mirror_cursor(event.seq + 1)?;

        tracing::debug!(
            seq = event.seq,
            loan_id = %event.loan_id,
            event = event.kind.name(),
            %record_id,
            "mirrored event"
        );
        Ok(true)
    }

    /// Follow `events` until the channel closes or `shutdown` flips.
    ///
    /// Subscribe before calling [`EventMirror::catch_up`] so nothing falls
    /// between the replay and the live stream.
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
                            if let Err(e) = self.apply(&ev).await {
                                tracing::warn!(error = %e, "mirror apply failed, replaying");
                                self.catch_up().await?;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!(missed = n, "mirror lagged, replaying");
                            self.catch_up().await?;
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            tracing::info!("book event channel closed");
                            break;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    tracing::info!("mirror shutting down");
                    break;
                }
            }
        }
        Ok(())
    }
}
