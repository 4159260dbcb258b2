//! The devnet node orchestrator.
//!
//! Ties the loan book, the in-memory Bitcoin chain, the spend watcher and
//! the storage mirror together. Settlement blocks are produced on a timer;
//! Bitcoin blocks follow at the configured block ratio.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use hashloan_core::BlockHeight;
use hashloan_settlement::{Ledger, LoanBook};
use hashloan_utxo::adapters::InMemoryBitcoinNode;
use hashloan_utxo::BitcoinNode;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::HashloanConfig;
use crate::mirror::EventMirror;
use crate::storage::Storage;
use crate::watcher::SpendWatcher;

pub struct HashloanNode {
    /// Node configuration.
    config: HashloanConfig,
    /// The settlement-chain loan book.
    book: Arc<LoanBook>,
    /// The Bitcoin chain loan outputs live on.
    bitcoin: Arc<InMemoryBitcoinNode>,
    /// Completes registered presigned spends.
    watcher: Arc<SpendWatcher>,
    /// Persistent storage (None until start).
    storage: Option<Arc<Storage>>,
    /// Flipped to stop background tasks.
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl HashloanNode {
    /// Create a node with funded devnet accounts. Nothing runs until [`start`].
    ///
    /// [`start`]: HashloanNode::start
    pub fn new(config: HashloanConfig) -> Result<Self> {
        config.validate()?;

        let ledger = Arc::new(Ledger::new());
        for account in &config.devnet.accounts {
            ledger.credit(&account.name, account.balance)?;
            tracing::debug!(account = %account.name, balance = %account.balance, "funded devnet account");
        }

        let book = Arc::new(LoanBook::new(config.protocol.clone(), ledger)?);
        let bitcoin = Arc::new(InMemoryBitcoinNode::new(config.network()?));
        let watcher = Arc::new(SpendWatcher::new(book.clone(), bitcoin.clone()));
        let (shutdown_tx, _) = watch::channel(false);

        tracing::info!(
            network = %config.bitcoin.network,
            accounts = config.devnet.accounts.len(),
            "Hashloan node created"
        );

        Ok(Self {
            config,
            book,
            bitcoin,
            watcher,
            storage: None,
            shutdown_tx,
            tasks: Vec::new(),
        })
    }

    /// Open storage, replay missed events, restore watched spends, and
    /// spawn the mirror and watcher.
    ///
    /// The book lives in memory, so storage left by an earlier book is
    /// reset before the replay.
    pub async fn start(&mut self) -> Result<()> {
        tracing::info!("starting Hashloan node");

        let storage = Arc::new(Storage::open(&self.config.storage.data_dir)?);
        tracing::info!(path = %self.config.storage.data_dir.display(), "storage initialized");

        // Subscribe before the replay so no event falls in between.
        let mirror = Arc::new(EventMirror::new(self.book.clone(), storage.clone()));
        let mirror_events = self.book.subscribe();
        mirror.catch_up().await?;

        self.watcher.attach_storage(Some(storage.clone()));
        self.watcher.restore().await?;

        let shutdown_rx = self.shutdown_tx.subscribe();
        self.tasks.push(tokio::spawn(async move {
            if let Err(e) = mirror.run(mirror_events, shutdown_rx).await {
                tracing::error!(error = %e, "event mirror stopped");
            }
        }));

        let watcher = self.watcher.clone();
        let watcher_events = self.book.subscribe();
        let shutdown_rx = self.shutdown_tx.subscribe();
        self.tasks.push(tokio::spawn(async move {
            if let Err(e) = watcher.run(watcher_events, shutdown_rx).await {
                tracing::error!(error = %e, "spend watcher stopped");
            }
        }));

        self.storage = Some(storage);
        Ok(())
    }

    /// Produce blocks until [`shutdown`] is called.
    ///
    /// [`shutdown`]: HashloanNode::shutdown
    pub async fn run(&self) -> Result<()> {
        let mut interval =
            tokio::time::interval(Duration::from_millis(self.config.devnet.block_interval_ms));
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let (height, btc_height) = self.tick().await?;
                    tracing::trace!(height, btc_height, "produced block");
                }
                _ = shutdown_rx.changed() => break,
            }
        }
        Ok(())
    }

    /// Advance the settlement chain one block and mine any Bitcoin blocks
    /// now due. Returns both heights.
    pub async fn tick(&self) -> Result<(BlockHeight, u64)> {
        let height = self.book.advance(1);
        let ratio = self.book.params().block_ratio;
        let due = (height as u128 * ratio.utxo as u128 / ratio.settlement as u128) as u64;

        let mut btc_height = self.bitcoin.tip_height().await?;
        if due > btc_height {
            btc_height = self.bitcoin.mine_blocks(due - btc_height).await?;
        }
        Ok((height, btc_height))
    }

    /// Stop background tasks and wait for them.
    pub async fn shutdown(&mut self) -> Result<()> {
        tracing::info!("shutting down Hashloan node");
        self.shutdown_tx.send_replace(true);
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "background task panicked");
            }
        }
        self.watcher.attach_storage(None);
        self.storage = None;
        Ok(())
    }

    pub fn book(&self) -> &Arc<LoanBook> {
        &self.book
    }

    pub fn bitcoin(&self) -> &Arc<InMemoryBitcoinNode> {
        &self.bitcoin
    }

    pub fn watcher(&self) -> &Arc<SpendWatcher> {
        &self.watcher
    }

    pub fn storage(&self) -> Option<&Arc<Storage>> {
        self.storage.as_ref()
    }

    pub fn config(&self) -> &HashloanConfig {
        &self.config
    }
}
