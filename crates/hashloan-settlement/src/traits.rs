use async_trait::async_trait;
use hashloan_core::{BlockHeight, Loan, LoanId, PreimageHash};
use hashloan_crypto::Preimage;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::events::LoanEvent;

/// Read side of the settlement chain as seen by off-chain observers:
/// mirrors, watchers, and operators.
#[async_trait]
pub trait SettlementChain: Send + Sync {
    /// Identity of this chain instance. A new epoch restarts loan ids and
    /// event sequence numbers, so anything mirrored from another epoch is stale.
    fn epoch(&self) -> Uuid;

    /// Current block height.
    async fn height(&self) -> BlockHeight;

    /// Current state of a loan.
    async fn loan(&self, id: LoanId) -> Option<Loan>;

    /// Replay events with `seq >= from_seq`, in order.
    async fn events_since(&self, from_seq: u64) -> Vec<LoanEvent>;

    /// A secret revealed by a claim on the value lock for `hash`.
    async fn revealed_secret(&self, hash: &PreimageHash) -> Option<Preimage>;

    /// Subscribe to events emitted from now on.
    fn subscribe(&self) -> broadcast::Receiver<LoanEvent>;
}
