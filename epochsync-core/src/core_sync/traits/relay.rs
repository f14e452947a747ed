//! Relay Trait
//!
//! Best-effort delivery of serialized envelopes between accounts.

use crate::core_sync::errors::SyncResult;
use crate::core_sync::messages::OutboundMessage;
use crate::core_sync::types::AccountId;
use async_trait::async_trait;

#[async_trait]
pub trait Relay: Send + Sync {
    /// Fetch and delete every pending message for `account`, in arrival order
    ///
    /// An empty inbox is `Ok(vec![])`.
    async fn fetch_pending(&self, platform: &str, account: &AccountId) -> SyncResult<Vec<String>>;

    /// Deliver a batch. On error none of the batch is considered delivered.
    async fn send_batch(&self, batch: Vec<OutboundMessage>) -> SyncResult<()>;
}
