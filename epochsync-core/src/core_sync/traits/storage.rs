//! State Backend Trait
//!
//! Remote document store for group state. Documents are sealed before they reach the
//! backend; only the update counter travels in plaintext.

use crate::core_sync::errors::SyncResult;
use crate::core_sync::types::{AccountId, GroupId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One group's sealed state document as held by the store
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredGroupRecord {
    pub group_id: GroupId,
    pub update_counter: u64,
    #[serde(with = "hex::serde")]
    pub sealed: Vec<u8>,
}

/// Remote state store keyed by (platform, account, group)
///
/// Implementations are expected to serialize writes per key. The engine does not lock;
/// two writers on the same key resolve as last-write-wins.
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Load a group document. `Ok(None)` when the group has never been stored.
    async fn fetch(
        &self,
        platform: &str,
        account: &AccountId,
        group_id: &GroupId,
    ) -> SyncResult<Option<StoredGroupRecord>>;

    /// Replace a group document
    async fn store(
        &self,
        platform: &str,
        account: &AccountId,
        record: StoredGroupRecord,
    ) -> SyncResult<()>;

    /// All groups stored for this account
    async fn list_groups(&self, platform: &str, account: &AccountId) -> SyncResult<Vec<GroupId>>;
}
