//! In-memory state backend

use crate::core_sync::errors::{SyncError, SyncResult};
use crate::core_sync::traits::{StateBackend, StoredGroupRecord};
use crate::core_sync::types::{AccountId, GroupId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

type SlotKey = (String, AccountId, GroupId);

/// In-memory state backend (last write wins)
#[derive(Default)]
pub struct MemoryStateBackend {
    records: Arc<RwLock<HashMap<SlotKey, StoredGroupRecord>>>,
    fail_next_store: AtomicBool,
    fail_next_fetch: AtomicBool,
    stores: AtomicUsize,
}

impl MemoryStateBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `store` call fail with a transport error
    pub fn fail_next_store(&self) {
        self.fail_next_store.store(true, Ordering::SeqCst);
    }

    /// Make the next `fetch` call fail with a transport error
    pub fn fail_next_fetch(&self) {
        self.fail_next_fetch.store(true, Ordering::SeqCst);
    }

    /// Number of successful writes so far
    pub fn store_count(&self) -> usize {
        self.stores.load(Ordering::SeqCst)
    }

    /// The record exactly as the backend holds it
    pub async fn raw(
        &self,
        platform: &str,
        account: &AccountId,
        group_id: &GroupId,
    ) -> Option<StoredGroupRecord> {
        let records = self.records.read().await;
        records.get(&(platform.to_string(), account.clone(), group_id.clone())).cloned()
    }
}

#[async_trait]
impl StateBackend for MemoryStateBackend {
    async fn fetch(
        &self,
        platform: &str,
        account: &AccountId,
        group_id: &GroupId,
    ) -> SyncResult<Option<StoredGroupRecord>> {
        if self.fail_next_fetch.swap(false, Ordering::SeqCst) {
            return Err(SyncError::Transport("Injected fetch failure".to_string()));
        }
        Ok(self.raw(platform, account, group_id).await)
    }

    async fn store(
        &self,
        platform: &str,
        account: &AccountId,
        record: StoredGroupRecord,
    ) -> SyncResult<()> {
        if self.fail_next_store.swap(false, Ordering::SeqCst) {
            return Err(SyncError::Transport("Injected store failure".to_string()));
        }

        let mut records = self.records.write().await;
        let key = (platform.to_string(), account.clone(), record.group_id.clone());

        if let Some(existing) = records.get(&key) {
            if record.update_counter != existing.update_counter + 1 {
                warn!(
                    group_id = %record.group_id,
                    stored = existing.update_counter,
                    incoming = record.update_counter,
                    "Update counter gap, a concurrent write was overwritten"
                );
            }
        }

        records.insert(key, record);
        self.stores.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_groups(&self, platform: &str, account: &AccountId) -> SyncResult<Vec<GroupId>> {
        let records = self.records.read().await;
        let mut groups: Vec<GroupId> = records
            .keys()
            .filter(|(p, a, _)| p == platform && a == account)
            .map(|(_, _, group_id)| group_id.clone())
            .collect();
        groups.sort();
        Ok(groups)
    }
}
