//! In-memory credential directory

use crate::core_sync::errors::{SyncError, SyncResult};
use crate::core_sync::traits::{CredentialDirectory, StoredCredential};
use crate::core_sync::types::{AccountId, PublicKeyPackage};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

type AccountKey = (String, AccountId);

#[derive(Default)]
pub struct MemoryDirectory {
    records: Arc<RwLock<HashMap<AccountKey, StoredCredential>>>,
    /// Superseded key-packages per account, oldest first
    revoked: Arc<RwLock<HashMap<AccountKey, Vec<PublicKeyPackage>>>>,
    fail_next_register: AtomicBool,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `register` call fail with a transport error
    pub fn fail_next_register(&self) {
        self.fail_next_register.store(true, Ordering::SeqCst);
    }

    pub async fn revoked(&self, platform: &str, account: &AccountId) -> Vec<PublicKeyPackage> {
        let revoked = self.revoked.read().await;
        revoked.get(&(platform.to_string(), account.clone())).cloned().unwrap_or_default()
    }

    /// Forget an account's credential, as if it had never registered
    pub async fn remove(&self, platform: &str, account: &AccountId) {
        let mut records = self.records.write().await;
        records.remove(&(platform.to_string(), account.clone()));
    }
}

#[async_trait]
impl CredentialDirectory for MemoryDirectory {
    async fn fetch_record(
        &self,
        platform: &str,
        account: &AccountId,
    ) -> SyncResult<Option<StoredCredential>> {
        let records = self.records.read().await;
        Ok(records.get(&(platform.to_string(), account.clone())).cloned())
    }

    async fn fetch_public(
        &self,
        platform: &str,
        account: &AccountId,
    ) -> SyncResult<Option<PublicKeyPackage>> {
        Ok(self.fetch_record(platform, account).await?.map(|record| record.public))
    }

    async fn register(
        &self,
        platform: &str,
        account: &AccountId,
        record: StoredCredential,
        previous: Option<PublicKeyPackage>,
    ) -> SyncResult<()> {
        if self.fail_next_register.swap(false, Ordering::SeqCst) {
            return Err(SyncError::Transport("Injected register failure".to_string()));
        }

        let key = (platform.to_string(), account.clone());
        if let Some(previous) = previous {
            let mut revoked = self.revoked.write().await;
            revoked.entry(key.clone()).or_default().push(previous);
        }

        let mut records = self.records.write().await;
        records.insert(key, record);
        debug!(%account, platform, "Registered credential");
        Ok(())
    }
}
