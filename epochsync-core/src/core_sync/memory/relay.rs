//! In-memory relay with per-recipient FIFO inboxes

use crate::core_sync::errors::{SyncError, SyncResult};
use crate::core_sync::messages::OutboundMessage;
use crate::core_sync::traits::Relay;
use crate::core_sync::types::AccountId;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

type InboxKey = (String, AccountId);

#[derive(Default)]
pub struct MemoryRelay {
    inboxes: Arc<RwLock<HashMap<InboxKey, VecDeque<String>>>>,
    fail_next_send: AtomicBool,
    fail_next_fetch: AtomicBool,
    batches: AtomicUsize,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_send(&self) {
        self.fail_next_send.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_fetch(&self) {
        self.fail_next_fetch.store(true, Ordering::SeqCst);
    }

    /// Number of batches delivered
    pub fn batches_sent(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }

    /// Put a raw payload straight into an inbox
    pub async fn inject(&self, platform: &str, recipient: &AccountId, payload: impl Into<String>) {
        let mut inboxes = self.inboxes.write().await;
        inboxes
            .entry((platform.to_string(), recipient.clone()))
            .or_default()
            .push_back(payload.into());
    }

    /// Messages waiting for `recipient` without consuming them
    pub async fn pending_count(&self, platform: &str, recipient: &AccountId) -> usize {
        let inboxes = self.inboxes.read().await;
        inboxes.get(&(platform.to_string(), recipient.clone())).map_or(0, VecDeque::len)
    }
}

#[async_trait]
impl Relay for MemoryRelay {
    async fn fetch_pending(&self, platform: &str, account: &AccountId) -> SyncResult<Vec<String>> {
        if self.fail_next_fetch.swap(false, Ordering::SeqCst) {
            return Err(SyncError::Transport("Injected fetch failure".to_string()));
        }

        let mut inboxes = self.inboxes.write().await;
        Ok(inboxes
            .remove(&(platform.to_string(), account.clone()))
            .map(Vec::from)
            .unwrap_or_default())
    }

    async fn send_batch(&self, batch: Vec<OutboundMessage>) -> SyncResult<()> {
        if self.fail_next_send.swap(false, Ordering::SeqCst) {
            return Err(SyncError::Transport("Injected send failure".to_string()));
        }

        let mut inboxes = self.inboxes.write().await;
        for message in batch {
            inboxes
                .entry((message.platform, message.recipient))
                .or_default()
                .push_back(message.payload);
        }
        self.batches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
