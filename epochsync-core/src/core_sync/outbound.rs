//! Outbound Queue
//!
//! Session-owned buffer of protocol messages waiting for the relay. An operation takes a
//! [`QueueMark`] before enqueuing; if its persist step fails it rolls back to that mark,
//! dropping only its own entries and leaving earlier ones untouched.

use crate::core_sync::errors::SyncResult;
use crate::core_sync::messages::OutboundMessage;
use crate::core_sync::traits::Relay;
use tracing::{debug, warn};

/// Position in the queue at the start of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueMark(usize);

#[derive(Debug, Default)]
pub struct OutboundQueue {
    pending: Vec<OutboundMessage>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message. Never blocks, never fails.
    pub fn enqueue(&mut self, message: OutboundMessage) {
        self.pending.push(message);
    }

    pub fn mark(&self) -> QueueMark {
        QueueMark(self.pending.len())
    }

    /// Drop everything enqueued since `mark`; returns how many entries were dropped
    pub fn rollback(&mut self, mark: QueueMark) -> usize {
        let dropped = self.pending.len().saturating_sub(mark.0);
        if dropped > 0 {
            warn!(dropped, "Rolling back queued outbound messages");
        }
        self.pending.truncate(mark.0);
        dropped
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn pending(&self) -> &[OutboundMessage] {
        &self.pending
    }

    /// Snapshot and clear the queue, then send the snapshot as one batch
    ///
    /// On failure the snapshot is gone; the next reconciliation pass re-derives what is
    /// still missing.
    pub async fn flush_all(&mut self, relay: &dyn Relay) -> SyncResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let batch = std::mem::take(&mut self.pending);
        let count = batch.len();

        match relay.send_batch(batch).await {
            Ok(()) => {
                debug!(count, "Flushed outbound queue");
                Ok(())
            }
            Err(e) => {
                warn!(count, error = %e, "Outbound batch lost");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_sync::memory::MemoryRelay;
    use crate::core_sync::types::AccountId;

    fn msg(to: &str) -> OutboundMessage {
        OutboundMessage { platform: "tg".into(), recipient: to.into(), payload: "{}".into() }
    }

    #[test]
    fn test_rollback_keeps_entries_before_mark() {
        let mut queue = OutboundQueue::new();
        queue.enqueue(msg("earlier"));

        let mark = queue.mark();
        queue.enqueue(msg("a"));
        queue.enqueue(msg("b"));

        assert_eq!(queue.rollback(mark), 2);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pending()[0].recipient, AccountId::from("earlier"));
        assert_eq!(queue.rollback(mark), 0);
    }

    #[tokio::test]
    async fn test_flush_sends_one_batch_and_clears() {
        let relay = MemoryRelay::new();
        let mut queue = OutboundQueue::new();
        queue.enqueue(msg("bob"));
        queue.enqueue(msg("carol"));

        queue.flush_all(&relay).await.unwrap();

        assert!(queue.is_empty());
        assert_eq!(relay.batches_sent(), 1);
        assert_eq!(relay.fetch_pending("tg", &"bob".into()).await.unwrap(), vec!["{}".to_string()]);
    }

    #[tokio::test]
    async fn test_flush_failure_loses_snapshot() {
        let relay = MemoryRelay::new();
        relay.fail_next_send();
        let mut queue = OutboundQueue::new();
        queue.enqueue(msg("bob"));

        assert!(queue.flush_all(&relay).await.is_err());
        assert!(queue.is_empty());
        assert!(relay.fetch_pending("tg", &"bob".into()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_flush_empty_queue_sends_nothing() {
        let relay = MemoryRelay::new();
        let mut queue = OutboundQueue::new();
        queue.flush_all(&relay).await.unwrap();
        assert_eq!(relay.batches_sent(), 0);
    }
}
