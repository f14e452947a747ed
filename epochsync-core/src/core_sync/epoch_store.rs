//! Epoch State Store
//!
//! Typed access to a group's versioned state on top of a [`StateBackend`]:
//! - every document is sealed with the account's [`StateCipher`] before it leaves the process
//! - every write is checked locally: each `epoch_state` key must equal the epoch embedded in
//!   its blob and `latest_epoch` must be the highest key
//! - `update_counter` goes up by exactly one per successful write

use crate::core_sync::cipher::{state_aad, StateCipher};
use crate::core_sync::errors::{SyncError, SyncResult};
use crate::core_sync::traits::{GroupProtocol, StateBackend, StoredGroupRecord};
use crate::core_sync::types::{AccountId, EpochBlob, GroupId, GroupState};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct EpochStateStore {
    backend: Arc<dyn StateBackend>,
    protocol: Arc<dyn GroupProtocol>,
    cipher: StateCipher,
}

impl EpochStateStore {
    pub fn new(
        backend: Arc<dyn StateBackend>,
        protocol: Arc<dyn GroupProtocol>,
        cipher: StateCipher,
    ) -> Self {
        Self { backend, protocol, cipher }
    }

    /// Load and unseal a group's state. `Ok(None)` if the group was never stored.
    pub async fn get(
        &self,
        platform: &str,
        account: &AccountId,
        group_id: &GroupId,
    ) -> SyncResult<Option<GroupState>> {
        let Some(record) = self.backend.fetch(platform, account, group_id).await? else {
            return Ok(None);
        };

        let mut state: GroupState =
            self.cipher.open_json(&record.sealed, &state_aad(platform, account, group_id))?;

        if state.group_id != *group_id {
            return Err(SyncError::StateInconsistency {
                group_id: group_id.to_string(),
                reason: format!("document belongs to group {}", state.group_id),
            });
        }
        if state.update_counter != record.update_counter {
            warn!(
                %group_id,
                sealed = state.update_counter,
                plain = record.update_counter,
                "Update counter mismatch between document and record"
            );
        }
        state.update_counter = record.update_counter;

        Ok(Some(state))
    }

    /// Check and persist `state`; on success its `update_counter` is advanced in place
    pub async fn put(
        &self,
        platform: &str,
        account: &AccountId,
        state: &mut GroupState,
    ) -> SyncResult<()> {
        if let Err(e) = self.check_consistency(state) {
            warn!(group_id = %state.group_id, error = %e, "Persist rejected");
            return Err(e);
        }

        let next_counter = state.update_counter + 1;
        let mut document = state.clone();
        document.update_counter = next_counter;

        let sealed =
            self.cipher.seal_json(&document, &state_aad(platform, account, &state.group_id))?;
        let record = StoredGroupRecord {
            group_id: state.group_id.clone(),
            update_counter: next_counter,
            sealed,
        };

        self.backend.store(platform, account, record).await?;
        state.update_counter = next_counter;

        debug!(
            group_id = %state.group_id,
            epoch = state.latest_epoch,
            update_counter = next_counter,
            "Persisted group state"
        );
        Ok(())
    }

    /// Drop every epoch entry `<= upper_bound`; the latest epoch can never be pruned
    pub async fn delete_epochs(
        &self,
        platform: &str,
        account: &AccountId,
        group_id: &GroupId,
        upper_bound: u64,
    ) -> SyncResult<GroupState> {
        let mut state = self
            .get(platform, account, group_id)
            .await?
            .ok_or_else(|| SyncError::GroupNotFound(group_id.clone()))?;

        if upper_bound >= state.latest_epoch {
            return Err(SyncError::InvalidInput(format!(
                "Cannot prune up to epoch {} in group {}: latest epoch is {}",
                upper_bound, group_id, state.latest_epoch
            )));
        }

        let before = state.epoch_state.len();
        state.epoch_state.retain(|epoch, _| *epoch > upper_bound);
        if state.epoch_state.len() == before {
            return Ok(state);
        }

        self.put(platform, account, &mut state).await?;
        debug!(%group_id, upper_bound, pruned = before - state.epoch_state.len(), "Pruned epochs");
        Ok(state)
    }

    /// Blob of a single epoch, if still retained
    pub async fn get_epoch(
        &self,
        platform: &str,
        account: &AccountId,
        group_id: &GroupId,
        epoch: u64,
    ) -> SyncResult<Option<EpochBlob>> {
        Ok(self
            .get(platform, account, group_id)
            .await?
            .and_then(|state| state.epoch_state.get(&epoch).cloned()))
    }

    pub async fn list_groups(&self, platform: &str, account: &AccountId) -> SyncResult<Vec<GroupId>> {
        self.backend.list_groups(platform, account).await
    }

    /// Epoch keys must match blob content and `latest_epoch` must be the newest entry
    pub fn check_consistency(&self, state: &GroupState) -> SyncResult<()> {
        let inconsistent = |reason: String| SyncError::StateInconsistency {
            group_id: state.group_id.to_string(),
            reason,
        };

        for (epoch, blob) in &state.epoch_state {
            let embedded = self
                .protocol
                .state_epoch(blob)
                .map_err(|e| inconsistent(format!("unreadable blob at epoch {}: {}", epoch, e)))?;
            if embedded != *epoch {
                return Err(inconsistent(format!(
                    "entry {} holds a blob for epoch {}",
                    epoch, embedded
                )));
            }
        }

        match state.epoch_state.keys().next_back() {
            Some(newest) if *newest == state.latest_epoch => Ok(()),
            Some(newest) => Err(inconsistent(format!(
                "latest_epoch is {} but newest entry is {}",
                state.latest_epoch, newest
            ))),
            None => Err(inconsistent("no epoch entries".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_sync::adapters::SealedGroupProtocol;
    use crate::core_sync::memory::MemoryStateBackend;
    use crate::core_sync::traits::Proposal;
    use crate::core_sync::types::GroupOrigin;
    use std::time::Duration;

    const PLATFORM: &str = "tg";

    struct Fixture {
        backend: Arc<MemoryStateBackend>,
        store: EpochStateStore,
        state: GroupState,
    }

    /// A group with epochs 1..=last, all retained
    fn fixture(last: u64) -> Fixture {
        let protocol = SealedGroupProtocol;
        let alice = protocol
            .generate_credential(&"alice".into(), 0, Duration::from_secs(3600))
            .unwrap();
        let created = protocol.create_group(&"g".into(), &[], &alice).unwrap();

        let mut state = GroupState::new(
            "g".into(),
            GroupOrigin { creation_time: 0, creator: "alice".into() },
            protocol.members(&created.state).unwrap(),
            1,
            created.state,
        );
        for epoch in 2..=last {
            let out = protocol
                .commit(state.latest_blob().unwrap(), &[Proposal::Update], &alice)
                .unwrap();
            state.advance(epoch, out.state, None);
        }

        let backend = Arc::new(MemoryStateBackend::new());
        let store = EpochStateStore::new(
            backend.clone(),
            Arc::new(protocol),
            StateCipher::from_key([9u8; 32]),
        );
        Fixture { backend, store, state }
    }

    #[tokio::test]
    async fn test_put_get_roundtrip_increments_counter() {
        let Fixture { store, mut state, .. } = fixture(2);
        let alice = AccountId::from("alice");

        store.put(PLATFORM, &alice, &mut state).await.unwrap();
        assert_eq!(state.update_counter, 1);
        store.put(PLATFORM, &alice, &mut state).await.unwrap();
        assert_eq!(state.update_counter, 2);

        let loaded = store.get(PLATFORM, &alice, &"g".into()).await.unwrap().unwrap();
        assert_eq!(loaded, state);
        assert!(store.get(PLATFORM, &alice, &"other".into()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_sees_only_ciphertext() {
        let Fixture { backend, store, mut state } = fixture(1);
        let alice = AccountId::from("alice");
        store.put(PLATFORM, &alice, &mut state).await.unwrap();

        let raw = backend.raw(PLATFORM, &alice, &"g".into()).await.unwrap();
        assert_eq!(raw.update_counter, 1);
        let text = String::from_utf8_lossy(&raw.sealed);
        assert!(!text.contains("alice"));
        assert!(!text.contains("epoch_state"));
    }

    #[tokio::test]
    async fn test_put_rejects_mismatched_epoch_entry() {
        let Fixture { backend, store, mut state } = fixture(2);
        let alice = AccountId::from("alice");

        let blob_two = state.epoch_state[&2].clone();
        state.epoch_state.insert(3, blob_two);
        state.latest_epoch = 3;

        let result = store.put(PLATFORM, &alice, &mut state).await;
        assert!(matches!(result, Err(SyncError::StateInconsistency { .. })));
        assert_eq!(state.update_counter, 0);
        assert_eq!(backend.store_count(), 0);
    }

    #[tokio::test]
    async fn test_put_rejects_stale_latest_epoch() {
        let Fixture { store, mut state, .. } = fixture(3);
        state.latest_epoch = 2;
        assert!(store.check_consistency(&state).is_err());
    }

    #[tokio::test]
    async fn test_failed_store_keeps_counter() {
        let Fixture { backend, store, mut state } = fixture(1);
        backend.fail_next_store();

        let result = store.put(PLATFORM, &"alice".into(), &mut state).await;
        assert!(matches!(result, Err(SyncError::Transport(_))));
        assert_eq!(state.update_counter, 0);
    }

    #[tokio::test]
    async fn test_delete_epochs_keeps_newer() {
        let Fixture { store, mut state, .. } = fixture(5);
        let alice = AccountId::from("alice");
        let group = GroupId::from("g");
        store.put(PLATFORM, &alice, &mut state).await.unwrap();

        let pruned = store.delete_epochs(PLATFORM, &alice, &group, 4).await.unwrap();
        assert_eq!(pruned.epoch_state.keys().copied().collect::<Vec<_>>(), vec![5]);
        assert_eq!(pruned.update_counter, 2);

        for epoch in 1..=4 {
            assert!(store.get_epoch(PLATFORM, &alice, &group, epoch).await.unwrap().is_none());
        }
        assert_eq!(
            store.get_epoch(PLATFORM, &alice, &group, 5).await.unwrap(),
            state.epoch_state.get(&5).cloned()
        );
    }

    #[tokio::test]
    async fn test_delete_epochs_refuses_latest() {
        let Fixture { store, mut state, .. } = fixture(2);
        let alice = AccountId::from("alice");
        store.put(PLATFORM, &alice, &mut state).await.unwrap();

        assert!(matches!(
            store.delete_epochs(PLATFORM, &alice, &"g".into(), 2).await,
            Err(SyncError::InvalidInput(_))
        ));
        assert!(matches!(
            store.delete_epochs(PLATFORM, &alice, &"missing".into(), 1).await,
            Err(SyncError::GroupNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_documents_are_bound_to_their_slot() {
        let Fixture { backend, store, mut state } = fixture(1);
        let alice = AccountId::from("alice");
        store.put(PLATFORM, &alice, &mut state).await.unwrap();

        // Replay alice's document into bob's slot
        let mut record = backend.raw(PLATFORM, &alice, &"g".into()).await.unwrap();
        record.update_counter = 1;
        backend.store(PLATFORM, &"bob".into(), record).await.unwrap();

        assert!(matches!(
            store.get(PLATFORM, &"bob".into(), &"g".into()).await,
            Err(SyncError::Cipher(_))
        ));
    }
}
