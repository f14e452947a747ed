//! Account Session - entry point of the engine
//!
//! One [`AccountSession`] per (platform, account). It owns the outbound queue, the cached
//! credential and the set of groups it has observed, and wires the reconciler, the inbound
//! processor and the credential manager to the shared collaborators.
//!
//! # Concurrency
//!
//! Every operation takes `&mut self`, so a session runs one operation at a time. Callers
//! that share a session between tasks wrap it in a `tokio::sync::Mutex` (one actor per
//! account). Sessions of different accounts run fully in parallel.
//!
//! ```text
//! ┌──────────────────────────────┐
//! │        AccountSession        │
//! └──┬──────────┬─────────────┬──┘
//!    │          │             │
//!    ▼          ▼             ▼
//! Reconciler  Inbound   CredentialManager
//!    │          │             │
//!    └────► EpochStateStore ◄─┘  ──► OutboundQueue ──► Relay
//! ```

use crate::config::SyncConfig;
use crate::core_sync::cipher::StateCipher;
use crate::core_sync::clock::Clock;
use crate::core_sync::credentials::CredentialManager;
use crate::core_sync::epoch_store::EpochStateStore;
use crate::core_sync::errors::{SyncError, SyncResult};
use crate::core_sync::inbound::{DrainReport, InboundProcessor};
use crate::core_sync::keyserver::KeyServer;
use crate::core_sync::outbound::OutboundQueue;
use crate::core_sync::reconciler::Reconciler;
use crate::core_sync::traits::{Ciphertext, CredentialDirectory, GroupProtocol, Relay, StateBackend};
use crate::core_sync::types::{AccountId, CredentialRecord, GroupId, GroupState};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

/// External capabilities a session runs against
#[derive(Clone)]
pub struct Collaborators {
    pub protocol: Arc<dyn GroupProtocol>,
    pub state: Arc<dyn StateBackend>,
    pub directory: Arc<dyn CredentialDirectory>,
    pub relay: Arc<dyn Relay>,
    pub clock: Arc<dyn Clock>,
}

/// Immutable per-session wiring
pub struct SyncContext {
    pub platform: String,
    pub account: AccountId,
    pub protocol: Arc<dyn GroupProtocol>,
    pub store: EpochStateStore,
    pub keys: KeyServer,
    pub relay: Arc<dyn Relay>,
    pub clock: Arc<dyn Clock>,
    pub config: SyncConfig,
}

impl SyncContext {
    /// # Arguments
    ///
    /// * `cipher` - at-rest key of this account, from the authentication layer
    pub fn new(
        platform: impl Into<String>,
        account: AccountId,
        cipher: StateCipher,
        collaborators: Collaborators,
        config: SyncConfig,
    ) -> Self {
        let store = EpochStateStore::new(
            collaborators.state,
            collaborators.protocol.clone(),
            cipher.clone(),
        );
        let keys = KeyServer::new(collaborators.directory, cipher);

        Self {
            platform: platform.into(),
            account,
            protocol: collaborators.protocol,
            store,
            keys,
            relay: collaborators.relay,
            clock: collaborators.clock,
            config,
        }
    }
}

/// Mutable per-session state
#[derive(Debug, Default)]
pub struct SessionState {
    pub queue: OutboundQueue,
    pub credential: Option<CredentialRecord>,
    /// Credential replaced by this session's last rotation; opens invites issued before it
    pub previous_credential: Option<CredentialRecord>,
    /// Groups this session has seen state for
    pub known_groups: BTreeSet<GroupId>,
}

impl SessionState {
    pub fn credential(&self, account: &AccountId) -> SyncResult<&CredentialRecord> {
        self.credential
            .as_ref()
            .ok_or_else(|| SyncError::MissingCredential(account.to_string()))
    }
}

/// Result of [`AccountSession::encrypt`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncryptOutcome {
    Encrypted(Ciphertext),
    /// The group has no cryptographic state; the plaintext is returned untouched
    Unprotected(Vec<u8>),
}

/// Result of [`AccountSession::decrypt`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecryptOutcome {
    Decrypted(Vec<u8>),
    NotDecrypted(NotDecryptedReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotDecryptedReason {
    NoGroupState,
    /// Sent at or before the group's creation time
    PredatesGroup,
    /// The epoch's state was pruned or never reached
    EpochUnavailable(u64),
    Undecryptable(String),
}

pub struct AccountSession {
    ctx: SyncContext,
    state: SessionState,
}

impl AccountSession {
    /// Session without any remote interaction; see [`AccountSession::open`]
    pub fn new(ctx: SyncContext) -> Self {
        Self { ctx, state: SessionState::default() }
    }

    /// Bootstrap a session
    ///
    /// Loads the account's credential from the directory, then rotates it if it is missing
    /// or about to expire. Rotation drains the inbox with the loaded credential first, so
    /// invites sealed to it are applied before it is replaced.
    ///
    /// # Errors
    ///
    /// Invalid configuration, transport failures, or a failed rotation.
    pub async fn open(ctx: SyncContext) -> SyncResult<Self> {
        ctx.config.validate().map_err(|e| SyncError::InvalidInput(e.to_string()))?;

        info!(account = %ctx.account, platform = %ctx.platform, "Opening session");

        let mut session = Self::new(ctx);
        session.state.credential =
            session.ctx.keys.get(&session.ctx.platform, &session.ctx.account).await?;
        session.rotate_credential(false).await?;

        // picks up what arrived during rotation, or everything when the credential is new
        let report = session.drain().await;
        debug!(?report, "Session opened");
        Ok(session)
    }

    pub fn account(&self) -> &AccountId {
        &self.ctx.account
    }

    pub fn platform(&self) -> &str {
        &self.ctx.platform
    }

    pub fn credential(&self) -> Option<&CredentialRecord> {
        self.state.credential.as_ref()
    }

    pub fn pending_outbound(&self) -> usize {
        self.state.queue.len()
    }

    fn reconciler(&mut self) -> Reconciler<'_> {
        Reconciler::new(&self.ctx, &mut self.state)
    }

    /// Passive reconciliation against the platform roster
    ///
    /// # Returns
    ///
    /// `true` if the group is (now) cryptographically protected, `false` if it cannot be
    /// protected yet because some roster member has no usable key-package.
    pub async fn reconcile(&mut self, group_id: &GroupId, roster: &[AccountId]) -> SyncResult<bool> {
        self.reconciler().reconcile(group_id, roster).await
    }

    /// Two-party reconciliation for a direct dialog with `peer`
    pub async fn reconcile_dialog(&mut self, peer: &AccountId, group_id: &GroupId) -> SyncResult<bool> {
        let roster = [self.ctx.account.clone(), peer.clone()];
        self.reconcile(group_id, &roster).await
    }

    /// Explicitly create a group; every roster member must be eligible
    pub async fn create(&mut self, group_id: &GroupId, roster: &[AccountId]) -> SyncResult<()> {
        self.reconciler().create(group_id, roster).await
    }

    pub async fn add_members(&mut self, group_id: &GroupId, accounts: &[AccountId]) -> SyncResult<()> {
        self.reconciler().add_members(group_id, accounts).await
    }

    pub async fn remove_members(&mut self, group_id: &GroupId, accounts: &[AccountId]) -> SyncResult<()> {
        self.reconciler().remove_members(group_id, accounts).await
    }

    /// Rotate the credential if it expires within the configured lookahead, or if `force`
    ///
    /// # Returns
    ///
    /// `true` if a new credential was registered.
    pub async fn rotate_credential(&mut self, force: bool) -> SyncResult<bool> {
        CredentialManager::new(&self.ctx, &mut self.state).rotate(force).await
    }

    /// Apply everything waiting in the inbox. Never fails.
    pub async fn drain(&mut self) -> DrainReport {
        InboundProcessor::new(&self.ctx, &mut self.state).drain().await
    }

    /// Encrypt under the group's latest epoch
    ///
    /// The inbox is drained first so pending commits are applied before choosing the epoch.
    pub async fn encrypt(&mut self, group_id: &GroupId, plaintext: &[u8]) -> SyncResult<EncryptOutcome> {
        self.drain().await;

        let Some(mut group) = self.group_state(group_id).await? else {
            return Ok(EncryptOutcome::Unprotected(plaintext.to_vec()));
        };
        let credential = self.state.credential(&self.ctx.account)?;
        let epoch = group.latest_epoch;
        let blob = group.latest_blob().ok_or_else(|| SyncError::StateInconsistency {
            group_id: group_id.to_string(),
            reason: format!("latest epoch {} has no state", epoch),
        })?;

        let (advanced, ciphertext) = self.ctx.protocol.encrypt(blob, plaintext, credential)?;
        group.epoch_state.insert(epoch, advanced);
        self.ctx.store.put(&self.ctx.platform, &self.ctx.account, &mut group).await?;

        Ok(EncryptOutcome::Encrypted(ciphertext))
    }

    /// Decrypt a group message sent at `sent_at_ms`
    ///
    /// Missing state, pruned epochs and undecryptable payloads are reported as
    /// [`DecryptOutcome::NotDecrypted`]; only transport failures are errors.
    pub async fn decrypt(
        &mut self,
        group_id: &GroupId,
        ciphertext: &Ciphertext,
        sent_at_ms: u64,
    ) -> SyncResult<DecryptOutcome> {
        use NotDecryptedReason::*;

        self.drain().await;

        let Some(group) = self.group_state(group_id).await? else {
            return Ok(DecryptOutcome::NotDecrypted(NoGroupState));
        };
        if sent_at_ms <= group.creation_time {
            return Ok(DecryptOutcome::NotDecrypted(PredatesGroup));
        }

        let epoch = match self.ctx.protocol.ciphertext_epoch(ciphertext) {
            Ok(epoch) => epoch,
            Err(e) => return Ok(DecryptOutcome::NotDecrypted(Undecryptable(e.to_string()))),
        };
        let Some(blob) = group.blob_for(epoch) else {
            debug!(%group_id, epoch, "No state for message epoch");
            return Ok(DecryptOutcome::NotDecrypted(EpochUnavailable(epoch)));
        };

        Ok(match self.ctx.protocol.decrypt(blob, ciphertext) {
            Ok(plaintext) => DecryptOutcome::Decrypted(plaintext),
            Err(e) => DecryptOutcome::NotDecrypted(Undecryptable(e.to_string())),
        })
    }

    /// Drop retained epochs up to and including `upper_bound`
    pub async fn prune_epochs(&mut self, group_id: &GroupId, upper_bound: u64) -> SyncResult<GroupState> {
        self.ctx
            .store
            .delete_epochs(&self.ctx.platform, &self.ctx.account, group_id, upper_bound)
            .await
    }

    /// Current stored state of a group
    pub async fn group_state(&mut self, group_id: &GroupId) -> SyncResult<Option<GroupState>> {
        let state = self.ctx.store.get(&self.ctx.platform, &self.ctx.account, group_id).await?;
        if state.is_some() {
            self.state.known_groups.insert(group_id.clone());
        }
        Ok(state)
    }

    /// Groups with stored state for this account
    pub async fn list_groups(&self) -> SyncResult<Vec<GroupId>> {
        self.ctx.store.list_groups(&self.ctx.platform, &self.ctx.account).await
    }
}
