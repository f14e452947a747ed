//! Group Protocol Trait
//!
//! Contract of the external encrypted-group protocol engine. All state is passed in and
//! out as opaque [`EpochBlob`]s; the engine only ever reads back the epoch and the member
//! set through [`GroupProtocol::state_epoch`] and [`GroupProtocol::members`].

use crate::core_sync::errors::ProtocolResult;
use crate::core_sync::types::{AccountId, CredentialRecord, EpochBlob, GroupId, PublicKeyPackage};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// Payload that lets an invitee derive the group's current epoch
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvitePayload(#[serde(with = "hex::serde")] pub Vec<u8>);

/// Payload that moves existing members from epoch N to N+1
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitPayload(#[serde(with = "hex::serde")] pub Vec<u8>);

/// Application message encrypted under one epoch
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ciphertext(#[serde(with = "hex::serde")] pub Vec<u8>);

/// One membership-change operation inside a commit
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Proposal {
    Add(PublicKeyPackage),
    Remove(AccountId),
    /// Replace the committer's own leaf with the credential passed to `commit`
    Update,
}

/// Result of creating a group
#[derive(Clone, Debug)]
pub struct CreatedGroup {
    /// State at epoch 1
    pub state: EpochBlob,
    pub invite: InvitePayload,
}

/// Result of a commit
#[derive(Clone, Debug)]
pub struct CommitOutput {
    pub state: EpochBlob,
    pub commit: CommitPayload,
    /// Present iff at least one `Proposal::Add` was included
    pub invite: Option<InvitePayload>,
}

/// Encrypted-group protocol engine
///
/// Implementations are pure state transformers: every call takes the state it needs and
/// returns the successor state, so the engine can keep older epochs around for backlog
/// decryption and roll back onto them.
pub trait GroupProtocol: Send + Sync {
    /// Generate a fresh credential for `identity` valid for `lifetime` from `now_ms`
    fn generate_credential(
        &self,
        identity: &AccountId,
        now_ms: u64,
        lifetime: Duration,
    ) -> ProtocolResult<CredentialRecord>;

    /// Identity a key-package was issued for
    fn credential_identity(&self, key_package: &PublicKeyPackage) -> ProtocolResult<AccountId>;

    /// Verify signature and lifetime; valid only if it does not expire within `lookahead`
    fn is_credential_valid(
        &self,
        key_package: &PublicKeyPackage,
        now_ms: u64,
        lookahead: Duration,
    ) -> bool;

    fn create_group(
        &self,
        group_id: &GroupId,
        invitees: &[PublicKeyPackage],
        own: &CredentialRecord,
    ) -> ProtocolResult<CreatedGroup>;

    fn commit(
        &self,
        state: &EpochBlob,
        proposals: &[Proposal],
        own: &CredentialRecord,
    ) -> ProtocolResult<CommitOutput>;

    fn encrypt(
        &self,
        state: &EpochBlob,
        plaintext: &[u8],
        own: &CredentialRecord,
    ) -> ProtocolResult<(EpochBlob, Ciphertext)>;

    /// Decrypt with the state of the epoch the ciphertext was produced in
    fn decrypt(&self, state: &EpochBlob, ciphertext: &Ciphertext) -> ProtocolResult<Vec<u8>>;

    /// Apply a commit made on top of `state`; the result is at `state_epoch + 1`
    fn apply_commit(&self, state: &EpochBlob, commit: &CommitPayload) -> ProtocolResult<EpochBlob>;

    fn join_from_invite(
        &self,
        invite: &InvitePayload,
        own: &CredentialRecord,
    ) -> ProtocolResult<EpochBlob>;

    /// Epoch embedded in a state blob
    fn state_epoch(&self, state: &EpochBlob) -> ProtocolResult<u64>;

    /// Membership as seen by the protocol in this state
    fn members(&self, state: &EpochBlob) -> ProtocolResult<BTreeSet<AccountId>>;

    /// Epoch a commit was made on top of
    fn commit_epoch(&self, commit: &CommitPayload) -> ProtocolResult<u64>;

    /// Epoch a ciphertext was produced in
    fn ciphertext_epoch(&self, ciphertext: &Ciphertext) -> ProtocolResult<u64>;
}
