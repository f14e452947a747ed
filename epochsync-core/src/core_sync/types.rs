//! Domain types shared by every component of the engine

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Platform-specific account identifier (e.g. a messenger user id)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for AccountId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Opaque, stable identifier of a chat/group on its platform
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub String);

impl GroupId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GroupId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Serialized protocol state for one epoch. Opaque except for its embedded epoch.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EpochBlob(#[serde(with = "hex::serde")] pub Vec<u8>);

impl EpochBlob {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for EpochBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EpochBlob({} bytes)", self.0.len())
    }
}

/// Public, signed, time-bounded key bundle published for an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublicKeyPackage(#[serde(with = "hex::serde")] pub Vec<u8>);

impl PublicKeyPackage {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Private half of a credential. Never leaves the process unencrypted.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct PrivateKeyMaterial(#[serde(with = "hex::serde")] pub Vec<u8>);

impl fmt::Debug for PrivateKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKeyMaterial(<redacted>)")
    }
}

/// A key-package together with the private material held only by its owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub public: PublicKeyPackage,
    pub private: PrivateKeyMaterial,
}

/// Identity of one creation of a group; the total order decides which of two
/// concurrently created instances survives (smaller wins).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupOrigin {
    pub creation_time: u64,
    pub creator: AccountId,
}

/// The commit that produced a group's latest epoch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRef {
    pub epoch: u64,
    /// Hex SHA-256 of the commit payload
    pub digest: String,
    pub author: AccountId,
}

/// One participant's view of a group's cryptographic state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupState {
    pub group_id: GroupId,
    /// Membership according to the protocol engine, not the platform roster
    pub members: BTreeSet<AccountId>,
    /// Milliseconds since the Unix epoch
    pub creation_time: u64,
    pub creator: AccountId,
    pub epoch_state: BTreeMap<u64, EpochBlob>,
    pub latest_epoch: u64,
    pub head: Option<CommitRef>,
    pub update_counter: u64,
}

impl GroupState {
    /// State for a group first seen at `epoch` (creation or join)
    pub fn new(
        group_id: GroupId,
        origin: GroupOrigin,
        members: BTreeSet<AccountId>,
        epoch: u64,
        blob: EpochBlob,
    ) -> Self {
        Self {
            group_id,
            members,
            creation_time: origin.creation_time,
            creator: origin.creator,
            epoch_state: BTreeMap::from([(epoch, blob)]),
            latest_epoch: epoch,
            head: None,
            update_counter: 0,
        }
    }

    pub fn origin(&self) -> GroupOrigin {
        GroupOrigin { creation_time: self.creation_time, creator: self.creator.clone() }
    }

    pub fn latest_blob(&self) -> Option<&EpochBlob> {
        self.epoch_state.get(&self.latest_epoch)
    }

    pub fn blob_for(&self, epoch: u64) -> Option<&EpochBlob> {
        self.epoch_state.get(&epoch)
    }

    /// Install `blob` as the newest epoch. Older entries are kept for backlog decryption.
    pub fn advance(&mut self, epoch: u64, blob: EpochBlob, head: Option<CommitRef>) {
        self.epoch_state.insert(epoch, blob);
        self.latest_epoch = epoch;
        self.head = head;
    }

    /// Carry over the epochs of an earlier view of the same instance that precede this
    /// state's first epoch, and its head when both end on the same epoch
    pub fn keep_history_of(&mut self, earlier: &GroupState) {
        let first = self.epoch_state.keys().next().copied().unwrap_or(self.latest_epoch);
        for (epoch, blob) in earlier.epoch_state.range(..first) {
            self.epoch_state.entry(*epoch).or_insert_with(|| blob.clone());
        }
        if self.head.is_none() && earlier.latest_epoch == self.latest_epoch {
            self.head = earlier.head.clone();
        }
    }

    /// Every member except `account`
    pub fn others<'a>(&'a self, account: &'a AccountId) -> impl Iterator<Item = &'a AccountId> + 'a {
        self.members.iter().filter(move |member| *member != account)
    }
}
