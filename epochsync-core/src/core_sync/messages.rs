//! Protocol envelopes exchanged through the relay
//!
//! Wire format is a JSON object; the protocol message itself is hex-encoded and opaque.

use crate::core_sync::errors::{SyncError, SyncResult};
use crate::core_sync::traits::{CommitPayload, InvitePayload};
use crate::core_sync::types::{AccountId, GroupId, GroupOrigin, GroupState};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageKind {
    /// Invite into a group instance
    Join,
    /// Epoch transition for existing members
    Commit,
}

/// Payload of an outbound message
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub sender: AccountId,
    pub group_id: GroupId,
    pub kind: MessageKind,
    /// Origin of the group instance this message belongs to
    pub creation_time: u64,
    pub creator: AccountId,
    #[serde(with = "hex::serde")]
    pub protocol_message: Vec<u8>,
}

impl Envelope {
    pub fn join(sender: &AccountId, state: &GroupState, invite: &InvitePayload) -> Self {
        Self::for_state(sender, state, MessageKind::Join, invite.0.clone())
    }

    pub fn commit(sender: &AccountId, state: &GroupState, commit: &CommitPayload) -> Self {
        Self::for_state(sender, state, MessageKind::Commit, commit.0.clone())
    }

    fn for_state(
        sender: &AccountId,
        state: &GroupState,
        kind: MessageKind,
        protocol_message: Vec<u8>,
    ) -> Self {
        Self {
            sender: sender.clone(),
            group_id: state.group_id.clone(),
            kind,
            creation_time: state.creation_time,
            creator: state.creator.clone(),
            protocol_message,
        }
    }

    pub fn origin(&self) -> GroupOrigin {
        GroupOrigin { creation_time: self.creation_time, creator: self.creator.clone() }
    }

    pub fn to_wire(&self) -> SyncResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_wire(raw: &str) -> SyncResult<Self> {
        serde_json::from_str(raw)
            .map_err(|e| SyncError::Serialization(format!("Malformed envelope: {}", e)))
    }
}

/// A message queued for the relay
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub platform: String,
    pub recipient: AccountId,
    /// Serialized [`Envelope`]
    pub payload: String,
}

impl OutboundMessage {
    pub fn new(platform: &str, recipient: &AccountId, envelope: &Envelope) -> SyncResult<Self> {
        Ok(Self {
            platform: platform.to_string(),
            recipient: recipient.clone(),
            payload: envelope.to_wire()?,
        })
    }
}
