//! Error types for the synchronization engine

use crate::core_sync::types::GroupId;
use thiserror::Error;

/// Result type for protocol adapter operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Result type for engine operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors raised by a group protocol engine
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Payload could not be decoded
    #[error("Malformed payload: {0}")]
    Malformed(String),

    /// Signature verification failed
    #[error("Verification failed: {0}")]
    VerifyFailed(String),

    /// Key-package is expired or not yet valid
    #[error("Credential expired: {0}")]
    CredentialExpired(String),

    /// Sender is not part of the group's roster
    #[error("Unknown sender: {0}")]
    UnknownSender(String),

    /// The local participant is not (or no longer) a member
    #[error("Not a member of group {0}")]
    NotAMember(String),

    /// Epoch mismatch (too old or too new)
    #[error("Epoch mismatch: expected {expected}, got {actual}")]
    EpochMismatch { expected: u64, actual: u64 },

    /// Payload targets a different group
    #[error("Group mismatch: expected {expected}, got {actual}")]
    GroupMismatch { expected: String, actual: String },

    /// Invalid proposal list
    #[error("Invalid proposal: {0}")]
    InvalidProposal(String),

    /// Cryptographic operation failed
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        ProtocolError::Serialization(e.to_string())
    }
}

/// Errors raised by the synchronization engine
#[derive(Debug, Error)]
pub enum SyncError {
    /// An epoch entry does not match the epoch encoded in its blob
    #[error("State inconsistency in group {group_id}: {reason}")]
    StateInconsistency { group_id: String, reason: String },

    /// Remote state store, credential directory or relay failed
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// At-rest encryption or decryption failed
    #[error("Cipher error: {0}")]
    Cipher(String),

    #[error("Group not found: {0}")]
    GroupNotFound(GroupId),

    #[error("Group already exists: {0}")]
    GroupExists(GroupId),

    /// The local account has no usable credential
    #[error("Missing credential for account {0}")]
    MissingCredential(String),

    /// A member required for an explicit operation has no usable key-package
    #[error("Member {0} has no valid key-package")]
    IneligibleMember(String),

    /// Credential rotation stopped at this group; earlier groups were committed
    #[error("Rotation failed in group {group_id}: {source}")]
    RotationFailed {
        group_id: GroupId,
        #[source]
        source: Box<SyncError>,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl SyncError {
    /// Whether retrying the whole operation on the next pass may succeed
    pub fn is_transport(&self) -> bool {
        match self {
            SyncError::Transport(_) => true,
            SyncError::RotationFailed { source, .. } => source.is_transport(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}
