//! Collaborator boundaries
//!
//! The engine drives four external capabilities through these traits:
//! - Group protocol engine (state transitions, opaque blobs)
//! - Remote state store (sealed per-group documents)
//! - Credential directory (key-packages and sealed private material)
//! - Delivery relay (fetch-and-delete inbox, batch send)
//!
//! In-process implementations live in `core_sync::memory` and `core_sync::adapters`.

pub mod directory;
pub mod protocol;
pub mod relay;
pub mod storage;

pub use directory::{CredentialDirectory, StoredCredential};
pub use protocol::{
    Ciphertext, CommitOutput, CommitPayload, CreatedGroup, GroupProtocol, InvitePayload, Proposal,
};
pub use relay::Relay;
pub use storage::{StateBackend, StoredGroupRecord};
