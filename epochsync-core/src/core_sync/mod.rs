//! Group state synchronization for EpochSync
//!
//! Keeps the cryptographic group state of an account consistent with a membership roster
//! owned by an external platform:
//! - Roster reconciliation (create, add, remove) driven by a pluggable group protocol
//! - Ordered inbound processing of JOIN and COMMIT messages
//! - Epoch-indexed, encrypted-at-rest state persistence with retention pruning
//! - Credential (key-package) lifecycle with proactive rotation
//!
//! # Architecture
//!
//! ## Core Components
//!
//! - `AccountSession`: per-account facade, one operation at a time
//! - `Reconciler`: roster diff and commit rounds
//! - `InboundProcessor`: inbox drain, instance tie-break and commit fork choice
//! - `CredentialManager`: rotation cascade
//! - `EpochStateStore` / `KeyServer`: sealed persistence over the backend traits
//! - `OutboundQueue`: transactional send buffer
//!
//! ## Invariants
//!
//! - Epoch monotonicity: a persisted state never moves to a smaller latest epoch
//! - Single instance: concurrent creations of one group resolve to the smallest origin
//! - Persist before send: messages of a failed round never leave the queue

pub mod types;
pub mod errors;
pub mod clock;
pub mod cipher;
pub mod messages;

// Collaborator boundaries
pub mod traits;

// In-memory collaborators and the default protocol adapter
pub mod memory;
pub mod adapters;

pub mod epoch_store;
pub mod keyserver;
pub mod outbound;
pub mod inbound;
pub mod reconciler;
pub mod credentials;
pub mod session;

pub use adapters::SealedGroupProtocol;
pub use cipher::StateCipher;
pub use clock::{Clock, ManualClock, SystemClock};
pub use errors::{ProtocolError, SyncError, SyncResult};
pub use inbound::DrainReport;
pub use session::{
    AccountSession, Collaborators, DecryptOutcome, EncryptOutcome, NotDecryptedReason, SyncContext,
};
pub use types::{AccountId, CredentialRecord, GroupId, GroupState};

#[cfg(test)]
#[path = "tests/group_lifecycle_tests.rs"]
mod group_lifecycle_tests;
#[cfg(test)]
#[path = "tests/concurrency_tests.rs"]
mod concurrency_tests;
#[cfg(test)]
#[path = "tests/rotation_tests.rs"]
mod rotation_tests;
#[cfg(test)]
#[path = "tests/failure_tests.rs"]
mod failure_tests;
