//! In-memory collaborators
//!
//! Process-local implementations of the remote store, credential directory and relay.
//! They can be shared between several sessions through `Arc` to simulate a deployment,
//! and expose one-shot failure injection for tests.

mod directory;
mod relay;
mod state;

pub use directory::MemoryDirectory;
pub use relay::MemoryRelay;
pub use state::MemoryStateBackend;
