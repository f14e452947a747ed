//! Group protocol adapters
//!
//! The engine talks to the encrypted-group protocol only through
//! [`GroupProtocol`](crate::core_sync::traits::GroupProtocol). This module carries an
//! in-process implementation so the engine can run end-to-end without an external engine.

pub mod sealed_protocol;

pub use sealed_protocol::SealedGroupProtocol;
