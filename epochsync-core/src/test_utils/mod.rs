//! Test utilities and helpers for EpochSync
//!
//! A shared in-memory network of collaborators, session factories and assertions used by
//! the scenario tests.

pub mod fixtures;
pub mod assertions;

pub use fixtures::*;
pub use assertions::*;
