//! Test fixtures for sessions sharing one set of collaborators
//!
//! Every account opened on a [`TestNetwork`] talks to the same state backend, directory,
//! relay and clock, like clients of one real deployment.

use crate::config::SyncConfig;
use crate::core_sync::memory::{MemoryDirectory, MemoryRelay, MemoryStateBackend};
use crate::core_sync::{
    AccountId, AccountSession, Collaborators, GroupId, ManualClock, SealedGroupProtocol,
    StateCipher, SyncContext,
};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

pub const PLATFORM: &str = "test-platform";
pub const START_MS: u64 = 1_700_000_000_000;
pub const DAY: Duration = Duration::from_secs(24 * 3600);

pub struct TestNetwork {
    pub protocol: Arc<SealedGroupProtocol>,
    pub state: Arc<MemoryStateBackend>,
    pub directory: Arc<MemoryDirectory>,
    pub relay: Arc<MemoryRelay>,
    pub clock: Arc<ManualClock>,
    pub config: SyncConfig,
}

impl Default for TestNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl TestNetwork {
    pub fn new() -> Self {
        Self {
            protocol: Arc::new(SealedGroupProtocol::new()),
            state: Arc::new(MemoryStateBackend::new()),
            directory: Arc::new(MemoryDirectory::new()),
            relay: Arc::new(MemoryRelay::new()),
            clock: Arc::new(ManualClock::new(START_MS)),
            config: SyncConfig::default(),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            protocol: self.protocol.clone(),
            state: self.state.clone(),
            directory: self.directory.clone(),
            relay: self.relay.clone(),
            clock: self.clock.clone(),
        }
    }

    /// Stable per-account at-rest key
    pub fn cipher_for(name: &str) -> StateCipher {
        StateCipher::from_key(Sha256::digest(name.as_bytes()).into())
    }

    pub fn context(&self, name: &str) -> SyncContext {
        SyncContext::new(
            PLATFORM,
            AccountId::from(name),
            Self::cipher_for(name),
            self.collaborators(),
            self.config.clone(),
        )
    }

    /// Open a session, registering a credential on first use
    pub async fn open(&self, name: &str) -> AccountSession {
        AccountSession::open(self.context(name))
            .await
            .unwrap_or_else(|e| panic!("Failed to open session for {}: {}", name, e))
    }

    pub async fn open_all(&self, names: &[&str]) -> Vec<AccountSession> {
        let mut sessions = Vec::with_capacity(names.len());
        for name in names {
            sessions.push(self.open(name).await);
        }
        sessions
    }

    /// Move the shared clock forward by one second
    pub fn tick(&self) {
        self.clock.advance(Duration::from_secs(1));
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    pub fn now_ms(&self) -> u64 {
        use crate::core_sync::Clock;
        self.clock.now_ms()
    }

    pub async fn pending_for(&self, name: &str) -> usize {
        self.relay.pending_count(PLATFORM, &AccountId::from(name)).await
    }
}

pub fn roster(names: &[&str]) -> Vec<AccountId> {
    names.iter().map(|name| AccountId::from(*name)).collect()
}

pub fn group(name: &str) -> GroupId {
    GroupId::from(name)
}
