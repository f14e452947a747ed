//! Credential Directory Trait

use crate::core_sync::errors::SyncResult;
use crate::core_sync::types::{AccountId, PublicKeyPackage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Credential as held by the directory: public key-package plus sealed private part
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredential {
    pub public: PublicKeyPackage,
    #[serde(with = "hex::serde")]
    pub sealed_private: Vec<u8>,
}

/// Remote directory of account credentials
///
/// "No credential" is `Ok(None)`, never an error.
#[async_trait]
pub trait CredentialDirectory: Send + Sync {
    /// Full record for the owning account
    async fn fetch_record(
        &self,
        platform: &str,
        account: &AccountId,
    ) -> SyncResult<Option<StoredCredential>>;

    /// Public key-package of any account
    async fn fetch_public(
        &self,
        platform: &str,
        account: &AccountId,
    ) -> SyncResult<Option<PublicKeyPackage>>;

    /// Register a new record; `previous` is kept by the directory for revocation bookkeeping
    async fn register(
        &self,
        platform: &str,
        account: &AccountId,
        record: StoredCredential,
        previous: Option<PublicKeyPackage>,
    ) -> SyncResult<()>;
}
