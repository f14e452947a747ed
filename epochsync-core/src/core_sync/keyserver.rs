//! Credential directory client
//!
//! Seals the private half of a credential before it reaches the directory and treats
//! "no key-package" as an ordinary outcome.

use crate::core_sync::cipher::{credential_aad, StateCipher};
use crate::core_sync::errors::SyncResult;
use crate::core_sync::traits::{CredentialDirectory, StoredCredential};
use crate::core_sync::types::{AccountId, CredentialRecord, PrivateKeyMaterial, PublicKeyPackage};
use std::sync::Arc;
use tracing::debug;

pub struct KeyServer {
    directory: Arc<dyn CredentialDirectory>,
    cipher: StateCipher,
}

impl KeyServer {
    pub fn new(directory: Arc<dyn CredentialDirectory>, cipher: StateCipher) -> Self {
        Self { directory, cipher }
    }

    /// Own credential record, with the private part unsealed
    pub async fn get(&self, platform: &str, account: &AccountId) -> SyncResult<Option<CredentialRecord>> {
        let Some(stored) = self.directory.fetch_record(platform, account).await? else {
            debug!(%account, "No credential registered");
            return Ok(None);
        };

        let private = self.cipher.open(&stored.sealed_private, &credential_aad(platform, account))?;
        Ok(Some(CredentialRecord { public: stored.public, private: PrivateKeyMaterial(private) }))
    }

    /// Another account's public key-package
    pub async fn get_public_keypackage(
        &self,
        platform: &str,
        account: &AccountId,
    ) -> SyncResult<Option<PublicKeyPackage>> {
        let key_package = self.directory.fetch_public(platform, account).await?;
        if key_package.is_none() {
            debug!(%account, "No key-package published");
        }
        Ok(key_package)
    }

    /// Register `record`, naming the key-package it supersedes
    pub async fn put(
        &self,
        platform: &str,
        account: &AccountId,
        record: &CredentialRecord,
        previous: Option<&PublicKeyPackage>,
    ) -> SyncResult<()> {
        let sealed_private = self.cipher.seal(&record.private.0, &credential_aad(platform, account))?;
        let stored = StoredCredential { public: record.public.clone(), sealed_private };
        self.directory.register(platform, account, stored, previous.cloned()).await
    }
}
