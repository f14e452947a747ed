//! At-rest encryption of state documents
//!
//! Everything the engine hands to a remote store (group state, private credential
//! material) is sealed with AES-256-GCM under a key derived from the account's login
//! credentials. The associated data binds each document to its
//! (platform, account, group) slot so a store cannot swap documents between slots.
//!
//! Sealed layout: `nonce (12 bytes) || ciphertext || tag (16 bytes)`

use crate::config::KdfConfig;
use crate::core_sync::errors::{SyncError, SyncResult};
use crate::core_sync::types::{AccountId, GroupId};
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    Aes256Gcm, Key, Nonce,
};
use argon2::{Algorithm, Argon2, Params, Version};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt;
use zeroize::Zeroizing;

const KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;

/// Domain prefix for associated data
const AAD_DOMAIN: &[u8] = b"epochsync-state-v1";

/// Symmetric key for at-rest state
#[derive(Clone)]
pub struct StateCipher {
    key: Zeroizing<[u8; KEY_SIZE]>,
}

impl fmt::Debug for StateCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StateCipher(<redacted>)")
    }
}

impl StateCipher {
    /// Use a key handed over by the authentication layer
    pub fn from_key(key: [u8; KEY_SIZE]) -> Self {
        Self { key: Zeroizing::new(key) }
    }

    /// Derive the key from a login password with Argon2id
    ///
    /// `salt` is provided by the server alongside the account and must be at least 8 bytes.
    pub fn derive(password: &[u8], salt: &[u8], kdf: &KdfConfig) -> SyncResult<Self> {
        let params = Params::new(kdf.memory_kib, kdf.iterations, kdf.parallelism, Some(KEY_SIZE))
            .map_err(|e| SyncError::Cipher(format!("Invalid Argon2 params: {}", e)))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        argon2
            .hash_password_into(password, salt, &mut key[..])
            .map_err(|e| SyncError::Cipher(format!("Key derivation failed: {}", e)))?;

        Ok(Self { key })
    }

    fn aead(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key[..]))
    }

    pub fn seal(&self, plaintext: &[u8], aad: &[u8]) -> SyncResult<Vec<u8>> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .aead()
            .encrypt(&nonce, Payload { msg: plaintext, aad })
            .map_err(|e| SyncError::Cipher(format!("Encryption failed: {}", e)))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    pub fn open(&self, sealed: &[u8], aad: &[u8]) -> SyncResult<Vec<u8>> {
        if sealed.len() < NONCE_SIZE + TAG_SIZE {
            return Err(SyncError::Cipher(format!(
                "Sealed document too short: {} bytes",
                sealed.len()
            )));
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);

        self.aead()
            .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad })
            .map_err(|_| {
                SyncError::Cipher("Decryption failed (corrupted, wrong key or wrong slot)".to_string())
            })
    }

    pub fn seal_json<T: Serialize>(&self, value: &T, aad: &[u8]) -> SyncResult<Vec<u8>> {
        let plaintext = Zeroizing::new(serde_json::to_vec(value)?);
        self.seal(&plaintext, aad)
    }

    pub fn open_json<T: DeserializeOwned>(&self, sealed: &[u8], aad: &[u8]) -> SyncResult<T> {
        let plaintext = Zeroizing::new(self.open(sealed, aad)?);
        Ok(serde_json::from_slice(&plaintext)?)
    }
}

/// Associated data for a group state document
pub fn state_aad(platform: &str, account: &AccountId, group_id: &GroupId) -> Vec<u8> {
    slot_aad(&[b"group", platform.as_bytes(), account.as_str().as_bytes(), group_id.as_str().as_bytes()])
}

/// Associated data for an account's private credential material
pub fn credential_aad(platform: &str, account: &AccountId) -> Vec<u8> {
    slot_aad(&[b"credential", platform.as_bytes(), account.as_str().as_bytes()])
}

// Length-prefixed so ("ab", "c") and ("a", "bc") differ
fn slot_aad(parts: &[&[u8]]) -> Vec<u8> {
    let mut aad = AAD_DOMAIN.to_vec();
    for part in parts {
        aad.extend_from_slice(&(part.len() as u32).to_le_bytes());
        aad.extend_from_slice(part);
    }
    aad
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cheap_kdf() -> KdfConfig {
        KdfConfig { memory_kib: 64, iterations: 1, parallelism: 1 }
    }

    #[test]
    fn test_seal_open() {
        let cipher = StateCipher::from_key([7u8; 32]);
        let aad = state_aad("tg", &"alice".into(), &"chat-1".into());

        let sealed = cipher.seal(b"members: alice, bob", &aad).unwrap();
        assert_ne!(&sealed[NONCE_SIZE..], b"members: alice, bob");
        assert_eq!(cipher.open(&sealed, &aad).unwrap(), b"members: alice, bob");
    }

    #[test]
    fn test_open_rejects_other_slot() {
        let cipher = StateCipher::from_key([7u8; 32]);
        let sealed = cipher.seal(b"secret", &state_aad("tg", &"alice".into(), &"chat-1".into())).unwrap();

        let result = cipher.open(&sealed, &state_aad("tg", &"alice".into(), &"chat-2".into()));
        assert!(matches!(result, Err(SyncError::Cipher(_))));
    }

    #[test]
    fn test_open_rejects_wrong_key_and_truncation() {
        let aad = credential_aad("tg", &"alice".into());
        let sealed = StateCipher::from_key([1u8; 32]).seal(b"secret", &aad).unwrap();

        assert!(StateCipher::from_key([2u8; 32]).open(&sealed, &aad).is_err());
        assert!(StateCipher::from_key([1u8; 32]).open(&sealed[..10], &aad).is_err());
    }

    #[test]
    fn test_derived_key_is_deterministic() {
        let salt = b"server-salt-0001";
        let a = StateCipher::derive(b"hunter2", salt, &cheap_kdf()).unwrap();
        let b = StateCipher::derive(b"hunter2", salt, &cheap_kdf()).unwrap();
        let c = StateCipher::derive(b"hunter3", salt, &cheap_kdf()).unwrap();

        let sealed = a.seal(b"x", b"aad").unwrap();
        assert_eq!(b.open(&sealed, b"aad").unwrap(), b"x");
        assert!(c.open(&sealed, b"aad").is_err());
    }

    #[test]
    fn test_derive_rejects_short_salt() {
        assert!(StateCipher::derive(b"pw", b"short", &cheap_kdf()).is_err());
    }

    #[test]
    fn test_aad_is_length_prefixed() {
        assert_ne!(
            state_aad("tg", &"ab".into(), &"c".into()),
            state_aad("tg", &"a".into(), &"bc".into())
        );
    }
}
