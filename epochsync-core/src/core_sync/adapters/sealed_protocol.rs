//! Sealed-roster group protocol
//!
//! A compact stand-in for a real group key agreement engine:
//! - Key-packages are self-signed Ed25519 bundles carrying an X25519 init key and a
//!   validity window (issued_at, expires_at) in milliseconds.
//! - Every epoch has a fresh random 32-byte secret. A commit seals the next secret to each
//!   remaining member's init key (ephemeral X25519 + HKDF-SHA256 + ChaCha20-Poly1305), so a
//!   removed member cannot follow the group past the commit that removed it.
//! - Commits are framed under a key derived from the base epoch secret and signed with the
//!   committer's current leaf key.
//! - Application messages use a per-epoch key derived with HKDF.
//!
//! State blobs are JSON and contain private keys; they must only be stored sealed.

use crate::core_sync::errors::{ProtocolError, ProtocolResult};
use crate::core_sync::traits::{
    Ciphertext, CommitOutput, CommitPayload, CreatedGroup, GroupProtocol, InvitePayload, Proposal,
};
use crate::core_sync::types::{
    AccountId, CredentialRecord, EpochBlob, GroupId, PrivateKeyMaterial, PublicKeyPackage,
};
use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hkdf::Hkdf;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::Sha256;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use x25519_dalek::{PublicKey as InitPublicKey, StaticSecret};
use zeroize::{Zeroize, Zeroizing};

/// HKDF salt for every key this protocol derives
const KDF_SALT: &[u8] = b"epochsync-sealed-protocol-v1";

const LABEL_COMMIT: &[u8] = b"commit";
const LABEL_APPLICATION: &[u8] = b"application";
const LABEL_SEAL: &[u8] = b"seal";

/// Signed content of a key-package
#[derive(Debug, Clone, Serialize, Deserialize)]
struct KeyPackageBody {
    identity: AccountId,
    #[serde(with = "hex::serde")]
    signing_key: Vec<u8>,
    #[serde(with = "hex::serde")]
    init_key: Vec<u8>,
    issued_at: u64,
    expires_at: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct SignedKeyPackage {
    body: KeyPackageBody,
    #[serde(with = "hex::serde")]
    signature: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct PrivateKeys {
    #[serde(with = "hex::serde")]
    signing_seed: Vec<u8>,
    #[serde(with = "hex::serde")]
    init_secret: Vec<u8>,
}

impl Drop for PrivateKeys {
    fn drop(&mut self) {
        self.signing_seed.zeroize();
        self.init_secret.zeroize();
    }
}

/// Public keys of one roster entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct MemberKeys {
    #[serde(with = "hex::serde")]
    signing_key: Vec<u8>,
    #[serde(with = "hex::serde")]
    init_key: Vec<u8>,
}

impl From<&KeyPackageBody> for MemberKeys {
    fn from(body: &KeyPackageBody) -> Self {
        Self { signing_key: body.signing_key.clone(), init_key: body.init_key.clone() }
    }
}

type Roster = BTreeMap<AccountId, MemberKeys>;

/// Content of an [`EpochBlob`]
#[derive(Serialize, Deserialize)]
struct SealedState {
    group_id: GroupId,
    epoch: u64,
    own: AccountId,
    #[serde(with = "hex::serde")]
    signing_seed: Vec<u8>,
    #[serde(with = "hex::serde")]
    init_secret: Vec<u8>,
    #[serde(with = "hex::serde")]
    epoch_secret: Vec<u8>,
    roster: Roster,
    /// Messages sent by this member in this epoch
    generation: u64,
}

impl Drop for SealedState {
    fn drop(&mut self) {
        self.signing_seed.zeroize();
        self.init_secret.zeroize();
        self.epoch_secret.zeroize();
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SealedSecret {
    #[serde(with = "hex::serde")]
    ephemeral: Vec<u8>,
    #[serde(with = "hex::serde")]
    ciphertext: Vec<u8>,
}

/// Encrypted part of a commit
#[derive(Serialize, Deserialize)]
struct CommitBody {
    roster: Roster,
    sealed_secrets: BTreeMap<AccountId, SealedSecret>,
}

#[derive(Serialize, Deserialize)]
struct CommitHeader {
    group_id: GroupId,
    /// Base epoch
    epoch: u64,
    sender: AccountId,
    #[serde(with = "hex::serde")]
    nonce: Vec<u8>,
    #[serde(with = "hex::serde")]
    ciphertext: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct FramedCommit {
    header: CommitHeader,
    #[serde(with = "hex::serde")]
    signature: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct InviteBody {
    group_id: GroupId,
    epoch: u64,
    sender: AccountId,
    roster: Roster,
    sealed_secrets: BTreeMap<AccountId, SealedSecret>,
}

#[derive(Serialize, Deserialize)]
struct SignedInvite {
    body: InviteBody,
    #[serde(with = "hex::serde")]
    signature: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct FramedCiphertext {
    group_id: GroupId,
    epoch: u64,
    sender: AccountId,
    generation: u64,
    #[serde(with = "hex::serde")]
    nonce: Vec<u8>,
    #[serde(with = "hex::serde")]
    ciphertext: Vec<u8>,
}

#[derive(Deserialize)]
struct EpochProbe {
    epoch: u64,
}

#[derive(Deserialize)]
struct CommitProbe {
    header: EpochProbe,
}

/// In-process implementation of [`GroupProtocol`]
#[derive(Debug, Default, Clone, Copy)]
pub struct SealedGroupProtocol;

impl SealedGroupProtocol {
    pub fn new() -> Self {
        Self
    }
}

fn decode<T: DeserializeOwned>(bytes: &[u8], what: &str) -> ProtocolResult<T> {
    serde_json::from_slice(bytes).map_err(|e| ProtocolError::Malformed(format!("{}: {}", what, e)))
}

fn encode<T: Serialize>(value: &T) -> ProtocolResult<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

fn array32(bytes: &[u8], what: &str) -> ProtocolResult<[u8; 32]> {
    <[u8; 32]>::try_from(bytes)
        .map_err(|_| ProtocolError::Malformed(format!("{} must be 32 bytes, got {}", what, bytes.len())))
}

fn hkdf32(ikm: &[u8], info: &[&[u8]]) -> ProtocolResult<Zeroizing<[u8; 32]>> {
    let hkdf = Hkdf::<Sha256>::new(Some(KDF_SALT), ikm);
    let mut okm = Zeroizing::new([0u8; 32]);
    hkdf.expand_multi_info(info, &mut okm[..])
        .map_err(|e| ProtocolError::Crypto(format!("HKDF expand failed: {}", e)))?;
    Ok(okm)
}

fn sign(seed: &[u8], message: &[u8]) -> ProtocolResult<Vec<u8>> {
    let key = SigningKey::from_bytes(&array32(seed, "signing seed")?);
    Ok(key.sign(message).to_bytes().to_vec())
}

fn verify(public: &[u8], message: &[u8], signature: &[u8]) -> ProtocolResult<()> {
    let key = VerifyingKey::from_bytes(&array32(public, "signing key")?)
        .map_err(|e| ProtocolError::VerifyFailed(format!("Bad signing key: {}", e)))?;
    let signature = Signature::from_slice(signature)
        .map_err(|e| ProtocolError::VerifyFailed(format!("Bad signature encoding: {}", e)))?;
    key.verify(message, &signature)
        .map_err(|_| ProtocolError::VerifyFailed("Signature mismatch".to_string()))
}

fn aead_seal(key: &[u8; 32], aad: &[u8], plaintext: &[u8]) -> ProtocolResult<(Vec<u8>, Vec<u8>)> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, Payload { msg: plaintext, aad })
        .map_err(|e| ProtocolError::Crypto(format!("Encryption failed: {}", e)))?;
    Ok((nonce.to_vec(), ciphertext))
}

fn aead_open(key: &[u8; 32], nonce: &[u8], aad: &[u8], ciphertext: &[u8]) -> ProtocolResult<Vec<u8>> {
    if nonce.len() != 12 {
        return Err(ProtocolError::Malformed(format!("Invalid nonce size: {}", nonce.len())));
    }
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .map_err(|_| ProtocolError::Crypto("Decryption failed".to_string()))
}

/// Binds a sealed epoch secret to its group, epoch and recipient
fn seal_context(group_id: &GroupId, epoch: u64, recipient: &AccountId) -> Vec<u8> {
    format!("{}\0{}\0{}", group_id, epoch, recipient).into_bytes()
}

fn seal_to(init_key: &[u8], secret: &[u8], context: &[u8]) -> ProtocolResult<SealedSecret> {
    let recipient = InitPublicKey::from(array32(init_key, "init key")?);
    let ephemeral = StaticSecret::from(rand::random::<[u8; 32]>());
    let ephemeral_public = InitPublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(&recipient);

    let key = hkdf32(
        shared.as_bytes(),
        &[LABEL_SEAL, ephemeral_public.as_bytes(), recipient.as_bytes(), context],
    )?;
    // Key is unique per ephemeral, so a fixed nonce is sound
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key[..]));
    let ciphertext = cipher
        .encrypt(&Nonce::default(), Payload { msg: secret, aad: context })
        .map_err(|e| ProtocolError::Crypto(format!("Sealing failed: {}", e)))?;

    Ok(SealedSecret { ephemeral: ephemeral_public.as_bytes().to_vec(), ciphertext })
}

fn open_sealed(
    init_secret: &[u8],
    sealed: &SealedSecret,
    context: &[u8],
) -> ProtocolResult<Zeroizing<Vec<u8>>> {
    let own = StaticSecret::from(array32(init_secret, "init secret")?);
    let own_public = InitPublicKey::from(&own);
    let ephemeral = InitPublicKey::from(array32(&sealed.ephemeral, "ephemeral key")?);
    let shared = own.diffie_hellman(&ephemeral);

    let key = hkdf32(
        shared.as_bytes(),
        &[LABEL_SEAL, ephemeral.as_bytes(), own_public.as_bytes(), context],
    )?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key[..]));
    cipher
        .decrypt(&Nonce::default(), Payload { msg: &sealed.ciphertext, aad: context })
        .map(Zeroizing::new)
        .map_err(|_| ProtocolError::Crypto("Sealed secret is not addressed to this key".to_string()))
}

fn parse_key_package(key_package: &PublicKeyPackage) -> ProtocolResult<KeyPackageBody> {
    let signed: SignedKeyPackage = decode(key_package.as_bytes(), "key-package")?;
    verify(&signed.body.signing_key, &encode(&signed.body)?, &signed.signature)?;
    Ok(signed.body)
}

/// Private keys of a credential, checked against its public half
fn own_keys(own: &CredentialRecord) -> ProtocolResult<(KeyPackageBody, PrivateKeys)> {
    let body = parse_key_package(&own.public)?;
    let private: PrivateKeys = decode(&own.private.0, "private key material")?;

    let signing = SigningKey::from_bytes(&array32(&private.signing_seed, "signing seed")?);
    let init = StaticSecret::from(array32(&private.init_secret, "init secret")?);
    if signing.verifying_key().as_bytes()[..] != body.signing_key[..]
        || InitPublicKey::from(&init).as_bytes()[..] != body.init_key[..]
    {
        return Err(ProtocolError::Crypto("Private keys do not match key-package".to_string()));
    }
    Ok((body, private))
}

fn decode_state(blob: &EpochBlob) -> ProtocolResult<SealedState> {
    decode(blob.as_bytes(), "state")
}

fn encode_state(state: &SealedState) -> ProtocolResult<EpochBlob> {
    Ok(EpochBlob(encode(state)?))
}

fn commit_key(state: &SealedState) -> ProtocolResult<Zeroizing<[u8; 32]>> {
    hkdf32(
        &state.epoch_secret,
        &[LABEL_COMMIT, state.group_id.as_str().as_bytes(), &state.epoch.to_be_bytes()],
    )
}

fn application_key(state: &SealedState) -> ProtocolResult<Zeroizing<[u8; 32]>> {
    hkdf32(
        &state.epoch_secret,
        &[LABEL_APPLICATION, state.group_id.as_str().as_bytes(), &state.epoch.to_be_bytes()],
    )
}

fn commit_aad(group_id: &GroupId, epoch: u64, sender: &AccountId) -> Vec<u8> {
    format!("commit\0{}\0{}\0{}", group_id, epoch, sender).into_bytes()
}

fn application_aad(group_id: &GroupId, epoch: u64, sender: &AccountId, generation: u64) -> Vec<u8> {
    format!("application\0{}\0{}\0{}\0{}", group_id, epoch, sender, generation).into_bytes()
}

/// Invite for `recipients` into the epoch held by `state`, signed by its owner
fn build_invite(state: &SealedState, recipients: &[AccountId]) -> ProtocolResult<InvitePayload> {
    let mut sealed_secrets = BTreeMap::new();
    for recipient in recipients {
        let keys = state
            .roster
            .get(recipient)
            .ok_or_else(|| ProtocolError::InvalidProposal(format!("{} is not in the roster", recipient)))?;
        let context = seal_context(&state.group_id, state.epoch, recipient);
        sealed_secrets.insert(recipient.clone(), seal_to(&keys.init_key, &state.epoch_secret, &context)?);
    }

    let body = InviteBody {
        group_id: state.group_id.clone(),
        epoch: state.epoch,
        sender: state.own.clone(),
        roster: state.roster.clone(),
        sealed_secrets,
    };
    let signature = sign(&state.signing_seed, &encode(&body)?)?;
    Ok(InvitePayload(encode(&SignedInvite { body, signature })?))
}

impl GroupProtocol for SealedGroupProtocol {
    fn generate_credential(
        &self,
        identity: &AccountId,
        now_ms: u64,
        lifetime: Duration,
    ) -> ProtocolResult<CredentialRecord> {
        let private = PrivateKeys {
            signing_seed: rand::random::<[u8; 32]>().to_vec(),
            init_secret: rand::random::<[u8; 32]>().to_vec(),
        };
        let signing = SigningKey::from_bytes(&array32(&private.signing_seed, "signing seed")?);
        let init = StaticSecret::from(array32(&private.init_secret, "init secret")?);

        let body = KeyPackageBody {
            identity: identity.clone(),
            signing_key: signing.verifying_key().to_bytes().to_vec(),
            init_key: InitPublicKey::from(&init).as_bytes().to_vec(),
            issued_at: now_ms,
            expires_at: now_ms.saturating_add(lifetime.as_millis() as u64),
        };
        let signature = signing.sign(&encode(&body)?).to_bytes().to_vec();

        Ok(CredentialRecord {
            public: PublicKeyPackage(encode(&SignedKeyPackage { body, signature })?),
            private: PrivateKeyMaterial(encode(&private)?),
        })
    }

    fn credential_identity(&self, key_package: &PublicKeyPackage) -> ProtocolResult<AccountId> {
        Ok(parse_key_package(key_package)?.identity)
    }

    fn is_credential_valid(
        &self,
        key_package: &PublicKeyPackage,
        now_ms: u64,
        lookahead: Duration,
    ) -> bool {
        match parse_key_package(key_package) {
            Ok(body) => {
                body.issued_at <= now_ms
                    && now_ms.saturating_add(lookahead.as_millis() as u64) < body.expires_at
            }
            Err(_) => false,
        }
    }

    fn create_group(
        &self,
        group_id: &GroupId,
        invitees: &[PublicKeyPackage],
        own: &CredentialRecord,
    ) -> ProtocolResult<CreatedGroup> {
        let (own_body, own_private) = own_keys(own)?;

        let mut roster = Roster::new();
        roster.insert(own_body.identity.clone(), MemberKeys::from(&own_body));

        let mut recipients = Vec::with_capacity(invitees.len());
        for key_package in invitees {
            let body = parse_key_package(key_package)?;
            if roster.contains_key(&body.identity) {
                return Err(ProtocolError::InvalidProposal(format!(
                    "{} invited twice",
                    body.identity
                )));
            }
            roster.insert(body.identity.clone(), MemberKeys::from(&body));
            recipients.push(body.identity);
        }

        let state = SealedState {
            group_id: group_id.clone(),
            epoch: 1,
            own: own_body.identity.clone(),
            signing_seed: own_private.signing_seed.clone(),
            init_secret: own_private.init_secret.clone(),
            epoch_secret: rand::random::<[u8; 32]>().to_vec(),
            roster,
            generation: 0,
        };

        let invite = build_invite(&state, &recipients)?;
        Ok(CreatedGroup { state: encode_state(&state)?, invite })
    }

    fn commit(
        &self,
        state: &EpochBlob,
        proposals: &[Proposal],
        own: &CredentialRecord,
    ) -> ProtocolResult<CommitOutput> {
        let base = decode_state(state)?;
        if proposals.is_empty() {
            return Err(ProtocolError::InvalidProposal("Empty commit".to_string()));
        }

        let mut roster = base.roster.clone();
        let mut added = Vec::new();
        let mut next_private: Option<PrivateKeys> = None;

        for proposal in proposals {
            match proposal {
                Proposal::Add(key_package) => {
                    let body = parse_key_package(key_package)?;
                    if roster.contains_key(&body.identity) {
                        return Err(ProtocolError::InvalidProposal(format!(
                            "{} is already a member",
                            body.identity
                        )));
                    }
                    roster.insert(body.identity.clone(), MemberKeys::from(&body));
                    added.push(body.identity);
                }
                Proposal::Remove(member) => {
                    if *member == base.own {
                        return Err(ProtocolError::InvalidProposal(
                            "A member cannot remove itself".to_string(),
                        ));
                    }
                    if roster.remove(member).is_none() {
                        return Err(ProtocolError::InvalidProposal(format!(
                            "{} is not a member",
                            member
                        )));
                    }
                }
                Proposal::Update => {
                    let (body, private) = own_keys(own)?;
                    if body.identity != base.own {
                        return Err(ProtocolError::InvalidProposal(
                            "Update credential belongs to another identity".to_string(),
                        ));
                    }
                    roster.insert(base.own.clone(), MemberKeys::from(&body));
                    next_private = Some(private);
                }
            }
        }

        let next_epoch = base.epoch + 1;
        let next_secret = Zeroizing::new(rand::random::<[u8; 32]>().to_vec());

        let mut sealed_secrets = BTreeMap::new();
        for (member, keys) in roster.iter().filter(|(member, _)| **member != base.own) {
            let context = seal_context(&base.group_id, next_epoch, member);
            sealed_secrets.insert(member.clone(), seal_to(&keys.init_key, &next_secret, &context)?);
        }

        let body = Zeroizing::new(encode(&CommitBody { roster: roster.clone(), sealed_secrets })?);
        let aad = commit_aad(&base.group_id, base.epoch, &base.own);
        let (nonce, ciphertext) = aead_seal(&*commit_key(&base)?, &aad, &body)?;

        let header = CommitHeader {
            group_id: base.group_id.clone(),
            epoch: base.epoch,
            sender: base.own.clone(),
            nonce,
            ciphertext,
        };
        // Signed with the leaf key the other members currently know
        let signature = sign(&base.signing_seed, &encode(&header)?)?;
        let commit = CommitPayload(encode(&FramedCommit { header, signature })?);

        let (signing_seed, init_secret) = match &next_private {
            Some(private) => (private.signing_seed.clone(), private.init_secret.clone()),
            None => (base.signing_seed.clone(), base.init_secret.clone()),
        };
        let next = SealedState {
            group_id: base.group_id.clone(),
            epoch: next_epoch,
            own: base.own.clone(),
            signing_seed,
            init_secret,
            epoch_secret: next_secret.to_vec(),
            roster,
            generation: 0,
        };

        let invite = if added.is_empty() { None } else { Some(build_invite(&next, &added)?) };

        Ok(CommitOutput { state: encode_state(&next)?, commit, invite })
    }

    fn encrypt(
        &self,
        state: &EpochBlob,
        plaintext: &[u8],
        own: &CredentialRecord,
    ) -> ProtocolResult<(EpochBlob, Ciphertext)> {
        let mut current = decode_state(state)?;
        if self.credential_identity(&own.public)? != current.own {
            return Err(ProtocolError::NotAMember(current.group_id.to_string()));
        }

        let aad = application_aad(&current.group_id, current.epoch, &current.own, current.generation);
        let (nonce, ciphertext) = aead_seal(&*application_key(&current)?, &aad, plaintext)?;
        let framed = FramedCiphertext {
            group_id: current.group_id.clone(),
            epoch: current.epoch,
            sender: current.own.clone(),
            generation: current.generation,
            nonce,
            ciphertext,
        };

        current.generation += 1;
        Ok((encode_state(&current)?, Ciphertext(encode(&framed)?)))
    }

    fn decrypt(&self, state: &EpochBlob, ciphertext: &Ciphertext) -> ProtocolResult<Vec<u8>> {
        let current = decode_state(state)?;
        let framed: FramedCiphertext = decode(&ciphertext.0, "ciphertext")?;

        if framed.group_id != current.group_id {
            return Err(ProtocolError::GroupMismatch {
                expected: current.group_id.to_string(),
                actual: framed.group_id.to_string(),
            });
        }
        if framed.epoch != current.epoch {
            return Err(ProtocolError::EpochMismatch { expected: current.epoch, actual: framed.epoch });
        }
        if !current.roster.contains_key(&framed.sender) {
            return Err(ProtocolError::UnknownSender(framed.sender.to_string()));
        }

        let aad = application_aad(&framed.group_id, framed.epoch, &framed.sender, framed.generation);
        aead_open(&*application_key(&current)?, &framed.nonce, &aad, &framed.ciphertext)
    }

    fn apply_commit(&self, state: &EpochBlob, commit: &CommitPayload) -> ProtocolResult<EpochBlob> {
        let base = decode_state(state)?;
        let framed: FramedCommit = decode(&commit.0, "commit")?;
        let header = &framed.header;

        if header.group_id != base.group_id {
            return Err(ProtocolError::GroupMismatch {
                expected: base.group_id.to_string(),
                actual: header.group_id.to_string(),
            });
        }
        if header.epoch != base.epoch {
            return Err(ProtocolError::EpochMismatch { expected: base.epoch, actual: header.epoch });
        }
        let sender = base
            .roster
            .get(&header.sender)
            .ok_or_else(|| ProtocolError::UnknownSender(header.sender.to_string()))?;
        verify(&sender.signing_key, &encode(header)?, &framed.signature)?;

        let aad = commit_aad(&header.group_id, header.epoch, &header.sender);
        let body = Zeroizing::new(aead_open(&*commit_key(&base)?, &header.nonce, &aad, &header.ciphertext)?);
        let body: CommitBody = decode(&body, "commit body")?;

        let next_epoch = base.epoch + 1;
        let sealed = body
            .sealed_secrets
            .get(&base.own)
            .ok_or_else(|| ProtocolError::NotAMember(base.group_id.to_string()))?;
        let next_secret = open_sealed(
            &base.init_secret,
            sealed,
            &seal_context(&base.group_id, next_epoch, &base.own),
        )?;

        let next = SealedState {
            group_id: base.group_id.clone(),
            epoch: next_epoch,
            own: base.own.clone(),
            signing_seed: base.signing_seed.clone(),
            init_secret: base.init_secret.clone(),
            epoch_secret: next_secret.to_vec(),
            roster: body.roster.clone(),
            generation: 0,
        };
        encode_state(&next)
    }

    fn join_from_invite(
        &self,
        invite: &InvitePayload,
        own: &CredentialRecord,
    ) -> ProtocolResult<EpochBlob> {
        let signed: SignedInvite = decode(&invite.0, "invite")?;
        let body = &signed.body;

        let sender = body
            .roster
            .get(&body.sender)
            .ok_or_else(|| ProtocolError::UnknownSender(body.sender.to_string()))?;
        verify(&sender.signing_key, &encode(body)?, &signed.signature)?;

        let (own_body, own_private) = own_keys(own)?;
        let entry = body
            .roster
            .get(&own_body.identity)
            .ok_or_else(|| ProtocolError::NotAMember(body.group_id.to_string()))?;
        if *entry != MemberKeys::from(&own_body) {
            return Err(ProtocolError::Crypto(
                "Invite was issued for a different key-package".to_string(),
            ));
        }
        let sealed = body
            .sealed_secrets
            .get(&own_body.identity)
            .ok_or_else(|| ProtocolError::NotAMember(body.group_id.to_string()))?;
        let epoch_secret = open_sealed(
            &own_private.init_secret,
            sealed,
            &seal_context(&body.group_id, body.epoch, &own_body.identity),
        )?;

        let state = SealedState {
            group_id: body.group_id.clone(),
            epoch: body.epoch,
            own: own_body.identity.clone(),
            signing_seed: own_private.signing_seed.clone(),
            init_secret: own_private.init_secret.clone(),
            epoch_secret: epoch_secret.to_vec(),
            roster: body.roster.clone(),
            generation: 0,
        };
        encode_state(&state)
    }

    fn state_epoch(&self, state: &EpochBlob) -> ProtocolResult<u64> {
        Ok(decode::<EpochProbe>(state.as_bytes(), "state")?.epoch)
    }

    fn members(&self, state: &EpochBlob) -> ProtocolResult<BTreeSet<AccountId>> {
        Ok(decode_state(state)?.roster.keys().cloned().collect())
    }

    fn commit_epoch(&self, commit: &CommitPayload) -> ProtocolResult<u64> {
        Ok(decode::<CommitProbe>(&commit.0, "commit")?.header.epoch)
    }

    fn ciphertext_epoch(&self, ciphertext: &Ciphertext) -> ProtocolResult<u64> {
        Ok(decode::<EpochProbe>(&ciphertext.0, "ciphertext")?.epoch)
    }
}
