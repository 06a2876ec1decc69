//! Per-user AES-256-GCM envelopes for recovery shards.
//!
//! Envelope format: `base64( nonce[12] ‖ tag[16] ‖ ciphertext )`.
//! The per-user key is `SHA-256( master_secret ‖ ":user:" ‖ user_id )`.
//!
//! Opening fails closed with a single, uniform error — a truncated
//! envelope, a base64 error, and a tag mismatch are indistinguishable to
//! the caller, so the decrypt path cannot be used as an oracle.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use keyshard_core::error::{CustodyError, CustodyResult};

use crate::{KEY_SIZE, NONCE_SIZE, TAG_SIZE};

/// Derive the envelope key for one user from the deployment master secret.
pub fn derive_user_key(master: &SecretString, user_id: &str) -> Zeroizing<[u8; KEY_SIZE]> {
    derive_key(master.expose_secret().as_bytes(), user_id)
}

fn derive_key(master: &[u8], user_id: &str) -> Zeroizing<[u8; KEY_SIZE]> {
    let mut hasher = Sha256::new();
    hasher.update(master);
    hasher.update(b":user:");
    hasher.update(user_id.as_bytes());
    let digest = hasher.finalize();

    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    key.copy_from_slice(&digest);
    key
}

/// Encrypt `plaintext` under `key` into the envelope format.
pub fn seal(key: &[u8; KEY_SIZE], plaintext: &[u8]) -> CustodyResult<String> {
    let cipher = Aes256Gcm::new(key.into());

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    // aes-gcm appends the tag to the ciphertext; the envelope carries it
    // up front, after the nonce.
    let sealed = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CustodyError::InvalidShardFormat("plaintext too large for envelope".into()))?;
    let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_SIZE);

    let mut envelope = Vec::with_capacity(NONCE_SIZE + TAG_SIZE + ciphertext.len());
    envelope.extend_from_slice(&nonce_bytes);
    envelope.extend_from_slice(tag);
    envelope.extend_from_slice(ciphertext);
    Ok(BASE64.encode(envelope))
}

/// Decrypt an envelope under `key`. Fails closed: every malformation maps
/// to the same `DecryptionFailure`.
pub fn open(key: &[u8; KEY_SIZE], envelope: &str) -> CustodyResult<Zeroizing<Vec<u8>>> {
    let raw = BASE64
        .decode(envelope.trim())
        .map_err(|_| CustodyError::DecryptionFailure)?;
    if raw.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CustodyError::DecryptionFailure);
    }

    let (nonce_bytes, rest) = raw.split_at(NONCE_SIZE);
    let (tag, ciphertext) = rest.split_at(TAG_SIZE);

    let mut sealed = Vec::with_capacity(ciphertext.len() + TAG_SIZE);
    sealed.extend_from_slice(ciphertext);
    sealed.extend_from_slice(tag);

    let cipher = Aes256Gcm::new(key.into());
    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), sealed.as_ref())
        .map(Zeroizing::new)
        .map_err(|_| CustodyError::DecryptionFailure)
}

/// Holds the deployment master secret and derives per-user envelope keys.
/// Each keyring owns its copy of the secret and wipes it on drop.
#[derive(Clone)]
pub struct EnvelopeKeyring {
    master: Zeroizing<String>,
}

impl EnvelopeKeyring {
    pub fn new(master: SecretString) -> Self {
        Self {
            master: Zeroizing::new(master.expose_secret().to_string()),
        }
    }

    pub fn user_key(&self, user_id: &str) -> Zeroizing<[u8; KEY_SIZE]> {
        derive_key(self.master.as_bytes(), user_id)
    }

    pub fn seal_for_user(&self, user_id: &str, plaintext: &[u8]) -> CustodyResult<String> {
        seal(&self.user_key(user_id), plaintext)
    }

    pub fn open_for_user(&self, user_id: &str, envelope: &str) -> CustodyResult<Zeroizing<Vec<u8>>> {
        open(&self.user_key(user_id), envelope)
    }
}

impl std::fmt::Debug for EnvelopeKeyring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeKeyring")
            .field("master", &"[REDACTED]")
            .finish()
    }
}
