//! HSM capability trait and an in-memory stand-in.
//!
//! The real backend is an external vault; this module only fixes the
//! contract: opaque encrypt/decrypt plus a small keyed blob store, with
//! transport failures (unavailable, timeout) kept distinct from bad
//! ciphertext.

use std::collections::HashMap;
use std::sync::Mutex;

use rand::RngCore;
use zeroize::Zeroizing;

use keyshard_core::error::HsmError;
use keyshard_crypto::{envelope, KEY_SIZE};

pub trait HsmClient: Send + Sync {
    /// Encrypt under an HSM-held key; the result is opaque to the caller.
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, HsmError>;

    /// Decrypt an opaque blob produced by [`HsmClient::encrypt`].
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, HsmError>;

    /// Persist a named secret. Returns whether the write was accepted.
    fn store(&self, secret_id: &str, data: &[u8]) -> Result<bool, HsmError>;

    /// Fetch a named secret.
    fn retrieve(&self, secret_id: &str) -> Result<Vec<u8>, HsmError>;
}

/// In-memory HSM with an ephemeral AES-256-GCM key. The key never leaves
/// the instance and dies with it, which is exactly what tests want.
pub struct MemoryHsm {
    key: Zeroizing<[u8; KEY_SIZE]>,
    secrets: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryHsm {
    pub fn new() -> Self {
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        rand::rngs::OsRng.fill_bytes(key.as_mut());
        Self {
            key,
            secrets: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryHsm {
    fn default() -> Self {
        Self::new()
    }
}

impl HsmClient for MemoryHsm {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, HsmError> {
        let sealed = envelope::seal(&self.key, plaintext)
            .map_err(|e| HsmError::Unavailable(e.to_string()))?;
        Ok(sealed.into_bytes())
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, HsmError> {
        let sealed = std::str::from_utf8(ciphertext).map_err(|_| HsmError::InvalidCiphertext)?;
        let opened = envelope::open(&self.key, sealed).map_err(|_| HsmError::InvalidCiphertext)?;
        Ok(opened.to_vec())
    }

    fn store(&self, secret_id: &str, data: &[u8]) -> Result<bool, HsmError> {
        let mut secrets = self
            .secrets
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        secrets.insert(secret_id.to_string(), data.to_vec());
        Ok(true)
    }

    fn retrieve(&self, secret_id: &str) -> Result<Vec<u8>, HsmError> {
        let secrets = self
            .secrets
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        secrets
            .get(secret_id)
            .cloned()
            .ok_or_else(|| HsmError::Unavailable(format!("no secret stored under {secret_id}")))
    }
}
