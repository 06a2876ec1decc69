//! Per-shard-type protection policy.
//!
//! One rule per custodian role, dispatched over a tagged enum rather than
//! runtime inspection:
//!
//! - DEVICE — plaintext stays with the caller; the server keeps a SHA-256
//!   digest for integrity checks only.
//! - AUTH — HSM-opaque encryption; the server never holds plaintext of
//!   this shard outside a reconstruction call.
//! - RECOVERY — per-user AES-256-GCM envelope.

use std::sync::Arc;

use keyshard_core::error::{CustodyError, CustodyResult, HsmError};
use keyshard_core::types::{KeyShard, ShardType};
use keyshard_crypto::shamir::Share;
use keyshard_crypto::{digest, EnvelopeKeyring};

use crate::hsm::HsmClient;

/// A shard as presented to the reconstruction path.
#[derive(Debug, Clone)]
pub enum PresentedShard {
    /// Plaintext wire data held by the user's device.
    Device { data: String },
    /// The persisted, active auth-service shard; resolved from the HSM at
    /// reconstruction time.
    Auth,
    /// A user-cloud recovery shard, still in its envelope.
    Recovery { envelope: String },
}

impl PresentedShard {
    pub fn shard_type(&self) -> ShardType {
        match self {
            PresentedShard::Device { .. } => ShardType::Device,
            PresentedShard::Auth => ShardType::Auth,
            PresentedShard::Recovery { .. } => ShardType::Recovery,
        }
    }
}

/// Applies the per-type protection rules on both the sealing and the
/// opening side.
pub struct ShardCipher {
    keyring: EnvelopeKeyring,
    hsm: Arc<dyn HsmClient>,
}

impl ShardCipher {
    pub fn new(keyring: EnvelopeKeyring, hsm: Arc<dyn HsmClient>) -> Self {
        Self { keyring, hsm }
    }

    /// Integrity digest persisted in place of device shard data.
    pub fn device_digest(&self, shard: &KeyShard) -> String {
        digest::sha256_hex(shard.data.as_bytes())
    }

    /// HSM-opaque ciphertext for an auth shard.
    pub fn seal_auth(&self, shard: &KeyShard) -> CustodyResult<Vec<u8>> {
        self.hsm
            .encrypt(shard.data.as_bytes())
            .map_err(CustodyError::from)
    }

    /// Per-user envelope for a recovery shard.
    pub fn seal_recovery(&self, shard: &KeyShard) -> CustodyResult<String> {
        self.keyring
            .seal_for_user(&shard.user_id, shard.data.as_bytes())
    }

    /// Open a device shard: no decryption, just wire-format validation.
    pub fn open_device(&self, data: &str) -> CustodyResult<Share> {
        Share::decode(data)
    }

    /// Open an HSM-opaque auth shard blob. A rejected ciphertext maps to
    /// the uniform decryption failure; transport errors stay distinct.
    pub fn open_auth(&self, ciphertext: &[u8]) -> CustodyResult<Share> {
        let plaintext = self.hsm.decrypt(ciphertext).map_err(|e| match e {
            HsmError::InvalidCiphertext => CustodyError::DecryptionFailure,
            other => CustodyError::Hsm(other),
        })?;
        let wire = String::from_utf8(plaintext)
            .map_err(|_| CustodyError::InvalidShardFormat("shard data is not UTF-8".into()))?;
        Share::decode(&wire)
    }

    /// Open a recovery shard envelope under the user's derived key.
    pub fn open_recovery(&self, user_id: &str, envelope: &str) -> CustodyResult<Share> {
        let plaintext = self.keyring.open_for_user(user_id, envelope)?;
        let wire = std::str::from_utf8(&plaintext)
            .map_err(|_| CustodyError::InvalidShardFormat("shard data is not UTF-8".into()))?;
        Share::decode(wire)
    }

    pub fn keyring(&self) -> &EnvelopeKeyring {
        &self.keyring
    }
}
