//! Shard distribution: split → per-type storage → metadata → events.
//!
//! Creation flow for one key generation:
//!   1. Allocate the next key version for the user (monotonic per user)
//!   2. Split the private key 2-of-3 and protect each shard per its policy
//!   3. Store the auth shard HSM-side, append the recovery backup
//!   4. Insert the three shard records (device row holds only a digest)
//!   5. Emit `KeyShardsCreated` and hand the device shard to the caller
//!
//! Rotation marks the old generation ROTATED first and then runs the same
//! creation flow; revocation flips every active row to REVOKED.

use std::sync::Arc;

use tracing::{info, warn};

use keyshard_core::config::CustodyConfig;
use keyshard_core::error::{CustodyError, CustodyResult};
use keyshard_core::types::{
    CustodyEvent, KeyShard, RecoveryBackup, ShardPresence, ShardRecord, ShardStatus, ShardType,
    ShardsSummary,
};
use keyshard_crypto::{digest, shamir, EnvelopeKeyring};

use crate::events::EventSink;
use crate::hsm::HsmClient;
use crate::policy::ShardCipher;
use crate::store::{RecoveryBackupStore, ShardRecordStore};
use crate::{auth_secret_id, now_epoch};

/// Result of distributing one key generation. The device shard is returned
/// to the caller and exists nowhere else.
#[derive(Debug)]
pub struct Distribution {
    pub device_shard: KeyShard,
    pub key_version: u32,
    pub auth_stored: bool,
    pub recovery_stored: bool,
}

pub struct ShardDistributor {
    config: CustodyConfig,
    cipher: ShardCipher,
    hsm: Arc<dyn HsmClient>,
    records: Arc<dyn ShardRecordStore>,
    backups: Arc<dyn RecoveryBackupStore>,
    events: Arc<dyn EventSink>,
}

impl ShardDistributor {
    /// Fails fast on an invalid configuration. The custody topology names
    /// exactly three holders, so `total_shards` must be 3; the threshold
    /// may be 2 or 3.
    pub fn new(
        config: CustodyConfig,
        keyring: EnvelopeKeyring,
        hsm: Arc<dyn HsmClient>,
        records: Arc<dyn ShardRecordStore>,
        backups: Arc<dyn RecoveryBackupStore>,
        events: Arc<dyn EventSink>,
    ) -> CustodyResult<Self> {
        config.validate()?;
        if config.total_shards != 3 {
            return Err(CustodyError::Configuration(format!(
                "custody topology requires exactly 3 shards (device, auth, recovery), got {}",
                config.total_shards
            )));
        }
        Ok(Self {
            config,
            cipher: ShardCipher::new(keyring, Arc::clone(&hsm)),
            hsm,
            records,
            backups,
            events,
        })
    }

    /// Split `private_key` into a fresh generation of shards and distribute
    /// them to their custodians.
    pub fn create_and_distribute(
        &self,
        private_key: &[u8],
        user_id: &str,
    ) -> CustodyResult<Distribution> {
        let key_version = self
            .records
            .latest_key_version(user_id)?
            .map_or(1, |v| v + 1);
        let now = now_epoch();
        let public_key_hash = digest::sha256_hex(private_key);

        let shares = shamir::split(private_key, self.config.total_shards, self.config.threshold)?;
        let shard_for = |shard_type: ShardType| -> KeyShard {
            let index = shard_type.fixed_index();
            KeyShard {
                shard_type,
                data: shares[(index - 1) as usize].encode(),
                encrypted_for: shard_type.encrypted_for().to_string(),
                user_id: user_id.to_string(),
                index,
            }
        };
        let device_shard = shard_for(ShardType::Device);
        let auth_shard = shard_for(ShardType::Auth);
        let recovery_shard = shard_for(ShardType::Recovery);

        // Auth shard: HSM-opaque, stored HSM-side under a versioned id.
        let auth_ciphertext = self.cipher.seal_auth(&auth_shard)?;
        let auth_stored = self
            .hsm
            .store(&auth_secret_id(user_id, key_version), &auth_ciphertext)?;

        // Recovery shard: per-user envelope, appended to the backup log
        // with an integrity hash of the plaintext. Unverified until the
        // user proves they can present it.
        let recovery_envelope = self.cipher.seal_recovery(&recovery_shard)?;
        self.backups.append(RecoveryBackup {
            user_id: user_id.to_string(),
            key_version,
            encrypted_shard: recovery_envelope.clone(),
            shard_hash: digest::sha256_hex(recovery_shard.data.as_bytes()),
            verified: false,
            created_at: now,
        })?;
        let recovery_stored = true;

        let record_for = |shard: &KeyShard, encrypted_data: String| ShardRecord {
            user_id: user_id.to_string(),
            shard_type: shard.shard_type,
            shard_index: shard.index,
            encrypted_data,
            encrypted_for: shard.encrypted_for.clone(),
            key_version,
            status: ShardStatus::Active,
            public_key_hash: public_key_hash.clone(),
            created_at: now,
            last_accessed_at: None,
        };
        self.records
            .insert(record_for(&device_shard, self.cipher.device_digest(&device_shard)))?;
        self.records.insert(record_for(
            &auth_shard,
            base64_encode(&auth_ciphertext),
        ))?;
        self.records
            .insert(record_for(&recovery_shard, recovery_envelope))?;

        self.events.emit(&CustodyEvent::KeyShardsCreated {
            user_id: user_id.to_string(),
            key_version,
        });
        info!(user_id = %user_id, key_version, "distributed key shards");

        Ok(Distribution {
            device_shard,
            key_version,
            auth_stored,
            recovery_stored,
        })
    }

    /// Retire the `old_key_version` generation and distribute a new one.
    pub fn rotate_shards(
        &self,
        private_key: &[u8],
        user_id: &str,
        old_key_version: u32,
    ) -> CustodyResult<Distribution> {
        let retired = self.records.mark_rotated(user_id, old_key_version)?;
        let distribution = self.create_and_distribute(private_key, user_id)?;

        self.events.emit(&CustodyEvent::KeyShardsRotated {
            user_id: user_id.to_string(),
            old_key_version,
            new_key_version: distribution.key_version,
        });
        info!(
            user_id = %user_id,
            old_key_version,
            new_key_version = distribution.key_version,
            retired_rows = retired,
            "rotated key shards"
        );
        Ok(distribution)
    }

    /// Emergency response to key compromise: every active row for the user
    /// becomes REVOKED and is permanently excluded from lookups.
    pub fn revoke_all_shards(&self, user_id: &str) -> CustodyResult<usize> {
        let revoked = self.records.revoke_all(user_id)?;
        warn!(user_id = %user_id, revoked_rows = revoked, "revoked all key shards");
        Ok(revoked)
    }

    /// Per-role custody status for the user.
    pub fn shards_summary(&self, user_id: &str) -> CustodyResult<ShardsSummary> {
        let mut shards = Vec::with_capacity(ShardType::ALL.len());
        for shard_type in ShardType::ALL {
            let record = self.records.active_record(user_id, shard_type)?;
            shards.push(ShardPresence {
                shard_type,
                present: record.is_some(),
                key_version: record.as_ref().map(|r| r.key_version),
                last_accessed_at: record.and_then(|r| r.last_accessed_at),
            });
        }
        Ok(ShardsSummary {
            user_id: user_id.to_string(),
            shards,
        })
    }

    /// Check a presented recovery shard against the latest verified backup
    /// without committing to a reconstruction attempt. Never throws.
    pub fn verify_recovery_shard(&self, user_id: &str, presented: &str) -> bool {
        let backup = match self.backups.latest_verified(user_id) {
            Ok(Some(backup)) => backup,
            Ok(None) => return false,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "recovery backup lookup failed");
                return false;
            }
        };
        let Ok(plaintext) = self.cipher.keyring().open_for_user(user_id, presented) else {
            return false;
        };
        digest::ct_eq(&digest::sha256_hex(&plaintext), &backup.shard_hash)
    }

    /// Flip the verified flag on a backup once the user has proven they can
    /// present it.
    pub fn mark_backup_verified(&self, user_id: &str, key_version: u32) -> CustodyResult<bool> {
        self.backups.mark_verified(user_id, key_version)
    }
}

fn base64_encode(data: &[u8]) -> String {
    use base64::{engine::general_purpose::STANDARD, Engine};
    STANDARD.encode(data)
}
