//! Rate-limited key reconstruction with an unconditional audit trail.
//!
//! Every entry point funnels into [`ReconstructionOrchestrator::reconstruct`]:
//! the per-user lock is taken, the rolling-hour attempt count is checked
//! before any shard is fetched or decrypted, and then the attempt runs to a
//! logged outcome. Failures are re-thrown after the audit write — the
//! orchestrator never returns success when something went wrong, and never
//! skips the audit write on error.

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use tracing::{info, warn};
use zeroize::Zeroizing;

use keyshard_core::config::CustodyConfig;
use keyshard_core::error::{CustodyError, CustodyResult};
use keyshard_core::types::{
    CustodyEvent, ReconstructedKey, ReconstructionLogEntry, RequestContext, ShardType,
};
use keyshard_crypto::shamir::Share;
use keyshard_crypto::{digest, shamir, EnvelopeKeyring};

use crate::events::EventSink;
use crate::hsm::HsmClient;
use crate::policy::{PresentedShard, ShardCipher};
use crate::ratelimit::{UserLocks, RATE_WINDOW_SECS};
use crate::store::{AuditLogStore, ShardRecordStore};
use crate::{auth_secret_id, now_epoch};

pub struct ReconstructionOrchestrator {
    config: CustodyConfig,
    cipher: ShardCipher,
    hsm: Arc<dyn HsmClient>,
    records: Arc<dyn ShardRecordStore>,
    audit: Arc<dyn AuditLogStore>,
    events: Arc<dyn EventSink>,
    locks: UserLocks,
}

impl ReconstructionOrchestrator {
    /// Fails fast on an invalid configuration.
    pub fn new(
        config: CustodyConfig,
        keyring: EnvelopeKeyring,
        hsm: Arc<dyn HsmClient>,
        records: Arc<dyn ShardRecordStore>,
        audit: Arc<dyn AuditLogStore>,
        events: Arc<dyn EventSink>,
    ) -> CustodyResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            cipher: ShardCipher::new(keyring, Arc::clone(&hsm)),
            hsm,
            records,
            audit,
            events,
            locks: UserLocks::new(),
        })
    }

    /// Whether the user is under the rolling-hour attempt limit right now.
    /// Advisory: `reconstruct` re-checks under the user lock.
    pub fn can_reconstruct(&self, user_id: &str) -> CustodyResult<bool> {
        let now = now_epoch();
        let attempts = self
            .audit
            .count_since(user_id, now.saturating_sub(RATE_WINDOW_SECS))?;
        Ok(attempts < self.config.max_attempts_per_hour)
    }

    /// Pair the caller's device shard with the persisted auth-service shard.
    ///
    /// Session validation belongs to the surrounding auth service; an
    /// obviously absent token is refused here before any accounting.
    pub fn reconstruct_with_auth(
        &self,
        user_id: &str,
        device_shard_data: &str,
        session_token: &SecretString,
        ctx: &RequestContext,
    ) -> CustodyResult<ReconstructedKey> {
        if session_token.expose_secret().is_empty() {
            return Err(CustodyError::SessionRejected);
        }
        self.reconstruct(
            user_id,
            vec![
                PresentedShard::Device {
                    data: device_shard_data.to_string(),
                },
                PresentedShard::Auth,
            ],
            ctx,
        )
    }

    /// Pair the caller's device shard with a caller-supplied recovery shard.
    pub fn reconstruct_with_recovery(
        &self,
        user_id: &str,
        device_shard_data: &str,
        recovery_shard_data: &str,
        ctx: &RequestContext,
    ) -> CustodyResult<ReconstructedKey> {
        self.reconstruct(
            user_id,
            vec![
                PresentedShard::Device {
                    data: device_shard_data.to_string(),
                },
                PresentedShard::Recovery {
                    envelope: recovery_shard_data.to_string(),
                },
            ],
            ctx,
        )
    }

    /// Reconstruct the user's private key from exactly `threshold` shards.
    ///
    /// A rate-limited request fails before any shard is fetched or
    /// decrypted and is not written to the audit log (it performed no shard
    /// access, and logging it would let rejected retries extend the lockout
    /// forever). Every attempt past the gate is logged, success or failure,
    /// and failures are re-thrown after the audit write.
    pub fn reconstruct(
        &self,
        user_id: &str,
        shards: Vec<PresentedShard>,
        ctx: &RequestContext,
    ) -> CustodyResult<ReconstructedKey> {
        // The user lock spans the count check and the audit append, so
        // concurrent requests cannot both observe a count below the limit.
        let lock = self.locks.lock_for(user_id);
        let _guard = lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        let now = now_epoch();
        let attempts = self
            .audit
            .count_since(user_id, now.saturating_sub(RATE_WINDOW_SECS))?;
        if attempts >= self.config.max_attempts_per_hour {
            warn!(user_id = %user_id, attempts, "reconstruction rate limit hit");
            return Err(CustodyError::RateLimitExceeded {
                user_id: user_id.to_string(),
            });
        }

        let shard_types: Vec<ShardType> = shards.iter().map(|s| s.shard_type()).collect();
        match self.attempt(user_id, &shards) {
            Ok((secret, key_version)) => {
                self.audit.append(ReconstructionLogEntry::new(
                    user_id,
                    key_version,
                    shard_types.clone(),
                    ctx,
                    true,
                    None,
                    now,
                ))?;
                self.touch_stored_shards(user_id, &shard_types, now);
                self.events.emit(&CustodyEvent::KeyReconstructed {
                    user_id: user_id.to_string(),
                    purpose: ctx.purpose.clone(),
                    shard_types: shard_types.clone(),
                });
                info!(
                    user_id = %user_id,
                    key_version,
                    purpose = %ctx.purpose,
                    "key reconstructed"
                );
                Ok(ReconstructedKey::new(
                    secret.to_vec(),
                    user_id,
                    now,
                    self.config.key_ttl_secs,
                ))
            }
            Err(error) => {
                let reason = error.to_string();
                let key_version = self
                    .records
                    .latest_key_version(user_id)
                    .ok()
                    .flatten()
                    .unwrap_or(0);
                if let Err(audit_error) = self.audit.append(ReconstructionLogEntry::new(
                    user_id,
                    key_version,
                    shard_types,
                    ctx,
                    false,
                    Some(reason.clone()),
                    now,
                )) {
                    warn!(
                        user_id = %user_id,
                        error = %audit_error,
                        "audit append failed for failed reconstruction"
                    );
                }
                self.events.emit(&CustodyEvent::KeyReconstructionFailed {
                    user_id: user_id.to_string(),
                    purpose: ctx.purpose.clone(),
                    reason: reason.clone(),
                });
                warn!(user_id = %user_id, reason = %reason, "key reconstruction failed");
                Err(error)
            }
        }
    }

    /// Advisory shard-set check: decrypts up to `threshold` shards,
    /// recovers the candidate key, and compares its digest against
    /// `expected_key_hash` in constant time. Never throws, writes no audit
    /// entry, and returns no key material.
    pub fn verify_shards(
        &self,
        user_id: &str,
        shards: &[PresentedShard],
        expected_key_hash: &str,
    ) -> bool {
        let take = shards.len().min(self.config.threshold as usize);
        let mut opened = Vec::with_capacity(take);
        for presented in &shards[..take] {
            match self.open_presented(user_id, presented) {
                Ok((share, _)) => opened.push(share),
                Err(_) => return false,
            }
        }
        match shamir::recover(&opened) {
            Ok(secret) => {
                let secret = Zeroizing::new(secret);
                digest::ct_eq(&digest::sha256_hex(&secret), expected_key_hash)
            }
            Err(_) => false,
        }
    }

    /// The decrypt-and-recover core: arity first, then per-policy opens,
    /// then interpolation, then the key-hash integrity gate.
    fn attempt(
        &self,
        user_id: &str,
        shards: &[PresentedShard],
    ) -> CustodyResult<(Zeroizing<Vec<u8>>, u32)> {
        let expected = self.config.threshold as usize;
        if shards.len() != expected {
            return Err(CustodyError::InvalidShardCount {
                expected,
                actual: shards.len(),
            });
        }

        // A user with no active custody (revoked, or never enrolled) has
        // nothing to reconstruct, whatever material is presented.
        let device_record = self
            .records
            .active_record(user_id, ShardType::Device)?
            .ok_or_else(|| CustodyError::ShardNotFound {
                user_id: user_id.to_string(),
                shard_type: ShardType::Device,
            })?;

        let mut opened = Vec::with_capacity(shards.len());
        let mut stored_version: Option<u32> = None;
        for presented in shards {
            let (share, version) = self.open_presented(user_id, presented)?;
            if let Some(version) = version {
                stored_version = Some(stored_version.map_or(version, |v| v.max(version)));
            }
            opened.push(share);
        }

        let secret = Zeroizing::new(shamir::recover(&opened)?);

        // A stale or cross-generation shard mix interpolates to garbage;
        // the stored key hash catches it before anything is released.
        if !digest::ct_eq(&digest::sha256_hex(&secret), &device_record.public_key_hash) {
            return Err(CustodyError::ReconstructionFailure(
                "recovered key does not match the expected key hash".to_string(),
            ));
        }

        let key_version = match stored_version {
            Some(version) => version,
            None => device_record.key_version,
        };
        Ok((secret, key_version))
    }

    /// Open one presented shard per its type's policy. Returns the decoded
    /// share and, for stored shards, the key version that was touched.
    fn open_presented(
        &self,
        user_id: &str,
        presented: &PresentedShard,
    ) -> CustodyResult<(Share, Option<u32>)> {
        match presented {
            PresentedShard::Device { data } => Ok((self.cipher.open_device(data)?, None)),
            PresentedShard::Auth => {
                let record = self
                    .records
                    .active_record(user_id, ShardType::Auth)?
                    .ok_or_else(|| CustodyError::ShardNotFound {
                        user_id: user_id.to_string(),
                        shard_type: ShardType::Auth,
                    })?;
                let blob = self
                    .hsm
                    .retrieve(&auth_secret_id(user_id, record.key_version))?;
                Ok((self.cipher.open_auth(&blob)?, Some(record.key_version)))
            }
            PresentedShard::Recovery { envelope } => {
                let version = self
                    .records
                    .active_record(user_id, ShardType::Recovery)?
                    .map(|r| r.key_version);
                Ok((self.cipher.open_recovery(user_id, envelope)?, version))
            }
        }
    }

    /// Update `last_accessed_at` on the stored records that participated in
    /// a successful reconstruction. Best effort: the key is already out.
    fn touch_stored_shards(&self, user_id: &str, shard_types: &[ShardType], now: u64) {
        for &shard_type in shard_types {
            if shard_type == ShardType::Device {
                continue;
            }
            match self.records.active_record(user_id, shard_type) {
                Ok(Some(record)) => {
                    if let Err(e) = self.records.touch_last_accessed(
                        user_id,
                        shard_type,
                        record.key_version,
                        now,
                    ) {
                        warn!(user_id = %user_id, %shard_type, error = %e, "last-access update failed");
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(user_id = %user_id, %shard_type, error = %e, "record lookup failed");
                }
            }
        }
    }
}
