//! keyshard-custody: orchestration layer for sharded key custody
//!
//! Creation flow: `ShardDistributor` splits a private key 2-of-3, protects
//! each shard per its holder's policy (device keeps plaintext, auth shard
//! goes HSM-opaque, recovery shard gets a per-user envelope), persists the
//! metadata, and hands the device shard back to the caller.
//!
//! Recovery flow: `ReconstructionOrchestrator` pairs the device shard with
//! one stored shard, enforces the per-user rate limit before any shard is
//! touched, decrypts per policy, recovers the key, and writes the audit
//! trail on every outcome.
//!
//! Persistence, HSM access, and event delivery are collaborator traits;
//! in-memory implementations ship for tests and embedders.

pub mod distributor;
pub mod events;
pub mod hsm;
pub mod orchestrator;
pub mod policy;
pub mod ratelimit;
pub mod store;

pub use distributor::{Distribution, ShardDistributor};
pub use events::{EventSink, RecordingEventSink, TracingEventSink};
pub use hsm::{HsmClient, MemoryHsm};
pub use orchestrator::ReconstructionOrchestrator;
pub use policy::{PresentedShard, ShardCipher};
pub use ratelimit::{UserLocks, RATE_WINDOW_SECS};
pub use store::{
    AuditLogStore, MemoryAuditLogStore, MemoryRecoveryBackupStore, MemoryShardRecordStore,
    RecoveryBackupStore, ShardRecordStore,
};

/// HSM secret id for a user's auth shard at one key version.
pub(crate) fn auth_secret_id(user_id: &str, key_version: u32) -> String {
    format!("auth-shard:{user_id}:{key_version}")
}

pub(crate) fn now_epoch() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
