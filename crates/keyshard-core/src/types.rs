use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// The three custodian roles a split key is distributed across.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardType {
    /// Held by the user's device; never persisted server-side.
    Device,
    /// Held by the HSM-backed authentication service.
    Auth,
    /// Encrypted user-cloud recovery backup.
    Recovery,
}

impl ShardType {
    pub const ALL: [ShardType; 3] = [ShardType::Device, ShardType::Auth, ShardType::Recovery];

    /// Label of the holder this shard is protected for.
    pub fn encrypted_for(self) -> &'static str {
        match self {
            ShardType::Device => "device-enclave",
            ShardType::Auth => "hsm",
            ShardType::Recovery => "user-cloud",
        }
    }

    /// Fixed share index for this role. Stable across rotations: a role
    /// always evaluates the split polynomial at the same x-coordinate.
    pub fn fixed_index(self) -> u8 {
        match self {
            ShardType::Device => 1,
            ShardType::Auth => 2,
            ShardType::Recovery => 3,
        }
    }
}

impl std::fmt::Display for ShardType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShardType::Device => write!(f, "device"),
            ShardType::Auth => write!(f, "auth"),
            ShardType::Recovery => write!(f, "recovery"),
        }
    }
}

/// Lifecycle state of a persisted shard record.
///
/// `Rotated` and `Revoked` are terminal; only `Active` rows are eligible
/// for lookup and reconstruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardStatus {
    Active,
    Rotated,
    Revoked,
}

/// One shard produced by a split, in wire form (base64 of a JSON point
/// list). Device shards exist only in this transient form — the server
/// keeps their hash, never the data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyShard {
    pub shard_type: ShardType,
    pub data: String,
    pub encrypted_for: String,
    pub user_id: String,
    pub index: u8,
}

/// Persisted shard metadata. For device shards `encrypted_data` holds the
/// SHA-256 hex of the plaintext shard, never the shard itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardRecord {
    pub user_id: String,
    pub shard_type: ShardType,
    pub shard_index: u8,
    pub encrypted_data: String,
    pub encrypted_for: String,
    pub key_version: u32,
    pub status: ShardStatus,
    pub public_key_hash: String,
    pub created_at: u64,
    pub last_accessed_at: Option<u64>,
}

/// Append-only recovery backup row. `verified` starts false and is flipped
/// once the user has proven they can present the shard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryBackup {
    pub user_id: String,
    pub key_version: u32,
    pub encrypted_shard: String,
    pub shard_hash: String,
    pub verified: bool,
    pub created_at: u64,
}

/// Caller-supplied context for a reconstruction attempt; copied verbatim
/// into the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestContext {
    pub purpose: String,
    pub ip_address: String,
    pub user_agent: String,
    pub device_id: String,
}

/// Append-only audit row, written for every reconstruction attempt that
/// touched shard material, success or failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconstructionLogEntry {
    pub id: String,
    pub user_id: String,
    pub key_version: u32,
    pub shards_used: Vec<ShardType>,
    pub purpose: String,
    pub ip_address: String,
    pub user_agent: String,
    pub device_id: String,
    pub success: bool,
    pub failure_reason: Option<String>,
    pub timestamp: u64,
}

impl ReconstructionLogEntry {
    pub fn new(
        user_id: &str,
        key_version: u32,
        shards_used: Vec<ShardType>,
        ctx: &RequestContext,
        success: bool,
        failure_reason: Option<String>,
        timestamp: u64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            key_version,
            shards_used,
            purpose: ctx.purpose.clone(),
            ip_address: ctx.ip_address.clone(),
            user_agent: ctx.user_agent.clone(),
            device_id: ctx.device_id.clone(),
            success,
            failure_reason,
            timestamp,
        }
    }
}

/// Presence summary for one shard role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardPresence {
    pub shard_type: ShardType,
    pub present: bool,
    pub key_version: Option<u32>,
    pub last_accessed_at: Option<u64>,
}

/// Per-role custody status for a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardsSummary {
    pub user_id: String,
    pub shards: Vec<ShardPresence>,
}

/// Fire-and-forget notifications emitted at custody state changes.
/// Delivery semantics belong to the embedding application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CustodyEvent {
    KeyShardsCreated {
        user_id: String,
        key_version: u32,
    },
    KeyShardsRotated {
        user_id: String,
        old_key_version: u32,
        new_key_version: u32,
    },
    KeyReconstructed {
        user_id: String,
        purpose: String,
        shard_types: Vec<ShardType>,
    },
    KeyReconstructionFailed {
        user_id: String,
        purpose: String,
        reason: String,
    },
}

/// A transiently reconstructed private key.
///
/// The bytes live in a `Zeroizing` buffer and are wiped on drop, on every
/// exit path. The handle is never persisted; callers should drop it as soon
/// as the key has been used, and must treat an expired handle as unusable.
pub struct ReconstructedKey {
    key: Zeroizing<Vec<u8>>,
    pub user_id: String,
    pub reconstructed_at: u64,
    pub ttl_secs: u64,
}

impl ReconstructedKey {
    pub fn new(key: Vec<u8>, user_id: &str, reconstructed_at: u64, ttl_secs: u64) -> Self {
        Self {
            key: Zeroizing::new(key),
            user_id: user_id.to_string(),
            reconstructed_at,
            ttl_secs,
        }
    }

    /// Borrow the raw key bytes. The borrow must not outlive the handle.
    pub fn expose(&self) -> &[u8] {
        &self.key
    }

    /// Whether the handle has outlived its TTL at `now` (epoch seconds).
    pub fn is_expired_at(&self, now: u64) -> bool {
        now.saturating_sub(self.reconstructed_at) >= self.ttl_secs
    }

    /// Whether the handle has outlived its TTL right now.
    pub fn is_expired(&self) -> bool {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.is_expired_at(now)
    }
}

impl std::fmt::Debug for ReconstructedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconstructedKey")
            .field("key", &"[REDACTED]")
            .field("user_id", &self.user_id)
            .field("reconstructed_at", &self.reconstructed_at)
            .field("ttl_secs", &self.ttl_secs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_indices_are_stable_and_distinct() {
        let indices: Vec<u8> = ShardType::ALL.iter().map(|t| t.fixed_index()).collect();
        assert_eq!(indices, vec![1, 2, 3]);
    }

    #[test]
    fn test_encrypted_for_labels() {
        assert_eq!(ShardType::Device.encrypted_for(), "device-enclave");
        assert_eq!(ShardType::Auth.encrypted_for(), "hsm");
        assert_eq!(ShardType::Recovery.encrypted_for(), "user-cloud");
    }

    #[test]
    fn test_reconstructed_key_expiry() {
        let key = ReconstructedKey::new(vec![1, 2, 3], "u1", 1_000, 300);
        assert!(!key.is_expired_at(1_000));
        assert!(!key.is_expired_at(1_299));
        assert!(key.is_expired_at(1_300));
        assert!(key.is_expired_at(2_000));
    }

    #[test]
    fn test_reconstructed_key_debug_redacts() {
        let key = ReconstructedKey::new(vec![0xaa; 32], "u1", 0, 300);
        let rendered = format!("{key:?}");
        assert!(rendered.contains("[REDACTED]"));
        assert!(!rendered.contains("170")); // 0xaa
    }

    #[test]
    fn test_log_entry_ids_are_unique() {
        let ctx = RequestContext {
            purpose: "transaction_signing".into(),
            ip_address: "10.0.0.1".into(),
            user_agent: "test".into(),
            device_id: "d1".into(),
        };
        let a = ReconstructionLogEntry::new("u1", 1, vec![], &ctx, true, None, 0);
        let b = ReconstructionLogEntry::new("u1", 1, vec![], &ctx, true, None, 0);
        assert_ne!(a.id, b.id);
    }
}
