//! Persistence traits for shard records, recovery backups, and the audit
//! log, with `Mutex`-guarded in-memory implementations.
//!
//! Real deployments back these with a transactional store; the audit log
//! and the recovery backups are append-only either way.

use std::sync::Mutex;

use keyshard_core::error::CustodyResult;
use keyshard_core::types::{
    ReconstructionLogEntry, RecoveryBackup, ShardRecord, ShardStatus, ShardType,
};

pub trait ShardRecordStore: Send + Sync {
    fn insert(&self, record: ShardRecord) -> CustodyResult<()>;

    /// All ACTIVE records for a user.
    fn active_records(&self, user_id: &str) -> CustodyResult<Vec<ShardRecord>>;

    /// The ACTIVE record for one shard role, if any.
    fn active_record(
        &self,
        user_id: &str,
        shard_type: ShardType,
    ) -> CustodyResult<Option<ShardRecord>>;

    /// ACTIVE → ROTATED for one key version. Returns rows affected.
    fn mark_rotated(&self, user_id: &str, key_version: u32) -> CustodyResult<usize>;

    /// ACTIVE → REVOKED for every row of the user. Returns rows affected.
    fn revoke_all(&self, user_id: &str) -> CustodyResult<usize>;

    fn touch_last_accessed(
        &self,
        user_id: &str,
        shard_type: ShardType,
        key_version: u32,
        at: u64,
    ) -> CustodyResult<()>;

    /// Highest key version ever created for the user, regardless of status.
    fn latest_key_version(&self, user_id: &str) -> CustodyResult<Option<u32>>;
}

pub trait RecoveryBackupStore: Send + Sync {
    fn append(&self, backup: RecoveryBackup) -> CustodyResult<()>;

    /// Most recent verified backup for a user.
    fn latest_verified(&self, user_id: &str) -> CustodyResult<Option<RecoveryBackup>>;

    /// Flip the verified flag. Returns whether a matching row existed.
    fn mark_verified(&self, user_id: &str, key_version: u32) -> CustodyResult<bool>;
}

pub trait AuditLogStore: Send + Sync {
    fn append(&self, entry: ReconstructionLogEntry) -> CustodyResult<()>;

    /// Number of entries for a user with `timestamp >= since`.
    fn count_since(&self, user_id: &str, since: u64) -> CustodyResult<u32>;
}

// -- In-memory implementations --

#[derive(Default)]
pub struct MemoryShardRecordStore {
    records: Mutex<Vec<ShardRecord>>,
}

impl MemoryShardRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record for a user, any status. Test and inspection helper.
    pub fn all_records(&self, user_id: &str) -> Vec<ShardRecord> {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect()
    }
}

impl ShardRecordStore for MemoryShardRecordStore {
    fn insert(&self, record: ShardRecord) -> CustodyResult<()> {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(record);
        Ok(())
    }

    fn active_records(&self, user_id: &str) -> CustodyResult<Vec<ShardRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .filter(|r| r.user_id == user_id && r.status == ShardStatus::Active)
            .cloned()
            .collect())
    }

    fn active_record(
        &self,
        user_id: &str,
        shard_type: ShardType,
    ) -> CustodyResult<Option<ShardRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .filter(|r| {
                r.user_id == user_id
                    && r.shard_type == shard_type
                    && r.status == ShardStatus::Active
            })
            .max_by_key(|r| r.key_version)
            .cloned())
    }

    fn mark_rotated(&self, user_id: &str, key_version: u32) -> CustodyResult<usize> {
        let mut records = self
            .records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut affected = 0;
        for record in records.iter_mut() {
            if record.user_id == user_id
                && record.key_version == key_version
                && record.status == ShardStatus::Active
            {
                record.status = ShardStatus::Rotated;
                affected += 1;
            }
        }
        Ok(affected)
    }

    fn revoke_all(&self, user_id: &str) -> CustodyResult<usize> {
        let mut records = self
            .records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut affected = 0;
        for record in records.iter_mut() {
            if record.user_id == user_id && record.status == ShardStatus::Active {
                record.status = ShardStatus::Revoked;
                affected += 1;
            }
        }
        Ok(affected)
    }

    fn touch_last_accessed(
        &self,
        user_id: &str,
        shard_type: ShardType,
        key_version: u32,
        at: u64,
    ) -> CustodyResult<()> {
        let mut records = self
            .records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        for record in records.iter_mut() {
            if record.user_id == user_id
                && record.shard_type == shard_type
                && record.key_version == key_version
            {
                record.last_accessed_at = Some(at);
            }
        }
        Ok(())
    }

    fn latest_key_version(&self, user_id: &str) -> CustodyResult<Option<u32>> {
        Ok(self
            .records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .filter(|r| r.user_id == user_id)
            .map(|r| r.key_version)
            .max())
    }
}

#[derive(Default)]
pub struct MemoryRecoveryBackupStore {
    backups: Mutex<Vec<RecoveryBackup>>,
}

impl MemoryRecoveryBackupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent backup for a user regardless of verification.
    pub fn latest(&self, user_id: &str) -> Option<RecoveryBackup> {
        self.backups
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .filter(|b| b.user_id == user_id)
            .max_by_key(|b| b.key_version)
            .cloned()
    }
}

impl RecoveryBackupStore for MemoryRecoveryBackupStore {
    fn append(&self, backup: RecoveryBackup) -> CustodyResult<()> {
        self.backups
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(backup);
        Ok(())
    }

    fn latest_verified(&self, user_id: &str) -> CustodyResult<Option<RecoveryBackup>> {
        Ok(self
            .backups
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .filter(|b| b.user_id == user_id && b.verified)
            .max_by_key(|b| b.key_version)
            .cloned())
    }

    fn mark_verified(&self, user_id: &str, key_version: u32) -> CustodyResult<bool> {
        let mut backups = self
            .backups
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut found = false;
        for backup in backups.iter_mut() {
            if backup.user_id == user_id && backup.key_version == key_version {
                backup.verified = true;
                found = true;
            }
        }
        Ok(found)
    }
}

#[derive(Default)]
pub struct MemoryAuditLogStore {
    entries: Mutex<Vec<ReconstructionLogEntry>>,
}

impl MemoryAuditLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All entries for a user, oldest first. Test and inspection helper.
    pub fn entries_for(&self, user_id: &str) -> Vec<ReconstructionLogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect()
    }
}

impl AuditLogStore for MemoryAuditLogStore {
    fn append(&self, entry: ReconstructionLogEntry) -> CustodyResult<()> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(entry);
        Ok(())
    }

    fn count_since(&self, user_id: &str, since: u64) -> CustodyResult<u32> {
        Ok(self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .filter(|e| e.user_id == user_id && e.timestamp >= since)
            .count() as u32)
    }
}
