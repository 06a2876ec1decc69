//! Integration test: audit completeness, arity enforcement, rate limiting.
//!
//! The HSM is wrapped in a call counter so the tests can prove that
//! rejected requests (wrong arity, rate-limited) never reach the HSM.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use secrecy::SecretString;

use keyshard_core::{CustodyConfig, CustodyError, HsmError, ReconstructionLogEntry, RequestContext, ShardType};
use keyshard_custody::{
    AuditLogStore, Distribution, EventSink, HsmClient, MemoryAuditLogStore, MemoryHsm,
    MemoryRecoveryBackupStore, MemoryShardRecordStore, PresentedShard,
    ReconstructionOrchestrator, RecordingEventSink, RecoveryBackupStore, ShardDistributor,
    ShardRecordStore,
};
use keyshard_crypto::EnvelopeKeyring;

const PRIVATE_KEY: &[u8] = b"audit-test private signing key!!";

/// Counts every HSM call so tests can assert nothing reached the backend.
struct CountingHsm {
    inner: MemoryHsm,
    calls: AtomicUsize,
}

impl CountingHsm {
    fn new() -> Self {
        Self {
            inner: MemoryHsm::new(),
            calls: AtomicUsize::new(0),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl HsmClient for CountingHsm {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, HsmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.encrypt(plaintext)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, HsmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.decrypt(ciphertext)
    }

    fn store(&self, secret_id: &str, data: &[u8]) -> Result<bool, HsmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.store(secret_id, data)
    }

    fn retrieve(&self, secret_id: &str) -> Result<Vec<u8>, HsmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.retrieve(secret_id)
    }
}

struct Harness {
    orchestrator: ReconstructionOrchestrator,
    audit: Arc<MemoryAuditLogStore>,
    hsm: Arc<CountingHsm>,
    events: Arc<RecordingEventSink>,
    distribution: Distribution,
}

fn harness() -> Harness {
    let hsm = Arc::new(CountingHsm::new());
    let records = Arc::new(MemoryShardRecordStore::new());
    let backups = Arc::new(MemoryRecoveryBackupStore::new());
    let audit = Arc::new(MemoryAuditLogStore::new());
    let events = Arc::new(RecordingEventSink::new());
    let keyring = EnvelopeKeyring::new(SecretString::from("audit-master"));

    let distributor = ShardDistributor::new(
        CustodyConfig::default(),
        keyring.clone(),
        Arc::clone(&hsm) as Arc<dyn HsmClient>,
        Arc::clone(&records) as Arc<dyn ShardRecordStore>,
        backups as Arc<dyn RecoveryBackupStore>,
        Arc::clone(&events) as Arc<dyn EventSink>,
    )
    .unwrap();
    let orchestrator = ReconstructionOrchestrator::new(
        CustodyConfig::default(),
        keyring,
        Arc::clone(&hsm) as Arc<dyn HsmClient>,
        records as Arc<dyn ShardRecordStore>,
        Arc::clone(&audit) as Arc<dyn AuditLogStore>,
        Arc::clone(&events) as Arc<dyn EventSink>,
    )
    .unwrap();

    let distribution = distributor.create_and_distribute(PRIVATE_KEY, "u1").unwrap();

    Harness {
        orchestrator,
        audit,
        hsm,
        events,
        distribution,
    }
}

fn ctx() -> RequestContext {
    RequestContext {
        purpose: "transaction_signing".to_string(),
        ip_address: "203.0.113.99".to_string(),
        user_agent: "audit-tests".to_string(),
        device_id: "device-9".to_string(),
    }
}

fn now_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

fn backdated_entry(user_id: &str, timestamp: u64) -> ReconstructionLogEntry {
    ReconstructionLogEntry::new(
        user_id,
        1,
        vec![ShardType::Device, ShardType::Auth],
        &ctx(),
        false,
        Some("decryption failed".to_string()),
        timestamp,
    )
}

#[test]
fn wrong_arity_fails_before_any_hsm_call() {
    let h = harness();
    let baseline = h.hsm.call_count();

    // One shard.
    let result = h.orchestrator.reconstruct(
        "u1",
        vec![PresentedShard::Device {
            data: h.distribution.device_shard.data.clone(),
        }],
        &ctx(),
    );
    assert!(matches!(
        result,
        Err(CustodyError::InvalidShardCount {
            expected: 2,
            actual: 1
        })
    ));

    // Three shards.
    let result = h.orchestrator.reconstruct(
        "u1",
        vec![
            PresentedShard::Device {
                data: h.distribution.device_shard.data.clone(),
            },
            PresentedShard::Auth,
            PresentedShard::Recovery {
                envelope: "whatever".to_string(),
            },
        ],
        &ctx(),
    );
    assert!(matches!(
        result,
        Err(CustodyError::InvalidShardCount {
            expected: 2,
            actual: 3
        })
    ));

    assert_eq!(
        h.hsm.call_count(),
        baseline,
        "arity violations must not reach the HSM"
    );

    // Both rejected attempts are on the audit trail.
    let entries = h.audit.entries_for("u1");
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| !e.success));
    assert!(entries
        .iter()
        .all(|e| e.failure_reason.as_deref().unwrap().contains("shards")));
}

#[test]
fn rate_limited_request_does_no_shard_work() {
    let h = harness();
    let now = now_epoch();
    for i in 0..10u64 {
        h.audit.append(backdated_entry("u1", now - 60 - i)).unwrap();
    }
    let baseline = h.hsm.call_count();

    assert!(!h.orchestrator.can_reconstruct("u1").unwrap());
    let result = h.orchestrator.reconstruct_with_auth(
        "u1",
        &h.distribution.device_shard.data,
        &SecretString::from("session"),
        &ctx(),
    );
    assert!(matches!(
        result,
        Err(CustodyError::RateLimitExceeded { .. })
    ));

    assert_eq!(
        h.hsm.call_count(),
        baseline,
        "a rate-limited request must not reach the HSM"
    );
    assert_eq!(
        h.audit.entries_for("u1").len(),
        10,
        "a rate-limited request is not an attempt"
    );
}

#[test]
fn per_user_limits_are_independent() {
    let h = harness();
    let now = now_epoch();
    for i in 0..10u64 {
        h.audit.append(backdated_entry("u1", now - 60 - i)).unwrap();
    }

    assert!(!h.orchestrator.can_reconstruct("u1").unwrap());
    assert!(h.orchestrator.can_reconstruct("u2").unwrap());
}

#[test]
fn every_attempt_past_the_gate_is_audited() {
    let h = harness();

    // Success.
    h.orchestrator
        .reconstruct_with_auth(
            "u1",
            &h.distribution.device_shard.data,
            &SecretString::from("session"),
            &ctx(),
        )
        .unwrap();

    // Failure: garbage recovery envelope.
    let result = h.orchestrator.reconstruct_with_recovery(
        "u1",
        &h.distribution.device_shard.data,
        "garbage envelope",
        &ctx(),
    );
    assert!(matches!(result, Err(CustodyError::DecryptionFailure)));

    let entries = h.audit.entries_for("u1");
    assert_eq!(entries.len(), 2);
    assert!(entries[0].success);
    assert_eq!(entries[0].shards_used, vec![ShardType::Device, ShardType::Auth]);
    assert!(!entries[1].success);
    assert_eq!(
        entries[1].shards_used,
        vec![ShardType::Device, ShardType::Recovery]
    );
    assert_eq!(
        entries[1].failure_reason.as_deref(),
        Some("decryption failed")
    );

    // The failure also produced an event with the same reason.
    let failed_events: Vec<_> = h
        .events
        .events()
        .into_iter()
        .filter_map(|e| match e {
            keyshard_core::CustodyEvent::KeyReconstructionFailed { reason, .. } => Some(reason),
            _ => None,
        })
        .collect();
    assert_eq!(failed_events, vec!["decryption failed".to_string()]);
}

#[test]
fn successful_attempts_consume_the_budget() {
    let h = harness();

    // Default limit is 10; use up the budget with real successes.
    for _ in 0..10 {
        h.orchestrator
            .reconstruct_with_auth(
                "u1",
                &h.distribution.device_shard.data,
                &SecretString::from("session"),
                &ctx(),
            )
            .unwrap();
    }

    assert!(!h.orchestrator.can_reconstruct("u1").unwrap());
    let result = h.orchestrator.reconstruct_with_auth(
        "u1",
        &h.distribution.device_shard.data,
        &SecretString::from("session"),
        &ctx(),
    );
    assert!(matches!(
        result,
        Err(CustodyError::RateLimitExceeded { .. })
    ));
    assert_eq!(h.audit.entries_for("u1").len(), 10);
}
