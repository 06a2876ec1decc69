//! Integration test: distribute → reconstruct round-trips.
//!
//! Covers the full custody pipeline with in-memory collaborators: split a
//! real 32-byte key, protect each shard per its policy, then recover the
//! key through every supported shard pairing and byte-compare the result.

use std::sync::Arc;

use rand::RngCore;
use secrecy::SecretString;

use keyshard_core::{CustodyConfig, RequestContext};
use keyshard_custody::{
    EventSink, HsmClient, MemoryAuditLogStore, MemoryHsm, MemoryRecoveryBackupStore,
    MemoryShardRecordStore, PresentedShard, ReconstructionOrchestrator, RecordingEventSink,
    RecoveryBackupStore, ShardDistributor, ShardRecordStore,
};
use keyshard_custody::{AuditLogStore, Distribution};
use keyshard_crypto::EnvelopeKeyring;

struct Harness {
    distributor: ShardDistributor,
    orchestrator: ReconstructionOrchestrator,
    backups: Arc<MemoryRecoveryBackupStore>,
}

fn harness() -> Harness {
    let hsm: Arc<dyn HsmClient> = Arc::new(MemoryHsm::new());
    let records = Arc::new(MemoryShardRecordStore::new());
    let backups = Arc::new(MemoryRecoveryBackupStore::new());
    let audit = Arc::new(MemoryAuditLogStore::new());
    let events = Arc::new(RecordingEventSink::new());
    let keyring = EnvelopeKeyring::new(SecretString::from("integration-master-secret"));

    let distributor = ShardDistributor::new(
        CustodyConfig::default(),
        keyring.clone(),
        Arc::clone(&hsm),
        Arc::clone(&records) as Arc<dyn ShardRecordStore>,
        Arc::clone(&backups) as Arc<dyn RecoveryBackupStore>,
        Arc::clone(&events) as Arc<dyn EventSink>,
    )
    .expect("distributor construction");
    let orchestrator = ReconstructionOrchestrator::new(
        CustodyConfig::default(),
        keyring,
        hsm,
        records as Arc<dyn ShardRecordStore>,
        audit as Arc<dyn AuditLogStore>,
        events as Arc<dyn EventSink>,
    )
    .expect("orchestrator construction");

    Harness {
        distributor,
        orchestrator,
        backups,
    }
}

fn ctx() -> RequestContext {
    RequestContext {
        purpose: "device_recovery".to_string(),
        ip_address: "198.51.100.4".to_string(),
        user_agent: "integration-tests".to_string(),
        device_id: "device-7".to_string(),
    }
}

fn random_key() -> Vec<u8> {
    let mut key = vec![0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut key);
    key
}

fn distribute(h: &Harness, key: &[u8], user_id: &str) -> Distribution {
    h.distributor
        .create_and_distribute(key, user_id)
        .expect("distribution")
}

#[test]
fn every_shard_pairing_recovers_the_key() {
    let h = harness();
    let private_key = random_key();
    let distribution = distribute(&h, &private_key, "alice");
    let recovery_envelope = h.backups.latest("alice").unwrap().encrypted_shard;

    // device + auth
    let via_auth = h
        .orchestrator
        .reconstruct_with_auth(
            "alice",
            &distribution.device_shard.data,
            &SecretString::from("session"),
            &ctx(),
        )
        .expect("device+auth pairing");
    assert_eq!(via_auth.expose(), private_key.as_slice());

    // device + recovery
    let via_recovery = h
        .orchestrator
        .reconstruct_with_recovery(
            "alice",
            &distribution.device_shard.data,
            &recovery_envelope,
            &ctx(),
        )
        .expect("device+recovery pairing");
    assert_eq!(via_recovery.expose(), private_key.as_slice());

    // auth + recovery, through the generic entry point
    let via_stored = h
        .orchestrator
        .reconstruct(
            "alice",
            vec![
                PresentedShard::Auth,
                PresentedShard::Recovery {
                    envelope: recovery_envelope,
                },
            ],
            &ctx(),
        )
        .expect("auth+recovery pairing");
    assert_eq!(via_stored.expose(), private_key.as_slice());
}

#[test]
fn reconstructed_handle_carries_ttl() {
    let h = harness();
    let private_key = random_key();
    let distribution = distribute(&h, &private_key, "alice");

    let key = h
        .orchestrator
        .reconstruct_with_auth(
            "alice",
            &distribution.device_shard.data,
            &SecretString::from("session"),
            &ctx(),
        )
        .unwrap();
    assert_eq!(key.ttl_secs, 300);
    assert!(!key.is_expired(), "a fresh handle must not be expired");
}

#[test]
fn empty_key_round_trips() {
    let h = harness();
    let distribution = distribute(&h, b"", "empty-user");

    let key = h
        .orchestrator
        .reconstruct_with_auth(
            "empty-user",
            &distribution.device_shard.data,
            &SecretString::from("session"),
            &ctx(),
        )
        .expect("empty key reconstruction");
    assert!(key.expose().is_empty());
}

#[test]
fn users_are_isolated() {
    let h = harness();
    let key_a = random_key();
    let key_b = random_key();
    let dist_a = distribute(&h, &key_a, "alice");
    distribute(&h, &key_b, "bob");

    // Alice's device shard cannot reconstruct against Bob's stored shards.
    let result = h.orchestrator.reconstruct_with_auth(
        "bob",
        &dist_a.device_shard.data,
        &SecretString::from("session"),
        &ctx(),
    );
    assert!(result.is_err(), "cross-user shard mixing must fail");

    // Bob's recovery envelope does not open under Alice's derived key.
    let bob_envelope = h.backups.latest("bob").unwrap().encrypted_shard;
    let result = h.orchestrator.reconstruct_with_recovery(
        "alice",
        &dist_a.device_shard.data,
        &bob_envelope,
        &ctx(),
    );
    assert!(result.is_err(), "cross-user envelope must fail closed");
}
