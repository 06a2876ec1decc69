//! Custody event emission.
//!
//! Events are fire-and-forget: emission must never fail the operation that
//! produced them, and delivery semantics (bus, queue, webhook) belong to
//! the embedding application.

use std::sync::Mutex;

use tracing::{info, warn};

use keyshard_core::types::CustodyEvent;

pub trait EventSink: Send + Sync {
    fn emit(&self, event: &CustodyEvent);
}

/// Emits events as structured log lines. The default sink when no bus is
/// wired up.
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &CustodyEvent) {
        match event {
            CustodyEvent::KeyShardsCreated {
                user_id,
                key_version,
            } => {
                info!(user_id = %user_id, key_version, "key shards created");
            }
            CustodyEvent::KeyShardsRotated {
                user_id,
                old_key_version,
                new_key_version,
            } => {
                info!(
                    user_id = %user_id,
                    old_key_version,
                    new_key_version,
                    "key shards rotated"
                );
            }
            CustodyEvent::KeyReconstructed {
                user_id, purpose, ..
            } => {
                info!(user_id = %user_id, purpose = %purpose, "key reconstructed");
            }
            CustodyEvent::KeyReconstructionFailed {
                user_id,
                purpose,
                reason,
            } => {
                warn!(
                    user_id = %user_id,
                    purpose = %purpose,
                    reason = %reason,
                    "key reconstruction failed"
                );
            }
        }
    }
}

/// Collects events in memory so tests can assert on what was emitted.
#[derive(Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<CustodyEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<CustodyEvent> {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: &CustodyEvent) {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(event.clone());
    }
}
