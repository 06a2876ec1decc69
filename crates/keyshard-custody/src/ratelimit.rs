//! Per-user serialization for the rate-limited reconstruction path.
//!
//! The limit itself is a count over the audit log (trailing hour). Counting
//! and appending are two steps, so two concurrent requests could both pass
//! the count; the fix is a per-user mutex held from the count check through
//! the audit append. Locks are created on first use and kept for the
//! process lifetime — one small allocation per distinct user.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Trailing window the attempt limit is evaluated over.
pub const RATE_WINDOW_SECS: u64 = 3600;

#[derive(Default)]
pub struct UserLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The mutex serializing custody-critical sections for one user.
    pub fn lock_for(&self, user_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
