use thiserror::Error;

use crate::types::ShardType;

pub type CustodyResult<T> = Result<T, CustodyError>;

/// Failures reported by an HSM backend.
///
/// Transport problems (unavailable, timeout) are kept distinct from bad
/// ciphertext so callers can tell "the vault is down" apart from "this shard
/// is wrong".
#[derive(Debug, Error)]
pub enum HsmError {
    #[error("HSM unavailable: {0}")]
    Unavailable(String),

    #[error("HSM request timed out: {0}")]
    Timeout(String),

    #[error("HSM rejected ciphertext")]
    InvalidCiphertext,
}

#[derive(Debug, Error)]
pub enum CustodyError {
    #[error("reconstruction rate limit exceeded for user {user_id}")]
    RateLimitExceeded { user_id: String },

    #[error("no active {shard_type} shard for user {user_id}")]
    ShardNotFound {
        user_id: String,
        shard_type: ShardType,
    },

    #[error("expected {expected} shards, got {actual}")]
    InvalidShardCount { expected: usize, actual: usize },

    #[error("invalid shard format: {0}")]
    InvalidShardFormat(String),

    /// Deliberately carries no detail: the envelope length check, base64
    /// decode, and GCM tag verification must be indistinguishable to the
    /// caller.
    #[error("decryption failed")]
    DecryptionFailure,

    #[error("reconstruction failed: {0}")]
    ReconstructionFailure(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("session rejected")]
    SessionRejected,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("HSM error: {0}")]
    Hsm(#[from] HsmError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decryption_failure_message_is_uniform() {
        // The message must not reveal which check failed.
        assert_eq!(CustodyError::DecryptionFailure.to_string(), "decryption failed");
    }

    #[test]
    fn test_hsm_error_converts() {
        let err: CustodyError = HsmError::Timeout("retrieve".into()).into();
        assert!(matches!(err, CustodyError::Hsm(HsmError::Timeout(_))));
    }
}
