pub mod config;
pub mod error;
pub mod types;

pub use config::CustodyConfig;
pub use error::{CustodyError, CustodyResult, HsmError};
pub use types::{
    CustodyEvent, KeyShard, ReconstructedKey, ReconstructionLogEntry, RecoveryBackup,
    RequestContext, ShardPresence, ShardRecord, ShardStatus, ShardType, ShardsSummary,
};
