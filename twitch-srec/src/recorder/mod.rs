//! Per-channel recording supervision.

pub mod lock;
pub mod supervisor;

pub use lock::{FileLockGuard, LockAttempt};
pub use supervisor::{
    CycleOutcome, MAX_UNAUTHORIZED_RETRIES, RecordingSupervisor, UnitClaim, Wait,
};
