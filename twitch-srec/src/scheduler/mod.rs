//! Channel scheduling over a bounded worker pool.

pub mod service;
pub mod worker_pool;

pub use service::{Scheduler, UnitMode};
pub use worker_pool::WorkerPool;
