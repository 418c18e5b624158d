//! Thread pool, worker and shared queue implementations

mod queue;
pub mod thread_pool;
pub mod worker;

pub use thread_pool::{PoolStats, ThreadPool, ThreadPoolConfig};
pub use worker::WorkerStats;
