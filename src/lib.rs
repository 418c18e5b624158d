//! # Drain Pool
//!
//! A fixed-size worker thread pool with a shared FIFO job queue, a blocking
//! drain wait and an idempotent, terminal join.
//!
//! ## Features
//!
//! - **Fixed Workers**: N OS threads started at construction, joined exactly once
//! - **FIFO Queue**: Jobs are dequeued in submission order
//! - **Drain Waiting**: `wait_all` blocks until every accepted job has finished
//! - **Terminal Join**: `join_all` stops and joins the workers; also run on drop
//! - **Panic Isolation**: A panicking job is logged and counted, the worker survives
//! - **Statistics**: Pool-wide and per-worker counters
//!
//! ## Quick Start
//!
//! ```rust
//! use drain_pool::prelude::*;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<()> {
//! let pool = ThreadPool::new(4)?;
//! let counter = Arc::new(AtomicUsize::new(0));
//!
//! for _ in 0..10 {
//!     let counter = Arc::clone(&counter);
//!     pool.execute(move || {
//!         counter.fetch_add(1, Ordering::SeqCst);
//!     });
//! }
//!
//! // Wait for the queue to drain; the pool stays usable
//! pool.wait_all();
//! assert_eq!(counter.load(Ordering::SeqCst), 10);
//!
//! // Stop and join the workers
//! pool.join_all()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Thread Pool Configuration
//!
//! ```rust
//! use drain_pool::prelude::*;
//!
//! # fn main() -> Result<()> {
//! let config = ThreadPoolConfig::new(8)
//!     .with_thread_name_prefix("my-worker")
//!     .with_stack_size(1024 * 1024);
//!
//! let pool = ThreadPool::with_config(config)?;
//! assert_eq!(pool.size(), 8);
//! # Ok(())
//! # }
//! ```
//!
//! ## Custom Jobs
//!
//! ```rust
//! use drain_pool::prelude::*;
//!
//! struct MyJob {
//!     data: String,
//! }
//!
//! impl Job for MyJob {
//!     fn execute(&mut self) {
//!         println!("Processing: {}", self.data);
//!     }
//!
//!     fn job_type(&self) -> &str {
//!         "MyJob"
//!     }
//! }
//!
//! # fn main() -> Result<()> {
//! # let pool = ThreadPool::new(2)?;
//! pool.submit(MyJob {
//!     data: "test".to_string(),
//! });
//! # pool.join_all()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## After Shutdown
//!
//! ```rust
//! use drain_pool::prelude::*;
//!
//! # fn main() -> Result<()> {
//! let pool = ThreadPool::new(2)?;
//! pool.join_all()?;
//!
//! // Dropped without running
//! pool.execute(|| unreachable!());
//! assert!(matches!(pool.try_execute(|| {}), Err(ThreadError::ShutDown)));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod core;
pub mod pool;
pub mod prelude;
pub mod tracing;

pub use crate::core::{BoxedJob, ClosureJob, Job, Result, ThreadError};
pub use crate::pool::{PoolStats, ThreadPool, ThreadPoolConfig, WorkerStats};
