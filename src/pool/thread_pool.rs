//! Thread pool implementation

use crate::core::{ClosureJob, Job, Result, ThreadError};
use crate::pool::queue::JobQueue;
use crate::pool::worker::{Worker, WorkerStats};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

/// Configuration for thread pool
#[derive(Debug, Clone)]
pub struct ThreadPoolConfig {
    /// Number of worker threads. Must be greater than zero.
    pub num_threads: usize,
    /// Thread name prefix; workers are named `{prefix}-{id}`
    pub thread_name_prefix: String,
    /// Stack size for worker threads (None = platform default)
    pub stack_size: Option<usize>,
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            num_threads: num_cpus::get(),
            thread_name_prefix: "worker".to_string(),
            stack_size: None,
        }
    }
}

impl ThreadPoolConfig {
    /// Create a new configuration with specified number of threads
    #[must_use]
    pub fn new(num_threads: usize) -> Self {
        Self {
            num_threads,
            ..Default::default()
        }
    }

    /// Set thread name prefix
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_thread_name_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Set the stack size of every worker thread, in bytes
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.num_threads == 0 {
            return Err(ThreadError::invalid_config(
                "num_threads",
                "Number of threads must be greater than 0",
            ));
        }
        if self.thread_name_prefix.is_empty() {
            return Err(ThreadError::invalid_config(
                "thread_name_prefix",
                "Thread name prefix must not be empty",
            ));
        }
        Ok(())
    }
}

/// Point-in-time snapshot of pool counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Number of worker threads the pool was built with
    pub num_threads: usize,
    /// Jobs accepted into the queue
    pub jobs_submitted: u64,
    /// Jobs that ran to completion
    pub jobs_completed: u64,
    /// Jobs that panicked while running
    pub jobs_panicked: u64,
    /// Jobs that were never run because the pool was shut down
    pub jobs_dropped: u64,
    /// Jobs accepted and not yet finished
    pub jobs_pending: usize,
    /// Workers still inside their run loop
    pub live_workers: usize,
}

/// A fixed-size pool of worker threads fed from a shared FIFO queue.
///
/// Workers start as soon as the pool is built. Jobs may be submitted from
/// any thread, including from inside a running job.
///
/// # Draining vs. joining
///
/// - [`wait_all`](Self::wait_all) blocks until every accepted job has
///   finished; the pool stays usable afterwards.
/// - [`join_all`](Self::join_all) stops the workers and joins them. It is
///   terminal and idempotent. Jobs submitted afterwards are dropped without
///   running.
///
/// Dropping the pool runs `join_all()`.
pub struct ThreadPool {
    config: ThreadPoolConfig,
    queue: Arc<JobQueue>,
    workers: Mutex<Vec<Worker>>,
    worker_stats: Vec<Arc<WorkerStats>>,
    worker_threads: Vec<ThreadId>,
    finished: AtomicBool,
    jobs_submitted: AtomicU64,
    jobs_dropped: AtomicU64,
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("config", &self.config)
            .field("stopping", &self.queue.is_stopped())
            .field("finished", &self.finished.load(Ordering::Relaxed))
            .field("jobs_pending", &self.queue.pending())
            .field("live_workers", &self.queue.live_workers())
            .finish()
    }
}

impl ThreadPool {
    /// Create a thread pool with `num_threads` workers
    pub fn new(num_threads: usize) -> Result<Self> {
        Self::with_config(ThreadPoolConfig::new(num_threads))
    }

    /// Create a thread pool with one worker per logical CPU
    pub fn with_default_threads() -> Result<Self> {
        Self::with_config(ThreadPoolConfig::default())
    }

    /// Create a thread pool with custom configuration
    ///
    /// If any worker fails to spawn, the workers already started are stopped
    /// and joined before the error is returned.
    pub fn with_config(config: ThreadPoolConfig) -> Result<Self> {
        config.validate()?;

        let queue = Arc::new(JobQueue::new());
        let mut workers = Vec::with_capacity(config.num_threads);
        for id in 0..config.num_threads {
            match Worker::spawn(
                id,
                Arc::clone(&queue),
                &config.thread_name_prefix,
                config.stack_size,
            ) {
                Ok(worker) => workers.push(worker),
                Err(e) => {
                    log::error!("failed to start worker {}: {}", id, e);
                    queue.request_stop();
                    for worker in workers {
                        let _ = worker.join();
                    }
                    return Err(e);
                }
            }
        }

        let worker_stats = workers.iter().map(Worker::stats).collect();
        let worker_threads = workers.iter().filter_map(Worker::thread_id).collect();

        #[cfg(feature = "tracing")]
        crate::tracing::metrics::record_pool_start(config.num_threads);
        log::debug!(
            "started pool '{}' with {} workers",
            config.thread_name_prefix,
            config.num_threads
        );

        Ok(Self {
            config,
            queue,
            workers: Mutex::new(workers),
            worker_stats,
            worker_threads,
            finished: AtomicBool::new(false),
            jobs_submitted: AtomicU64::new(0),
            jobs_dropped: AtomicU64::new(0),
        })
    }

    /// Submit a job to the pool
    ///
    /// Never fails. A job submitted after [`join_all`](Self::join_all) has
    /// started is dropped without running; use
    /// [`try_submit`](Self::try_submit) to be told about it.
    pub fn submit<J: Job + 'static>(&self, job: J) {
        if let Err(e) = self.try_submit(job) {
            log::warn!(
                "pool '{}': dropping job submitted after shutdown ({})",
                self.config.thread_name_prefix,
                e
            );
        }
    }

    /// Submit a closure as a job
    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(ClosureJob::new(f))
    }

    /// Submit a job, reporting a pool that no longer accepts work.
    ///
    /// # Errors
    ///
    /// - `ThreadError::ShutDown` - the pool is stopping or finished; the job
    ///   was dropped without running
    pub fn try_submit<J: Job + 'static>(&self, job: J) -> Result<()> {
        match self.queue.push(Box::new(job)) {
            Ok(_depth) => {
                self.jobs_submitted.fetch_add(1, Ordering::Relaxed);
                #[cfg(feature = "tracing")]
                crate::tracing::metrics::record_submission(_depth);
                Ok(())
            }
            Err(job) => {
                self.jobs_dropped.fetch_add(1, Ordering::Relaxed);
                drop(job);
                Err(ThreadError::ShutDown)
            }
        }
    }

    /// Submit a closure, reporting a pool that no longer accepts work.
    ///
    /// # Errors
    ///
    /// - `ThreadError::ShutDown` - the pool is stopping or finished
    pub fn try_execute<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.try_submit(ClosureJob::new(f))
    }

    /// Submit a job that runs inside the caller's current tracing span
    #[cfg(feature = "tracing")]
    pub fn submit_traced<J: Job + 'static>(&self, job: J) {
        self.submit(crate::tracing::TracedJob::new(job))
    }

    /// Get the number of worker threads
    pub fn size(&self) -> usize {
        self.config.num_threads
    }

    /// Jobs accepted and not yet finished, queued or running.
    ///
    /// A snapshot; it may change as soon as it is returned.
    pub fn jobs_pending(&self) -> usize {
        self.queue.pending()
    }

    /// Jobs waiting in the queue for a worker
    pub fn jobs_queued(&self) -> usize {
        self.queue.queued()
    }

    /// Workers that have not yet left their run loop
    pub fn live_workers(&self) -> usize {
        self.queue.live_workers()
    }

    /// Check whether [`join_all`](Self::join_all) has completed
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Get statistics for all workers
    pub fn worker_stats(&self) -> &[Arc<WorkerStats>] {
        &self.worker_stats
    }

    /// Get a snapshot of the pool counters
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            num_threads: self.config.num_threads,
            jobs_submitted: self.jobs_submitted.load(Ordering::Relaxed),
            jobs_completed: self
                .worker_stats
                .iter()
                .map(|s| s.get_jobs_processed())
                .sum(),
            jobs_panicked: self
                .worker_stats
                .iter()
                .map(|s| s.get_jobs_panicked())
                .sum(),
            jobs_dropped: self.jobs_dropped.load(Ordering::Relaxed),
            jobs_pending: self.queue.pending(),
            live_workers: self.queue.live_workers(),
        }
    }

    /// Block until every accepted job has finished.
    ///
    /// The workers keep running and the pool keeps accepting jobs. Any number
    /// of threads may wait at once; they are all released when the pending
    /// count reaches zero. Returns immediately on a drained or finished pool.
    ///
    /// Calling this from inside a job of the same pool never returns, since
    /// the calling job is itself pending.
    pub fn wait_all(&self) {
        self.queue.wait_drained();
    }

    /// Wait for all jobs, then stop and join every worker.
    ///
    /// Equivalent to `join_all_with(true)`.
    pub fn join_all(&self) -> Result<()> {
        self.join_all_with(true)
    }

    /// Stop and join every worker.
    ///
    /// With `wait_for_all` the call first blocks like [`wait_all`](Self::wait_all).
    /// Without it, workers finish the job they are running and exit; jobs
    /// still queued are dropped without running.
    ///
    /// Idempotent: once the pool is finished further calls return `Ok(())`
    /// immediately. Concurrent callers block until the first one is done.
    ///
    /// # Errors
    ///
    /// - `ThreadError::ShutdownFromWorker` - called from one of this pool's
    ///   own workers
    /// - `ThreadError::JoinError` - a worker thread panicked outside a job;
    ///   the remaining workers are still joined
    pub fn join_all_with(&self, wait_for_all: bool) -> Result<()> {
        if self.is_finished() {
            return Ok(());
        }
        if self.is_worker_thread() {
            return Err(ThreadError::ShutdownFromWorker);
        }

        let mut workers = self.workers.lock();
        if self.is_finished() {
            return Ok(());
        }

        if wait_for_all {
            self.queue.wait_drained();
        }
        self.queue.request_stop();

        let mut first_error = None;
        for worker in workers.drain(..) {
            let id = worker.id();
            if let Err(e) = worker.join() {
                log::error!("worker {} failed to join: {}", id, e);
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        let discarded = self.queue.discard_queued();
        if discarded > 0 {
            self.jobs_dropped
                .fetch_add(discarded as u64, Ordering::Relaxed);
            log::debug!("discarded {} queued jobs at shutdown", discarded);
        }

        self.finished.store(true, Ordering::Release);

        #[cfg(feature = "tracing")]
        {
            let stats = self.stats();
            crate::tracing::metrics::record_pool_shutdown(
                stats.jobs_completed,
                stats.jobs_panicked,
                stats.jobs_dropped,
            );
        }
        log::debug!("pool '{}' joined", self.config.thread_name_prefix);

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn is_worker_thread(&self) -> bool {
        let current = thread::current().id();
        self.worker_threads.contains(&current)
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        match self.join_all() {
            Ok(()) => {}
            Err(ThreadError::ShutdownFromWorker) => {
                // Last handle dropped inside a job: let the other workers
                // exit on their own and detach them. Queued jobs will never
                // run, so release them now.
                self.queue.request_stop();
                let discarded = self.queue.discard_queued();
                self.jobs_dropped
                    .fetch_add(discarded as u64, Ordering::Relaxed);
                log::warn!(
                    "pool '{}' dropped from its own worker; {} queued jobs dropped, workers detached",
                    self.config.thread_name_prefix,
                    discarded
                );
            }
            Err(e) => {
                log::error!(
                    "failed to shut down pool '{}' during drop: {}",
                    self.config.thread_name_prefix,
                    e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn counting_job(counter: &Arc<AtomicUsize>) -> impl FnOnce() + Send + 'static {
        let counter = Arc::clone(counter);
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_thread_pool_creation() {
        let pool = ThreadPool::new(4).expect("Failed to create thread pool");
        assert_eq!(pool.size(), 4);
        assert_eq!(pool.jobs_pending(), 0);
        assert!(!pool.is_finished());

        pool.join_all().expect("Failed to join pool");
        assert!(pool.is_finished());
        assert_eq!(pool.live_workers(), 0);
        assert_eq!(pool.size(), 4);
    }

    #[test]
    fn test_default_threads() {
        let pool = ThreadPool::with_default_threads().expect("Failed to create thread pool");
        assert_eq!(pool.size(), num_cpus::get());
    }

    #[test]
    fn test_zero_threads_rejected() {
        let result = ThreadPool::new(0);
        assert!(matches!(
            result,
            Err(ThreadError::InvalidConfig { ref parameter, .. }) if parameter == "num_threads"
        ));
    }

    #[test]
    fn test_empty_prefix_rejected() {
        let config = ThreadPoolConfig::new(2).with_thread_name_prefix("");
        assert!(matches!(
            config.validate(),
            Err(ThreadError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_config_builder() {
        let config = ThreadPoolConfig::new(3)
            .with_thread_name_prefix("io")
            .with_stack_size(512 * 1024);
        assert_eq!(config.num_threads, 3);
        assert_eq!(config.thread_name_prefix, "io");
        assert_eq!(config.stack_size, Some(512 * 1024));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_job_execution() {
        let pool = ThreadPool::new(2).expect("Failed to create thread pool");
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..10 {
            pool.execute(counting_job(&counter));
        }
        pool.wait_all();

        assert_eq!(counter.load(Ordering::SeqCst), 10);
        assert_eq!(pool.jobs_pending(), 0);
        assert_eq!(pool.stats().jobs_submitted, 10);
        assert_eq!(pool.stats().jobs_completed, 10);
    }

    #[test]
    fn test_pending_counts_running_job() {
        let pool = ThreadPool::new(1).expect("Failed to create thread pool");
        let (started_tx, started_rx) = crossbeam_channel::bounded(1);
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);

        pool.execute(move || {
            started_tx.send(()).expect("test alive");
            let _ = done_rx.recv();
        });
        started_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("First job should start within 5 seconds");

        pool.execute(|| {});
        assert_eq!(pool.jobs_pending(), 2);
        assert_eq!(pool.jobs_queued(), 1);

        done_tx.send(()).expect("job alive");
        pool.wait_all();
        assert_eq!(pool.jobs_pending(), 0);
        assert_eq!(pool.jobs_queued(), 0);
    }

    #[test]
    fn test_join_without_wait_drops_queued_jobs() {
        let pool = ThreadPool::new(1).expect("Failed to create thread pool");
        let counter = Arc::new(AtomicUsize::new(0));
        let (started_tx, started_rx) = crossbeam_channel::bounded(1);
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);

        pool.execute(move || {
            started_tx.send(()).expect("test alive");
            let _ = done_rx.recv();
        });
        started_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("First job should start within 5 seconds");

        for _ in 0..5 {
            pool.execute(counting_job(&counter));
        }

        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            done_tx.send(()).expect("job alive");
        });
        pool.join_all_with(false).expect("Failed to join pool");
        releaser.join().expect("releaser panicked");

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(pool.jobs_pending(), 0);
        let stats = pool.stats();
        assert_eq!(stats.jobs_completed, 1);
        assert_eq!(stats.jobs_dropped, 5);
    }

    #[test]
    fn test_submit_after_join_is_dropped() {
        let pool = ThreadPool::new(2).expect("Failed to create thread pool");
        let counter = Arc::new(AtomicUsize::new(0));

        pool.join_all().expect("Failed to join pool");
        pool.execute(counting_job(&counter));
        assert!(matches!(
            pool.try_execute(counting_job(&counter)),
            Err(ThreadError::ShutDown)
        ));

        pool.wait_all();
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(pool.jobs_pending(), 0);
        assert_eq!(pool.stats().jobs_dropped, 2);
    }

    #[test]
    fn test_dropped_job_is_released() {
        let pool = ThreadPool::new(1).expect("Failed to create thread pool");
        pool.join_all().expect("Failed to join pool");

        let captured = Arc::new(());
        let job_copy = Arc::clone(&captured);
        pool.execute(move || drop(job_copy));

        assert_eq!(Arc::strong_count(&captured), 1);
    }

    #[test]
    fn test_join_all_is_idempotent() {
        let pool = ThreadPool::new(3).expect("Failed to create thread pool");
        pool.join_all().expect("first join");
        pool.join_all().expect("second join");
        pool.join_all_with(false).expect("third join");
        assert!(pool.is_finished());
    }

    #[test]
    fn test_concurrent_join_all() {
        let pool = Arc::new(ThreadPool::new(4).expect("Failed to create thread pool"));
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..50 {
            pool.execute(counting_job(&counter));
        }

        let joiners: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    pool.join_all().expect("join");
                    pool.is_finished()
                })
            })
            .collect();

        for joiner in joiners {
            assert!(joiner.join().expect("joiner panicked"));
        }
        assert_eq!(counter.load(Ordering::SeqCst), 50);
    }

    #[test]
    fn test_join_from_worker_is_rejected() {
        let pool = Arc::new(ThreadPool::new(2).expect("Failed to create thread pool"));
        let (tx, rx) = crossbeam_channel::bounded(1);

        let inner = Arc::clone(&pool);
        pool.execute(move || {
            tx.send(inner.join_all()).expect("test alive");
        });

        let result = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("job should run");
        assert!(matches!(result, Err(ThreadError::ShutdownFromWorker)));

        pool.join_all().expect("Failed to join pool");
    }

    #[test]
    fn test_jobs_can_submit_jobs() {
        let pool = Arc::new(ThreadPool::new(2).expect("Failed to create thread pool"));
        let counter = Arc::new(AtomicUsize::new(0));

        let inner_pool = Arc::clone(&pool);
        let inner_counter = Arc::clone(&counter);
        pool.execute(move || {
            for _ in 0..5 {
                inner_pool.execute(counting_job(&inner_counter));
            }
        });

        pool.wait_all();
        assert_eq!(counter.load(Ordering::SeqCst), 5);
        pool.join_all().expect("Failed to join pool");
    }

    #[test]
    fn test_panicking_job_does_not_block_drain() {
        let pool = ThreadPool::new(2).expect("Failed to create thread pool");
        let counter = Arc::new(AtomicUsize::new(0));

        pool.execute(|| panic!("job failure"));
        for _ in 0..4 {
            pool.execute(counting_job(&counter));
        }
        pool.wait_all();

        assert_eq!(counter.load(Ordering::SeqCst), 4);
        let stats = pool.stats();
        assert_eq!(stats.jobs_panicked, 1);
        assert_eq!(stats.jobs_completed, 4);
        assert_eq!(stats.live_workers, 2);
    }

    #[test]
    fn test_worker_stats() {
        let pool = ThreadPool::new(3).expect("Failed to create thread pool");
        for _ in 0..30 {
            pool.execute(|| {});
        }
        pool.join_all().expect("Failed to join pool");

        assert_eq!(pool.worker_stats().len(), 3);
        let total: u64 = pool
            .worker_stats()
            .iter()
            .map(|s| s.get_jobs_processed())
            .sum();
        assert_eq!(total, 30);
    }

    #[test]
    fn test_drop_joins_workers() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let pool = ThreadPool::new(4).expect("Failed to create thread pool");
            for _ in 0..20 {
                pool.execute(counting_job(&counter));
            }
        }
        assert_eq!(counter.load(Ordering::SeqCst), 20);
    }

    #[test]
    fn test_last_handle_dropped_in_worker_detaches() {
        let pool = Arc::new(ThreadPool::new(1).expect("Failed to create thread pool"));
        let queue = Arc::clone(&pool.queue);
        let counter = Arc::new(AtomicUsize::new(0));
        let (handle_tx, handle_rx) = crossbeam_channel::bounded::<Arc<ThreadPool>>(1);
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);

        pool.execute(move || {
            let last = handle_rx.recv().expect("pool handle sent");
            drop(last);
            done_tx.send(()).expect("test alive");
        });
        for _ in 0..3 {
            pool.execute(counting_job(&counter));
        }
        assert_eq!(Arc::strong_count(&pool), 1);
        handle_tx.send(pool).expect("job alive");

        done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("job dropping the pool should complete");
        assert!(queue.is_stopped());

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while queue.live_workers() > 0 {
            assert!(
                std::time::Instant::now() < deadline,
                "detached worker did not exit"
            );
            thread::sleep(Duration::from_millis(5));
        }

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(queue.queued(), 0);
        assert_eq!(queue.pending(), 0);
    }

    struct PanicOnDrop;

    impl Job for PanicOnDrop {
        fn execute(&mut self) {}
    }

    impl Drop for PanicOnDrop {
        fn drop(&mut self) {
            panic!("PanicOnDrop dropped");
        }
    }

    #[test]
    fn test_panicking_drop_does_not_block_drain() {
        let pool = Arc::new(ThreadPool::new(1).expect("Failed to create thread pool"));
        let counter = Arc::new(AtomicUsize::new(0));

        pool.submit(PanicOnDrop);
        pool.execute(counting_job(&counter));

        let (tx, rx) = crossbeam_channel::bounded(1);
        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                pool.wait_all();
                tx.send(()).expect("test alive");
            })
        };
        rx.recv_timeout(Duration::from_secs(5))
            .expect("wait_all should return after a panicking drop");
        waiter.join().expect("waiter panicked");

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        let stats = pool.stats();
        assert_eq!(stats.jobs_panicked, 1);
        assert_eq!(stats.jobs_completed, 1);
        assert_eq!(stats.live_workers, 1);

        pool.join_all().expect("Failed to join pool");
        assert_eq!(pool.live_workers(), 0);
    }
}
