//! Worker thread implementation

use crate::core::{BoxedJob, Result, ThreadError};
use crate::pool::queue::JobQueue;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

#[cfg(feature = "tracing")]
use tracing::{debug, span, Level};

/// Statistics for a worker thread
#[derive(Debug, Default)]
pub struct WorkerStats {
    /// Total number of jobs that ran to completion
    pub jobs_processed: AtomicU64,
    /// Total number of jobs that panicked
    pub jobs_panicked: AtomicU64,
    /// Total time spent processing jobs (microseconds)
    pub total_processing_time_us: AtomicU64,
}

impl WorkerStats {
    /// Create new worker statistics
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment jobs processed counter
    pub fn increment_processed(&self) {
        self.jobs_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment jobs panicked counter
    pub fn increment_panicked(&self) {
        self.jobs_panicked.fetch_add(1, Ordering::Relaxed);
    }

    /// Add processing time
    pub fn add_processing_time(&self, microseconds: u64) {
        self.total_processing_time_us
            .fetch_add(microseconds, Ordering::Relaxed);
    }

    /// Get total jobs processed
    pub fn get_jobs_processed(&self) -> u64 {
        self.jobs_processed.load(Ordering::Relaxed)
    }

    /// Get total jobs panicked
    pub fn get_jobs_panicked(&self) -> u64 {
        self.jobs_panicked.load(Ordering::Relaxed)
    }

    /// Get average processing time per job in microseconds
    pub fn get_average_processing_time_us(&self) -> f64 {
        let total = self.total_processing_time_us.load(Ordering::Relaxed);
        let count = self.get_jobs_processed() + self.get_jobs_panicked();
        if count > 0 {
            total as f64 / count as f64
        } else {
            0.0
        }
    }
}

/// A worker thread that runs jobs from the pool's queue until stop is requested
#[derive(Debug)]
pub(crate) struct Worker {
    id: usize,
    thread: Option<thread::JoinHandle<()>>,
    stats: Arc<WorkerStats>,
}

impl Worker {
    /// Spawn a worker thread named `{name_prefix}-{id}`.
    ///
    /// The worker is counted as live before the thread starts, and leaves the
    /// count only when its run loop returns.
    pub(crate) fn spawn(
        id: usize,
        queue: Arc<JobQueue>,
        name_prefix: &str,
        stack_size: Option<usize>,
    ) -> Result<Self> {
        let stats = Arc::new(WorkerStats::new());
        let stats_clone = Arc::clone(&stats);

        let mut builder = thread::Builder::new().name(format!("{}-{}", name_prefix, id));
        if let Some(size) = stack_size {
            builder = builder.stack_size(size);
        }

        queue.worker_started();
        let run_queue = Arc::clone(&queue);
        let thread = builder
            .spawn(move || Self::run(id, run_queue, stats_clone))
            .map_err(|e| {
                queue.worker_exited();
                ThreadError::spawn_with_source(id, e.to_string(), e)
            })?;

        Ok(Self {
            id,
            thread: Some(thread),
            stats,
        })
    }

    /// Get worker ID
    pub(crate) fn id(&self) -> usize {
        self.id
    }

    /// Get worker statistics
    pub(crate) fn stats(&self) -> Arc<WorkerStats> {
        Arc::clone(&self.stats)
    }

    /// OS thread identity of this worker
    pub(crate) fn thread_id(&self) -> Option<ThreadId> {
        self.thread.as_ref().map(|t| t.thread().id())
    }

    /// Join the worker thread
    pub(crate) fn join(mut self) -> Result<()> {
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|panic_info| ThreadError::join(self.id, panic_message(&*panic_info)))?;
        }
        Ok(())
    }

    /// Main worker loop
    ///
    /// Runs jobs until the queue reports stop. Every dequeued job releases
    /// its pending slot whether it returned or panicked.
    fn run(id: usize, queue: Arc<JobQueue>, stats: Arc<WorkerStats>) {
        #[cfg(feature = "tracing")]
        let worker_span = span!(Level::DEBUG, "worker", id = id);
        #[cfg(feature = "tracing")]
        let _guard = worker_span.enter();

        log::debug!("worker {} started", id);

        let exit_guard = ExitGuard(&queue);
        while let Some(job) = queue.next_job() {
            let _completion = CompletionGuard(&queue);

            #[cfg(feature = "tracing")]
            crate::tracing::metrics::record_worker_busy(id);

            Self::execute_job(id, job, &stats);

            #[cfg(feature = "tracing")]
            crate::tracing::metrics::record_worker_idle(id);
        }
        drop(exit_guard);

        #[cfg(feature = "tracing")]
        debug!(
            jobs_processed = stats.get_jobs_processed(),
            jobs_panicked = stats.get_jobs_panicked(),
            "worker shutting down"
        );
        log::debug!(
            "worker {} exiting after {} jobs ({} panicked)",
            id,
            stats.get_jobs_processed(),
            stats.get_jobs_panicked()
        );
    }

    /// Execute a single job with panic protection
    ///
    /// The job is consumed inside the unwind boundary, so a panicking `Drop`
    /// is handled like a panicking `execute`.
    fn execute_job(id: usize, mut job: BoxedJob, stats: &WorkerStats) {
        #[cfg(feature = "tracing")]
        let job_span = span!(Level::DEBUG, "job_execution", job_type = job.job_type());
        #[cfg(feature = "tracing")]
        let _job_guard = job_span.enter();

        let job_type = job.job_type().to_string();
        let start = std::time::Instant::now();
        let panic_result = catch_unwind(AssertUnwindSafe(move || {
            job.execute();
            drop(job);
        }));
        let elapsed = start.elapsed();

        match panic_result {
            Ok(()) => {
                stats.increment_processed();
                #[cfg(feature = "tracing")]
                {
                    debug!(duration_ms = elapsed.as_millis() as u64, "job completed");
                    crate::tracing::metrics::record_completion(elapsed);
                }
            }
            Err(panic_info) => {
                let panic_msg = panic_message(&*panic_info);
                #[cfg(feature = "tracing")]
                {
                    tracing::error!(
                        panic_message = %panic_msg,
                        duration_ms = elapsed.as_millis() as u64,
                        "job panicked"
                    );
                    crate::tracing::metrics::record_panic(elapsed);
                }
                log::error!("worker {}: job {} panicked: {}", id, job_type, panic_msg);
                stats.increment_panicked();
            }
        }

        stats.add_processing_time(elapsed.as_micros() as u64);
    }
}

/// Releases the pending slot of the job being run, even while unwinding.
struct CompletionGuard<'a>(&'a JobQueue);

impl Drop for CompletionGuard<'_> {
    fn drop(&mut self) {
        self.0.complete_job();
    }
}

/// Takes the worker out of the live count on every exit path.
struct ExitGuard<'a>(&'a JobQueue);

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        self.0.worker_exited();
    }
}

pub(crate) fn panic_message(panic_info: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic_info.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic_info.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}
