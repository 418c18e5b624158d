//! Shared job queue and drain bookkeeping.
//!
//! A single [`parking_lot::Mutex`] guards both the FIFO of waiting jobs and
//! the pending counter, so enqueue/dequeue and the "drained" transition are
//! observed atomically. Two condition variables hang off that lock:
//!
//! - `job_available`: idle workers wait here for a job or the stop signal.
//! - `all_done`: callers of [`JobQueue::wait_drained`] wait here for the
//!   pending counter to reach zero.
//!
//! The stop flag and the live-worker counter are atomics so they can be read
//! without taking the lock. The stop flag is only ever *set* while holding
//! the lock, which keeps a worker that has just checked its predicate from
//! missing the wakeup.

use crate::core::BoxedJob;
use crate::pool::worker::panic_message;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Default)]
struct QueueState {
    jobs: VecDeque<BoxedJob>,
    /// Jobs accepted and not yet completed, queued or running.
    pending: usize,
}

/// FIFO job queue shared between a pool and its workers.
pub(crate) struct JobQueue {
    state: Mutex<QueueState>,
    job_available: Condvar,
    all_done: Condvar,
    stop: AtomicBool,
    live_workers: AtomicUsize,
}

impl JobQueue {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            job_available: Condvar::new(),
            all_done: Condvar::new(),
            stop: AtomicBool::new(false),
            live_workers: AtomicUsize::new(0),
        }
    }

    /// Append a job and wake one idle worker.
    ///
    /// Once stop has been requested the job is handed back untouched so the
    /// caller can drop it outside the lock.
    pub(crate) fn push(&self, job: BoxedJob) -> Result<usize, BoxedJob> {
        let mut state = self.state.lock();
        if self.stop.load(Ordering::Acquire) {
            return Err(job);
        }
        state.jobs.push_back(job);
        state.pending += 1;
        let depth = state.jobs.len();
        drop(state);

        self.job_available.notify_one();
        Ok(depth)
    }

    /// Block until a job is available or stop is requested.
    ///
    /// Returns `None` once stop has been observed, even if jobs are still
    /// queued: those are discarded by [`JobQueue::discard_queued`].
    pub(crate) fn next_job(&self) -> Option<BoxedJob> {
        let mut state = self.state.lock();
        loop {
            if self.stop.load(Ordering::Acquire) {
                return None;
            }
            if let Some(job) = state.jobs.pop_front() {
                return Some(job);
            }
            self.job_available.wait(&mut state);
        }
    }

    /// Mark one dequeued job as finished, releasing drain waiters on zero.
    pub(crate) fn complete_job(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.pending > 0, "completed more jobs than were accepted");
        state.pending = state.pending.saturating_sub(1);
        if state.pending == 0 {
            self.all_done.notify_all();
        }
    }

    /// Block the caller until every accepted job has completed.
    pub(crate) fn wait_drained(&self) {
        let mut state = self.state.lock();
        while state.pending > 0 {
            self.all_done.wait(&mut state);
        }
    }

    /// Set the stop flag and wake every idle worker.
    ///
    /// Returns `true` for the call that actually flipped the flag.
    pub(crate) fn request_stop(&self) -> bool {
        let state = self.state.lock();
        let first = !self.stop.swap(true, Ordering::AcqRel);
        drop(state);

        self.job_available.notify_all();
        first
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Remove every job that was never picked up and release its pending slot.
    ///
    /// Only meaningful after stop; returns how many jobs were discarded. The
    /// jobs themselves are dropped after the lock is released, one at a
    /// time, with a panicking `Drop` logged and contained.
    pub(crate) fn discard_queued(&self) -> usize {
        let discarded = {
            let mut state = self.state.lock();
            let jobs = std::mem::take(&mut state.jobs);
            state.pending = state.pending.saturating_sub(jobs.len());
            if state.pending == 0 {
                self.all_done.notify_all();
            }
            jobs
        };

        let count = discarded.len();
        for job in discarded {
            let job_type = job.job_type().to_string();
            if let Err(panic_info) = catch_unwind(AssertUnwindSafe(move || drop(job))) {
                log::error!(
                    "discarded job {} panicked while dropping: {}",
                    job_type,
                    panic_message(&*panic_info)
                );
            }
        }
        count
    }

    pub(crate) fn pending(&self) -> usize {
        self.state.lock().pending
    }

    pub(crate) fn queued(&self) -> usize {
        self.state.lock().jobs.len()
    }

    pub(crate) fn worker_started(&self) {
        self.live_workers.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn worker_exited(&self) {
        self.live_workers.fetch_sub(1, Ordering::AcqRel);
    }

    pub(crate) fn live_workers(&self) -> usize {
        self.live_workers.load(Ordering::Acquire)
    }
}
