/*
 * Job Scheduler
 *
 * Jobs are opaque units of work: a fact reaching a statement, a feasibility
 * continuation, a released rendezvous job. The engine places no ordering
 * requirement on execution beyond data dependencies, so both a deterministic
 * FIFO drain and a rayon thread-pool scheduler satisfy the contract.
 *
 * Panics inside jobs are the job-failure channel: the first one is captured,
 * the run stops admitting work, and run_and_await_completion surfaces it.
 */

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::error::SolverError;

/// A unit of work submitted to the scheduler. Re-entrant: jobs may schedule
/// further jobs.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

pub trait Scheduler: Send + Sync {
    /// Enqueue a job. Never executes it inline.
    fn schedule(&self, job: Job);

    /// Run until global quiescence (no pending jobs), or until the first job
    /// failure.
    fn run_and_await_completion(&self) -> Result<(), SolverError>;
}

fn panic_text(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Deterministic single-threaded FIFO scheduler.
///
/// `schedule` only enqueues; `run_and_await_completion` drains in submission
/// order. This is the scheduler the scenario tests use: results are
/// identical to a threaded run because the engine's dedup and resolver
/// protocols are order-independent.
pub struct QueueScheduler {
    queue: Mutex<VecDeque<Job>>,
}

impl QueueScheduler {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
        }
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }
}

impl Default for QueueScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for QueueScheduler {
    fn schedule(&self, job: Job) {
        self.queue.lock().push_back(job);
    }

    fn run_and_await_completion(&self) -> Result<(), SolverError> {
        loop {
            let job = self.queue.lock().pop_front();
            match job {
                Some(job) => {
                    if let Err(payload) = catch_unwind(AssertUnwindSafe(job)) {
                        self.queue.lock().clear();
                        return Err(SolverError::JobFailure(panic_text(payload)));
                    }
                }
                None => return Ok(()),
            }
        }
    }
}

struct ThreadedState {
    pending: usize,
    failure: Option<String>,
}

/// Multi-threaded scheduler over a rayon pool with a quiescence latch.
///
/// A pending counter is incremented on schedule and decremented when the job
/// finishes; run_and_await_completion blocks on a condvar until the counter
/// reaches zero. Jobs scheduled from inside a running job raise the counter
/// before their parent releases it, so the latch cannot fire early.
pub struct ThreadedScheduler {
    pool: rayon::ThreadPool,
    state: Arc<Mutex<ThreadedState>>,
    quiescent: Arc<Condvar>,
}

impl ThreadedScheduler {
    pub fn new(num_threads: usize) -> Self {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()
            .expect("failed to build analysis thread pool");
        Self {
            pool,
            state: Arc::new(Mutex::new(ThreadedState {
                pending: 0,
                failure: None,
            })),
            quiescent: Arc::new(Condvar::new()),
        }
    }
}

impl Scheduler for ThreadedScheduler {
    fn schedule(&self, job: Job) {
        {
            let mut state = self.state.lock();
            if state.failure.is_some() {
                // Run already failed; drop new work.
                return;
            }
            state.pending += 1;
        }
        let state = Arc::clone(&self.state);
        let quiescent = Arc::clone(&self.quiescent);
        self.pool.spawn(move || {
            let outcome = catch_unwind(AssertUnwindSafe(job));
            let mut guard = state.lock();
            if let Err(payload) = outcome {
                if guard.failure.is_none() {
                    guard.failure = Some(panic_text(payload));
                }
            }
            guard.pending -= 1;
            if guard.pending == 0 {
                quiescent.notify_all();
            }
        });
    }

    fn run_and_await_completion(&self) -> Result<(), SolverError> {
        let mut state = self.state.lock();
        while state.pending > 0 {
            self.quiescent.wait(&mut state);
        }
        match state.failure.take() {
            Some(msg) => Err(SolverError::JobFailure(msg)),
            None => Ok(()),
        }
    }
}
