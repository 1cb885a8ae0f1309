//! Shared bounded worker pool for tile jobs.
//!
//! One [`JobDispatcher`] is created at startup and handed (by cheap clone) to
//! every loader and controller in the process. It runs at most
//! `concurrency` jobs at a time on plain OS threads; jobs are blocking I/O
//! (HTTP reads, SQLite lookups) so no async runtime is involved.
//!
//! Workers are spawned on demand up to the configured concurrency and live
//! until [`JobDispatcher::shutdown`] or until the pool is shrunk below them.
//! A job that panics is logged and counted as completed; its worker keeps
//! serving.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use tilefetch::dispatcher::{FnJob, JobDispatcher};
//!
//! let dispatcher = JobDispatcher::new(2);
//! dispatcher.execute(Box::new(FnJob::new("hello", || println!("hello"))));
//! assert!(dispatcher.wait_until_idle(Duration::from_secs(5)));
//! dispatcher.shutdown();
//! ```

mod job;

pub use job::{FnJob, Job};

use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, error, warn};

/// Default number of concurrent workers.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Point-in-time dispatcher counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatcherStats {
    /// Jobs handed to `execute`.
    pub submitted: u64,
    /// Jobs that ran to the end (including ones that panicked).
    pub completed: u64,
    /// Jobs dropped before a worker picked them up.
    pub cancelled: u64,
    /// Jobs waiting for a worker.
    pub queued: usize,
    /// Jobs currently running.
    pub active: usize,
    /// Live worker threads.
    pub workers: usize,
    /// Configured maximum number of workers.
    pub concurrency: usize,
}

struct State {
    queue: VecDeque<Box<dyn Job>>,
    target: usize,
    workers: usize,
    idle: usize,
    active: usize,
    submitted: u64,
    completed: u64,
    cancelled: u64,
    next_worker_id: u64,
    shutdown: bool,
}

impl State {
    fn is_drained(&self) -> bool {
        self.submitted == self.completed + self.cancelled
    }

    /// Reserve ids for any workers needed to serve the current queue.
    fn reserve_workers(&mut self) -> Vec<u64> {
        let waiting = self.queue.len().saturating_sub(self.idle);
        let room = self.target.saturating_sub(self.workers);
        (0..waiting.min(room))
            .map(|_| {
                self.workers += 1;
                self.next_worker_id += 1;
                self.next_worker_id
            })
            .collect()
    }
}

struct Shared {
    state: Mutex<State>,
    work_available: Condvar,
    drained: Condvar,
}

/// Handle to the shared worker pool. Clones share the same pool.
#[derive(Clone)]
pub struct JobDispatcher {
    shared: Arc<Shared>,
}

impl Default for JobDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY)
    }
}

impl JobDispatcher {
    /// Create a pool running at most `concurrency` jobs at once (minimum 1).
    pub fn new(concurrency: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    target: concurrency.max(1),
                    workers: 0,
                    idle: 0,
                    active: 0,
                    submitted: 0,
                    completed: 0,
                    cancelled: 0,
                    next_worker_id: 0,
                    shutdown: false,
                }),
                work_available: Condvar::new(),
                drained: Condvar::new(),
            }),
        }
    }

    /// Queue a job. Never blocks on the job itself.
    ///
    /// After [`shutdown`](Self::shutdown) the job is dropped and counted as
    /// cancelled.
    pub fn execute(&self, job: Box<dyn Job>) {
        let name = job.name();
        let mut state = self.shared.state.lock();
        state.submitted += 1;

        if state.shutdown {
            state.cancelled += 1;
            self.shared.drained.notify_all();
            drop(state);
            warn!(job = %name, "Dispatcher is shut down, dropping job");
            return;
        }

        state.queue.push_back(job);
        let spawn = state.reserve_workers();
        drop(state);

        self.shared.work_available.notify_one();
        for id in spawn {
            self.spawn_worker(id);
        }
        debug!(job = %name, "Job queued");
    }

    /// Returns true while any submitted job has neither completed nor been
    /// cancelled.
    pub fn has_outstanding_tasks(&self) -> bool {
        !self.shared.state.lock().is_drained()
    }

    /// Drop every job that has not started yet and return how many were
    /// dropped. Running jobs are not interrupted.
    pub fn cancel_outstanding_tasks(&self) -> usize {
        let dropped: Vec<Box<dyn Job>> = {
            let mut state = self.shared.state.lock();
            let dropped: Vec<_> = state.queue.drain(..).collect();
            state.cancelled += dropped.len() as u64;
            if state.is_drained() {
                self.shared.drained.notify_all();
            }
            dropped
        };

        let count = dropped.len();
        if count > 0 {
            debug!(count, "Cancelled queued jobs");
        }
        count
    }

    /// Change the maximum number of concurrent workers (minimum 1).
    ///
    /// Growing spawns workers for any queued work; shrinking retires workers
    /// as they become idle.
    pub fn set_concurrency(&self, concurrency: usize) {
        let concurrency = concurrency.max(1);
        let spawn = {
            let mut state = self.shared.state.lock();
            state.target = concurrency;
            state.reserve_workers()
        };
        self.shared.work_available.notify_all();
        for id in spawn {
            self.spawn_worker(id);
        }
        debug!(concurrency, "Dispatcher concurrency changed");
    }

    /// Configured maximum number of concurrent workers.
    pub fn concurrency(&self) -> usize {
        self.shared.state.lock().target
    }

    /// Jobs waiting for a worker.
    pub fn queued_count(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// Jobs currently running.
    pub fn active_count(&self) -> usize {
        self.shared.state.lock().active
    }

    pub fn stats(&self) -> DispatcherStats {
        let state = self.shared.state.lock();
        DispatcherStats {
            submitted: state.submitted,
            completed: state.completed,
            cancelled: state.cancelled,
            queued: state.queue.len(),
            active: state.active,
            workers: state.workers,
            concurrency: state.target,
        }
    }

    /// Block until no job is outstanding or `timeout` elapses.
    ///
    /// Returns true if the pool drained in time.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while !state.is_drained() {
            if self
                .shared
                .drained
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return state.is_drained();
            }
        }
        true
    }

    /// Drop queued jobs and let every worker exit once its current job ends.
    pub fn shutdown(&self) {
        let dropped: Vec<Box<dyn Job>> = {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            let dropped: Vec<_> = state.queue.drain(..).collect();
            state.cancelled += dropped.len() as u64;
            dropped
        };
        self.shared.work_available.notify_all();
        self.shared.drained.notify_all();
        debug!(dropped = dropped.len(), "Dispatcher shut down");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.state.lock().shutdown
    }

    fn spawn_worker(&self, id: u64) {
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(format!("tilefetch-worker-{}", id))
            .spawn(move || worker_loop(shared, id));

        if let Err(e) = spawned {
            error!(worker = id, error = %e, "Failed to spawn worker thread");
            self.shared.state.lock().workers -= 1;
        }
    }
}

impl fmt::Debug for JobDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobDispatcher")
            .field("stats", &self.stats())
            .finish()
    }
}

fn worker_loop(shared: Arc<Shared>, id: u64) {
    debug!(worker = id, "Worker started");
    let mut state = shared.state.lock();

    loop {
        if state.shutdown || state.workers > state.target {
            state.workers -= 1;
            break;
        }

        let Some(job) = state.queue.pop_front() else {
            state.idle += 1;
            shared.work_available.wait(&mut state);
            state.idle -= 1;
            continue;
        };

        state.active += 1;
        let name = job.name();
        let outcome = MutexGuard::unlocked(&mut state, || {
            panic::catch_unwind(AssertUnwindSafe(|| job.run()))
        });
        if let Err(payload) = outcome {
            error!(worker = id, job = %name, panic = %panic_message(payload.as_ref()), "Job panicked");
        }

        state.active -= 1;
        state.completed += 1;
        if state.is_drained() {
            shared.drained.notify_all();
        }
    }

    drop(state);
    debug!(worker = id, "Worker stopped");
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
