//! Background cleanup dispatch
//!
//! Trim and journal rebuild run off the caller's thread. The engine hands a
//! job to a [`CleanupDispatcher`] and coalesces requests so that at most one
//! job is queued or running at any time.
//!
//! - [`WorkerThread`]: dedicated OS thread fed by a crossbeam channel (default)
//! - [`TokioDispatcher`]: `spawn_blocking` on an existing tokio runtime
//! - [`ManualDispatcher`]: jobs wait until [`ManualDispatcher::run_pending`]

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::thread;

use crossbeam::channel::{self, Sender};
use parking_lot::Mutex;
use tracing::debug;

/// Unit of background work
pub type CleanupJob = Box<dyn FnOnce() + Send + 'static>;

/// Executes cleanup jobs off the calling thread.
pub trait CleanupDispatcher: Send + Sync + fmt::Debug {
    /// Schedule `job`. Must not run it inline: callers hold the engine lock.
    fn dispatch(&self, job: CleanupJob);

    /// Stop accepting jobs. Already queued jobs may still run.
    fn shutdown(&self) {}
}

// =============================================================================
// Worker Thread
// =============================================================================

/// Single background thread draining a job channel.
pub struct WorkerThread {
    sender: Mutex<Option<Sender<CleanupJob>>>,
    name: String,
}

impl WorkerThread {
    /// Spawn the worker thread.
    pub fn spawn(name: impl Into<String>) -> io::Result<Self> {
        let name = name.into();
        let (sender, receiver) = channel::unbounded::<CleanupJob>();

        thread::Builder::new().name(name.clone()).spawn(move || {
            for job in receiver {
                job();
            }
            debug!("Cleanup worker exiting");
        })?;

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            name,
        })
    }
}

impl CleanupDispatcher for WorkerThread {
    fn dispatch(&self, job: CleanupJob) {
        match self.sender.lock().as_ref() {
            Some(sender) => {
                if sender.send(job).is_err() {
                    debug!(worker = %self.name, "Cleanup worker is gone, dropping job");
                }
            }
            None => debug!(worker = %self.name, "Cleanup worker shut down, dropping job"),
        }
    }

    fn shutdown(&self) {
        // Dropping the sender ends the worker's receive loop.
        self.sender.lock().take();
    }
}

impl fmt::Debug for WorkerThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerThread")
            .field("name", &self.name)
            .field("running", &self.sender.lock().is_some())
            .finish()
    }
}

// =============================================================================
// Tokio
// =============================================================================

/// Runs jobs on a tokio runtime's blocking pool.
#[derive(Debug, Clone)]
pub struct TokioDispatcher {
    handle: tokio::runtime::Handle,
}

impl TokioDispatcher {
    /// Dispatch onto `handle`
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Dispatch onto the runtime the caller is running in, if any
    pub fn try_current() -> Option<Self> {
        tokio::runtime::Handle::try_current().ok().map(Self::new)
    }
}

impl CleanupDispatcher for TokioDispatcher {
    fn dispatch(&self, job: CleanupJob) {
        drop(self.handle.spawn_blocking(job));
    }
}

// =============================================================================
// Manual
// =============================================================================

/// Queues jobs until the owner runs them.
#[derive(Default)]
pub struct ManualDispatcher {
    queue: Mutex<VecDeque<CleanupJob>>,
}

impl ManualDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued jobs
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Run queued jobs (including ones they enqueue) until the queue is empty.
    /// Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            // Release the queue lock before running the job.
            let job = self.queue.lock().pop_front();
            match job {
                Some(job) => {
                    job();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }
}

impl CleanupDispatcher for ManualDispatcher {
    fn dispatch(&self, job: CleanupJob) {
        self.queue.lock().push_back(job);
    }
}

impl fmt::Debug for ManualDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualDispatcher")
            .field("pending", &self.pending())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
