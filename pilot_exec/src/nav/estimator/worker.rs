//! Fixed worker pool for parallel candidate evaluation.
//!
//! Work items are pure functions over copied inputs; results come back over
//! a channel with a join timeout, and partial results are accepted. One
//! process-wide pool is initialized lazily and shut down by the pilot loop
//! at exit.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use conquer_once::spin::OnceCell;
use log::warn;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Upper bound on pool size regardless of core count.
const MAX_WORKERS: usize = 3;

// ---------------------------------------------------------------------------
// STATICS
// ---------------------------------------------------------------------------

static POOL: OnceCell<WorkerPool> = OnceCell::uninit();

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A fixed set of threads draining a shared job queue.
pub struct WorkerPool {
    tx: Mutex<Option<Sender<Job>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let (tx, rx) = mpsc::channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));

        let handles = (0..size.max(1))
            .map(|_| {
                let rx = Arc::clone(&rx);
                thread::spawn(move || loop {
                    let job = {
                        let guard = match rx.lock() {
                            Ok(g) => g,
                            Err(_) => break,
                        };
                        guard.recv()
                    };
                    match job {
                        Ok(job) => job(),
                        // Channel closed, pool is shutting down
                        Err(_) => break,
                    }
                })
            })
            .collect();

        Self {
            tx: Mutex::new(Some(tx)),
            handles: Mutex::new(handles),
        }
    }

    /// Submit a job. Silently dropped if the pool is already shut down.
    pub fn execute<F: FnOnce() + Send + 'static>(&self, job: F) {
        if let Ok(guard) = self.tx.lock() {
            if let Some(tx) = guard.as_ref() {
                if tx.send(Box::new(job)).is_err() {
                    warn!("Worker pool rejected a job, workers have exited");
                }
            }
        }
    }

    /// Run every job and gather results until `timeout` elapses. Results
    /// arriving late are dropped.
    pub fn run_all<T, F>(&self, jobs: Vec<F>, timeout: Duration) -> Vec<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let expected = jobs.len();
        let (result_tx, result_rx): (Sender<T>, Receiver<T>) = mpsc::channel();

        for job in jobs {
            let result_tx = result_tx.clone();
            self.execute(move || {
                // Receiver gone means the caller timed out, nothing to do
                let _ = result_tx.send(job());
            });
        }
        drop(result_tx);

        let deadline = Instant::now() + timeout;
        let mut results = Vec::with_capacity(expected);
        while results.len() < expected {
            let remaining = match deadline.checked_duration_since(Instant::now()) {
                Some(r) => r,
                None => break,
            };
            match result_rx.recv_timeout(remaining) {
                Ok(result) => results.push(result),
                Err(_) => break,
            }
        }

        if results.len() < expected {
            warn!(
                "Worker pool join incomplete: {} of {} results",
                results.len(),
                expected
            );
        }

        results
    }

    /// Stop accepting jobs and join every worker.
    pub fn shutdown(&self) {
        if let Ok(mut guard) = self.tx.lock() {
            guard.take();
        }
        if let Ok(mut handles) = self.handles.lock() {
            for handle in handles.drain(..) {
                let _ = handle.join();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// The process-wide pool, created on first use with
/// `min(3, available cores)` workers.
pub fn global() -> &'static WorkerPool {
    POOL.get_or_init(|| WorkerPool::new(default_pool_size()))
}

/// Shut the global pool down. Called once by the pilot loop at exit; safe to
/// call when the pool was never created.
pub fn shutdown_global() {
    if let Some(pool) = POOL.get() {
        pool.shutdown();
    }
}

/// `min(3, available cores)`.
pub fn default_pool_size() -> usize {
    let cores = thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    cores.min(MAX_WORKERS)
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_run_all_collects_results() {
        let pool = WorkerPool::new(3);

        let jobs: Vec<_> = (0..10).map(|i| move || i * i).collect();
        let mut results = pool.run_all(jobs, Duration::from_secs(5));
        results.sort_unstable();

        assert_eq!(results, vec![0, 1, 4, 9, 16, 25, 36, 49, 64, 81]);
        pool.shutdown();
    }

    #[test]
    fn test_timeout_accepts_partial_results() {
        let pool = WorkerPool::new(1);

        let jobs: Vec<Box<dyn FnOnce() -> u32 + Send>> = vec![
            Box::new(|| 1),
            Box::new(|| {
                thread::sleep(Duration::from_secs(2));
                2
            }),
        ];
        let results = pool.run_all(jobs, Duration::from_millis(300));

        assert_eq!(results, vec![1]);
        pool.shutdown();
    }

    #[test]
    fn test_shutdown_then_execute_is_noop() {
        let pool = WorkerPool::new(2);
        pool.shutdown();
        pool.execute(|| panic!("must not run"));
    }

    #[test]
    fn test_default_pool_size_capped() {
        let size = default_pool_size();
        assert!(size >= 1 && size <= 3);
    }
}
