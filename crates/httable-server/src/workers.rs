//! A bounded pool of worker threads draining a shared job queue — the
//! shape used for both the application queue (request handlers) and the
//! maintenance queue (compactions, splits). Built from `std::thread` and
//! `std::sync::mpsc` directly rather than reaching for an external
//! thread-pool crate.

use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::error;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A named pool of worker threads that run submitted closures to
/// completion; panics inside a job are caught and logged rather than
/// taking the worker thread down.
pub struct WorkerPool {
    name: &'static str,
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(name: &'static str, worker_count: usize) -> Self {
        assert!(worker_count > 0, "worker_count must be > 0");
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(parking_lot::Mutex::new(receiver));

        let mut workers = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let receiver = Arc::clone(&receiver);
            let pool_name = name;
            workers.push(
                thread::Builder::new()
                    .name(format!("{name}-{index}"))
                    .spawn(move || loop {
                        let job = receiver.lock().recv();
                        match job {
                            Ok(job) => {
                                if let Err(panic) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(job)) {
                                    error!(pool = pool_name, ?panic, "worker job panicked");
                                }
                            }
                            Err(_) => break,
                        }
                    })
                    .expect("failed to spawn worker thread"),
            );
        }

        Self { name, sender: Some(sender), workers }
    }

    /// Submits a job for a worker to run; never blocks the caller.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(Box::new(job));
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn submitted_jobs_all_run() {
        let pool = WorkerPool::new("test", 4);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            pool.submit(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        drop(pool);
        assert_eq!(counter.load(Ordering::SeqCst), 100, "every submitted job must run before the pool drops");
    }

    #[test]
    fn a_panicking_job_does_not_stop_the_pool() {
        let pool = WorkerPool::new("test", 1);
        pool.submit(|| panic!("boom"));
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);
        pool.submit(move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });
        drop(pool);
        assert_eq!(counter.load(Ordering::SeqCst), 1, "the worker thread must survive a panicking job");
    }
}
