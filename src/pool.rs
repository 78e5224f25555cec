// Fixed-size worker thread pool fed by a channel of boxed jobs.

use crate::error::{GrassmannPcaError, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{trace, warn};
use std::thread;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A pool of named OS threads that run posted jobs to completion.
///
/// The pool lives for the whole of a `batch_process` call; the driver posts
/// one job per chunk per phase and synchronizes through the merger barrier,
/// never through the pool itself. Dropping the pool closes the job channel
/// and joins every thread, so all exit paths release the workers.
pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `worker_count` threads. `worker_count` must be at least 1.
    pub fn new(worker_count: usize) -> Result<Self> {
        if worker_count == 0 {
            return Err(GrassmannPcaError::InvalidConfig(
                "worker pool needs at least one thread".to_string(),
            ));
        }

        let (sender, receiver) = unbounded::<Job>();
        let mut workers = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            let receiver: Receiver<Job> = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("grassmann-worker-{}", id))
                .spawn(move || {
                    trace!("worker {} started", id);
                    while let Ok(job) = receiver.recv() {
                        job();
                    }
                    trace!("worker {} stopped", id);
                })
                .map_err(GrassmannPcaError::ThreadSpawn)?;
            workers.push(handle);
        }

        Ok(Self {
            sender: Some(sender),
            workers,
        })
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Posts one job. Jobs are picked up by whichever thread is free next.
    pub fn execute<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.sender
            .as_ref()
            .expect("worker pool job channel already closed")
            .send(Box::new(job))
            .expect("worker pool threads terminated early");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the channel ends each worker loop.
        self.sender.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("a worker thread panicked during shutdown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn rejects_zero_threads() {
        assert!(matches!(
            WorkerPool::new(0),
            Err(GrassmannPcaError::InvalidConfig(_))
        ));
    }

    #[test]
    fn runs_every_posted_job() {
        let pool = WorkerPool::new(4).unwrap();
        assert_eq!(pool.worker_count(), 4);

        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..64 {
            let counter = Arc::clone(&counter);
            pool.execute(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        // Dropping the pool joins the workers after the queue drains.
        drop(pool);
        assert_eq!(counter.load(Ordering::SeqCst), 64);
    }

    #[test]
    fn a_single_thread_runs_jobs_in_posting_order() {
        let pool = WorkerPool::new(1).unwrap();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        for index in 0..16 {
            let order = Arc::clone(&order);
            pool.execute(move || {
                order.lock().unwrap().push(index);
            });
        }
        drop(pool);
        let order = order.lock().unwrap();
        assert_eq!(*order, (0..16).collect::<Vec<_>>());
    }
}
