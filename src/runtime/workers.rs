//! Worker Pool
//!
//! A fixed set of worker threads fed from one bounded queue. Submission
//! blocks while the queue is full, so a burst of ready modules slows the
//! scheduler down instead of growing an unbounded backlog.
//!
//! Shutdown closes the queue; workers drain what was already queued and
//! exit, and `shutdown` joins them. Dropping the pool shuts it down.

use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use log::{debug, error, info};

use crate::error::EngineError;

use super::lock;

/// A unit of work handed to a worker thread.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct WorkerPool {
    sender: Option<SyncSender<Job>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(workers: usize, queue_depth: usize) -> Self {
        let workers = workers.max(1);
        let (sender, receiver) = sync_channel::<Job>(queue_depth.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let handles = (0..workers)
            .map(|ix| {
                let receiver = Arc::clone(&receiver);
                thread::spawn(move || worker_loop(ix, receiver))
            })
            .collect();

        info!(
            "Worker pool started: {} workers, queue depth {}",
            workers,
            queue_depth.max(1)
        );
        Self {
            sender: Some(sender),
            handles,
        }
    }

    /// Submits a job, blocking while the queue is full.
    pub fn submit(&self, job: Job) -> Result<(), EngineError> {
        match &self.sender {
            Some(sender) => sender.send(job).map_err(|_| EngineError::WorkersClosed),
            None => Err(EngineError::WorkersClosed),
        }
    }

    /// Closes the queue, drains queued jobs, and joins every worker.
    pub fn shutdown(&mut self) {
        if self.sender.take().is_none() {
            return;
        }
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                error!("worker thread panicked");
            }
        }
        debug!("Worker pool drained and joined");
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(ix: usize, receiver: Arc<Mutex<Receiver<Job>>>) {
    loop {
        // Hold the lock only while receiving, never while running the job.
        let job = {
            let guard = lock(&receiver);
            guard.recv()
        };
        match job {
            Ok(job) => job(),
            Err(_) => {
                debug!("worker {} exiting: queue closed", ix);
                break;
            }
        }
    }
}
