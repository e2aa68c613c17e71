//! Provides a queue of independent jobs drained by a pool of worker
//! threads. The queue itself is not changed after `run` starts; we
//! simply work through it with an atomic counter that tracks the
//! index of the next job to execute, so no work-stealing machinery is
//! needed for the restructure workload (many similar-sized jobs).

// std
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub type Job<'s> = Box<dyn FnOnce() + Send + 's>;

/// The queue of jobs to be worked on, shared immutably between worker
/// threads. Jobs borrow mutable state (e.g. the directional trees
/// being restructured); the borrows stay disjoint because every job
/// is taken exactly once.
pub struct JobQueue<'s> {
    jobs: Vec<Mutex<Option<Job<'s>>>>,
    next: AtomicUsize,
}

impl<'s> Default for JobQueue<'s> {
    fn default() -> Self {
        JobQueue::new()
    }
}

impl<'s> JobQueue<'s> {
    pub fn new() -> Self {
        JobQueue {
            jobs: Vec::new(),
            next: AtomicUsize::new(0),
        }
    }
    pub fn schedule(&mut self, job: Job<'s>) {
        self.jobs.push(Mutex::new(Some(job)));
    }
    /// Get the next job in the queue or None if the queue is finished.
    fn next_job(&self) -> Option<Job<'s>> {
        let i: usize = self.next.fetch_add(1, Ordering::AcqRel);
        if i >= self.jobs.len() {
            None
        } else {
            self.jobs[i].lock().expect("Could not lock").take()
        }
    }
    pub fn len(&self) -> usize {
        self.jobs.len()
    }
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
    /// Drain the queue on `num_threads` workers and wait for
    /// completion.
    pub fn run(&self, num_threads: usize) {
        let num_threads: usize = num_threads.max(1).min(self.jobs.len().max(1));
        crossbeam::scope(|scope| {
            for _ in 0..num_threads {
                scope.spawn(|_| {
                    while let Some(job) = self.next_job() {
                        job();
                    }
                });
            }
        })
        .expect("Could not join worker threads");
    }
}
