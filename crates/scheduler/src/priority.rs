//! Priority-based job queue
//!
//! Jobs carry an arbitrary payload and are dequeued by priority class, with
//! FIFO ordering inside a class. Queued jobs can be removed by predicate or
//! moved to another class before a worker picks them up.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Job priority levels
///
/// Higher numeric values have higher priority and are executed first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JobPriority {
    /// Prefetch and background work that may be cancelled freely
    Speculative = 0,

    /// Work a user is waiting on right now
    Interactive = 1,
}

/// Unique job identifier
pub type JobId = u64;

/// A scheduled job with priority
///
/// Jobs are ordered by priority (higher priority first), then by insertion order
/// (earlier jobs first) to ensure FIFO ordering within the same priority level.
#[derive(Debug)]
pub struct Job<T> {
    /// Unique job identifier
    pub id: JobId,

    /// Job priority level
    pub priority: JobPriority,

    /// Work description
    pub payload: T,

    /// Insertion order (used for FIFO within same priority)
    insertion_order: u64,
}

impl<T> Job<T> {
    /// Create a new job
    pub fn new(id: JobId, priority: JobPriority, payload: T, insertion_order: u64) -> Self {
        Self {
            id,
            priority,
            payload,
            insertion_order,
        }
    }
}

impl<T> PartialEq for Job<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Job<T> {}

impl<T> PartialOrd for Job<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Job<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max heap, so earlier insertions compare greater
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.insertion_order.cmp(&self.insertion_order))
    }
}

/// Priority queue for jobs
///
/// Thread-safe job queue that orders jobs by priority and insertion order.
/// Consumers can block on [`PriorityQueue::pop_timeout`] until a job arrives.
pub struct PriorityQueue<T> {
    state: Mutex<QueueState<T>>,
    available: Condvar,
}

struct QueueState<T> {
    /// Binary heap for priority-ordered jobs (max heap)
    heap: BinaryHeap<Job<T>>,

    /// Next job ID (for automatic ID assignment)
    next_job_id: JobId,

    /// Insertion counter (for FIFO ordering within same priority)
    insertion_counter: u64,
}

impl<T> QueueState<T> {
    fn next_insertion(&mut self) -> u64 {
        let order = self.insertion_counter;
        self.insertion_counter += 1;
        order
    }
}

impl<T> PriorityQueue<T> {
    /// Create a new empty priority queue
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                next_job_id: 1,
                insertion_counter: 0,
            }),
            available: Condvar::new(),
        }
    }

    /// Push a job onto the queue
    ///
    /// Returns the assigned job ID.
    pub fn push(&self, priority: JobPriority, payload: T) -> JobId {
        let mut state = self.state.lock().unwrap();
        let job_id = state.next_job_id;
        state.next_job_id += 1;

        let insertion_order = state.next_insertion();
        state
            .heap
            .push(Job::new(job_id, priority, payload, insertion_order));
        drop(state);

        self.available.notify_one();
        job_id
    }

    /// Pop the highest priority job from the queue
    ///
    /// Returns `None` if the queue is empty.
    pub fn pop(&self) -> Option<Job<T>> {
        self.state.lock().unwrap().heap.pop()
    }

    /// Pop the highest priority job, waiting up to `timeout` for one to arrive
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Job<T>> {
        let state = self.state.lock().unwrap();
        let (mut state, _) = self
            .available
            .wait_timeout_while(state, timeout, |state| state.heap.is_empty())
            .unwrap();
        state.heap.pop()
    }

    /// Wake every consumer blocked in [`PriorityQueue::pop_timeout`]
    pub fn notify_all(&self) {
        self.available.notify_all();
    }

    /// Id and priority of the job that would be popped next
    pub fn peek(&self) -> Option<(JobId, JobPriority)> {
        let state = self.state.lock().unwrap();
        state.heap.peek().map(|job| (job.id, job.priority))
    }

    /// Get the number of jobs in the queue
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().heap.len()
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.state.lock().unwrap().heap.is_empty()
    }

    /// Remove and return all jobs
    pub fn clear(&self) -> Vec<Job<T>> {
        let mut state = self.state.lock().unwrap();
        std::mem::take(&mut state.heap).into_vec()
    }

    /// Remove all jobs matching a predicate
    ///
    /// Returns the removed jobs in priority order.
    pub fn remove_if<F>(&self, predicate: F) -> Vec<Job<T>>
    where
        F: Fn(&Job<T>) -> bool,
    {
        let mut state = self.state.lock().unwrap();
        let (mut removed, remaining): (Vec<_>, Vec<_>) = std::mem::take(&mut state.heap)
            .into_vec()
            .into_iter()
            .partition(|job| predicate(job));
        state.heap = remaining.into_iter().collect();

        removed.sort_unstable_by(|a, b| b.cmp(a));
        removed
    }

    /// Move a queued job to another priority class
    ///
    /// The job joins the back of its new class. Returns `false` if the job is
    /// no longer queued.
    pub fn set_priority(&self, job_id: JobId, priority: JobPriority) -> bool {
        let mut state = self.state.lock().unwrap();
        let mut jobs = std::mem::take(&mut state.heap).into_vec();
        let found = match jobs.iter_mut().find(|job| job.id == job_id) {
            Some(job) if job.priority != priority => {
                job.priority = priority;
                job.insertion_order = state.next_insertion();
                true
            }
            Some(_) => true,
            None => false,
        };
        state.heap = jobs.into_iter().collect();
        found
    }

    /// Id and priority of every queued job, in arbitrary order
    pub fn snapshot(&self) -> Vec<(JobId, JobPriority)> {
        let state = self.state.lock().unwrap();
        state.heap.iter().map(|job| (job.id, job.priority)).collect()
    }
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
