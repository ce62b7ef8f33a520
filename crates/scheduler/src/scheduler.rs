//! Job scheduler implementation
//!
//! Wraps the priority queue with job lifecycle tracking: submission,
//! cancellation, priority changes and completion statistics.

use crate::cancel::{CancellationRegistry, CancellationToken};
use crate::priority::{Job, JobId, JobPriority, PriorityQueue};
use log::trace;
use std::sync::Mutex;
use std::time::Duration;

/// Job scheduler statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Total jobs submitted
    pub jobs_submitted: u64,

    /// Total jobs completed
    pub jobs_completed: u64,

    /// Total jobs cancelled before they started
    pub jobs_cancelled: u64,

    /// Total jobs moved to another priority class
    pub jobs_reprioritized: u64,

    /// Current queue size
    pub queue_size: usize,
}

impl SchedulerStats {
    /// Jobs submitted but not yet completed or cancelled
    pub fn pending_jobs(&self) -> u64 {
        self.jobs_submitted - self.jobs_completed - self.jobs_cancelled
    }
}

/// Job scheduler with priority queue
///
/// Thread-safe scheduler that manages job submission and execution ordering.
/// Jobs removed by cancellation are handed back to the caller so that whoever
/// waits on them can be told.
///
/// # Example
///
/// ```
/// use mangaview_scheduler::{JobPriority, JobScheduler};
///
/// let scheduler = JobScheduler::new();
/// let (prefetch, _) = scheduler.submit(JobPriority::Speculative, "page 4");
/// let (visible, _) = scheduler.submit(JobPriority::Interactive, "page 1");
///
/// let job = scheduler.next_job().unwrap();
/// assert_eq!(job.id, visible);
/// scheduler.complete_job(job.id);
///
/// let cancelled = scheduler.cancel_jobs_if(|job| job.priority == JobPriority::Speculative);
/// assert_eq!(cancelled[0].id, prefetch);
/// ```
pub struct JobScheduler<T> {
    queue: PriorityQueue<T>,
    stats: Mutex<SchedulerStats>,
    cancellation: CancellationRegistry,
}

impl<T> JobScheduler<T> {
    /// Create a new job scheduler
    pub fn new() -> Self {
        Self {
            queue: PriorityQueue::new(),
            stats: Mutex::new(SchedulerStats::default()),
            cancellation: CancellationRegistry::new(),
        }
    }

    /// Submit a job to the scheduler
    ///
    /// Returns a tuple of (job_id, cancellation_token).
    pub fn submit(&self, priority: JobPriority, payload: T) -> (JobId, CancellationToken) {
        let mut stats = self.stats.lock().unwrap();
        let job_id = self.queue.push(priority, payload);
        let token = self.cancellation.register(job_id);
        stats.jobs_submitted += 1;
        trace!("submitted job {} at {:?}", job_id, priority);

        (job_id, token)
    }

    /// Get the next job to execute
    ///
    /// The job's token stays registered until `complete_job()` is called.
    pub fn next_job(&self) -> Option<Job<T>> {
        self.queue.pop()
    }

    /// Get the next job, waiting up to `timeout` for one to be submitted
    pub fn next_job_timeout(&self, timeout: Duration) -> Option<Job<T>> {
        self.queue.pop_timeout(timeout)
    }

    /// Wake every thread blocked in [`JobScheduler::next_job_timeout`]
    pub fn wake_all(&self) {
        self.queue.notify_all();
    }

    /// Mark a job as completed
    pub fn complete_job(&self, job_id: JobId) {
        self.stats.lock().unwrap().jobs_completed += 1;
        self.cancellation.unregister(job_id);
    }

    /// Cancel a specific job by ID
    ///
    /// A queued job is removed and returned. A running job only has its token
    /// cancelled, and `None` is returned.
    pub fn cancel_job(&self, job_id: JobId) -> Option<Job<T>> {
        self.cancellation.cancel(job_id);
        self.cancel_jobs_if(|job| job.id == job_id).pop()
    }

    /// Cancel all queued jobs matching a predicate
    ///
    /// Returns the removed jobs in priority order.
    pub fn cancel_jobs_if<F>(&self, predicate: F) -> Vec<Job<T>>
    where
        F: Fn(&Job<T>) -> bool,
    {
        let removed = self.queue.remove_if(predicate);
        if !removed.is_empty() {
            self.stats.lock().unwrap().jobs_cancelled += removed.len() as u64;
            for job in &removed {
                self.cancellation.cancel(job.id);
                self.cancellation.unregister(job.id);
            }
            trace!("cancelled {} queued jobs", removed.len());
        }
        removed
    }

    /// Cancel all queued jobs except those matching a predicate
    pub fn cancel_all_except<F>(&self, keep_predicate: F) -> Vec<Job<T>>
    where
        F: Fn(&Job<T>) -> bool,
    {
        self.cancel_jobs_if(|job| !keep_predicate(job))
    }

    /// Move a queued job to another priority class
    ///
    /// Returns `false` if the job has already started or finished.
    pub fn reprioritize(&self, job_id: JobId, priority: JobPriority) -> bool {
        let moved = self.queue.set_priority(job_id, priority);
        if moved {
            self.stats.lock().unwrap().jobs_reprioritized += 1;
        }
        moved
    }

    /// Get the current number of queued jobs
    pub fn pending_jobs(&self) -> usize {
        self.queue.len()
    }

    /// Check if the scheduler has any queued jobs
    pub fn has_pending_jobs(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Remove every queued job and cancel every registered token
    ///
    /// Returns the removed jobs.
    pub fn clear(&self) -> Vec<Job<T>> {
        self.cancellation.cancel_all();
        let removed = self.queue.clear();
        let mut stats = self.stats.lock().unwrap();
        stats.jobs_cancelled += removed.len() as u64;
        drop(stats);
        for job in &removed {
            self.cancellation.unregister(job.id);
        }
        removed
    }

    /// Get scheduler statistics
    pub fn stats(&self) -> SchedulerStats {
        let mut stats = self.stats.lock().unwrap().clone();
        stats.queue_size = self.queue.len();
        stats
    }

    /// Id and priority of the job that would run next
    pub fn peek_next_job(&self) -> Option<(JobId, JobPriority)> {
        self.queue.peek()
    }

    /// Id and priority of every queued job, in arbitrary order
    pub fn pending_jobs_list(&self) -> Vec<(JobId, JobPriority)> {
        self.queue.snapshot()
    }

    /// Get the cancellation token for a job
    ///
    /// Returns `None` once the job has completed or been cancelled out of the queue.
    pub fn get_cancellation_token(&self, job_id: JobId) -> Option<CancellationToken> {
        self.cancellation.get(job_id)
    }
}

impl<T> Default for JobScheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}
