//! Worker pool for parallel job execution.
//!
//! Each worker thread blocks on the scheduler until a job arrives, hands the
//! job and its cancellation token to the executor, and marks it complete.

use crate::{CancellationToken, Job, JobScheduler};
use log::{debug, error};
use std::io;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Callback invoked for every job a worker pulls from the scheduler.
///
/// The executor owns the job. It is called even when the token is already
/// cancelled, so that it can report the cancellation to whoever waits on the
/// job; long-running executors should check `token.is_cancelled()` as they go.
pub type JobExecutor<T> = Arc<dyn Fn(Job<T>, &CancellationToken) + Send + Sync>;

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker threads to spawn.
    /// Default: number of logical CPU cores.
    pub num_workers: usize,

    /// Maximum time a worker waits for a job before checking shutdown.
    /// Default: 100ms.
    pub poll_interval: Duration,

    /// Thread name prefix; workers are named `<prefix>-<n>`.
    pub thread_name: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self::new(num_cpus())
    }
}

impl WorkerPoolConfig {
    /// Create a configuration with `num_workers` threads.
    ///
    /// Zero means one worker per logical CPU core.
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers: if num_workers == 0 { num_cpus() } else { num_workers },
            poll_interval: Duration::from_millis(100),
            thread_name: "mangaview-worker".to_string(),
        }
    }

    /// Set the poll interval for workers.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the thread name prefix.
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}

/// Pool of worker threads draining a [`JobScheduler`].
///
/// # Example
///
/// ```
/// use mangaview_scheduler::{CancellationToken, Job, JobPriority, JobScheduler, WorkerPool, WorkerPoolConfig};
/// use std::sync::{mpsc, Arc};
///
/// let scheduler: Arc<JobScheduler<u32>> = Arc::new(JobScheduler::new());
/// let (tx, rx) = mpsc::channel();
/// let tx = std::sync::Mutex::new(tx);
///
/// let executor = Arc::new(move |job: Job<u32>, _token: &CancellationToken| {
///     tx.lock().unwrap().send(job.payload * 2).unwrap();
/// });
///
/// let pool = WorkerPool::new(scheduler.clone(), executor, WorkerPoolConfig::new(2)).unwrap();
/// scheduler.submit(JobPriority::Interactive, 21);
/// assert_eq!(rx.recv().unwrap(), 42);
///
/// pool.shutdown();
/// ```
pub struct WorkerPool<T> {
    workers: Vec<Worker>,
    shutdown: Arc<AtomicBool>,
    scheduler: Arc<JobScheduler<T>>,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Create and start a new worker pool.
    ///
    /// Fails if a worker thread cannot be spawned; threads already started
    /// are stopped before returning.
    pub fn new(
        scheduler: Arc<JobScheduler<T>>,
        executor: JobExecutor<T>,
        config: WorkerPoolConfig,
    ) -> io::Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut pool = Self {
            workers: Vec::with_capacity(config.num_workers),
            shutdown: shutdown.clone(),
            scheduler: scheduler.clone(),
        };

        for id in 0..config.num_workers {
            let name = format!("{}-{}", config.thread_name, id);
            let worker = Worker::spawn(
                name,
                scheduler.clone(),
                executor.clone(),
                shutdown.clone(),
                config.poll_interval,
            )?;
            pool.workers.push(worker);
        }
        debug!(
            "started {} workers named {}-*",
            pool.workers.len(),
            config.thread_name
        );

        Ok(pool)
    }

    /// Get the number of worker threads.
    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Check if the worker pool is shutting down.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Shutdown the worker pool gracefully.
    ///
    /// Workers finish their current job and exit; queued jobs stay in the
    /// scheduler. Blocks until every worker has terminated.
    pub fn shutdown(self) {
        drop(self);
    }
}

impl<T> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        self.scheduler.wake_all();
        for worker in self.workers.drain(..) {
            worker.join();
        }
    }
}

/// A single worker thread in the worker pool.
struct Worker {
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    fn spawn<T: Send + 'static>(
        name: String,
        scheduler: Arc<JobScheduler<T>>,
        executor: JobExecutor<T>,
        shutdown: Arc<AtomicBool>,
        poll_interval: Duration,
    ) -> io::Result<Self> {
        let thread = thread::Builder::new()
            .name(name)
            .spawn(move || Self::run(scheduler, executor, shutdown, poll_interval))?;

        Ok(Self {
            thread: Some(thread),
        })
    }

    /// Main worker loop.
    fn run<T>(
        scheduler: Arc<JobScheduler<T>>,
        executor: JobExecutor<T>,
        shutdown: Arc<AtomicBool>,
        poll_interval: Duration,
    ) {
        while !shutdown.load(Ordering::Acquire) {
            let Some(job) = scheduler.next_job_timeout(poll_interval) else {
                continue;
            };
            let job_id = job.id;
            let token = scheduler.get_cancellation_token(job_id).unwrap_or_default();

            executor(job, &token);
            scheduler.complete_job(job_id);
        }
    }

    fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            let name = thread.thread().name().unwrap_or("worker").to_string();
            if thread.join().is_err() {
                error!("{} panicked", name);
            }
        }
    }
}

/// Get the number of logical CPU cores.
///
/// This is used as the default number of worker threads.
pub fn num_cpus() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
