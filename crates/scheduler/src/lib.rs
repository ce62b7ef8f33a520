//! MangaView Scheduler Library
//!
//! Priority job scheduling with cooperative cancellation and a worker pool.
//!
//! Jobs carry any payload type and are split into two classes: interactive
//! work a user is waiting on, and speculative work (prefetch) that runs only
//! when nothing interactive is queued. Inside a class jobs run in FIFO order.
//! Queued speculative jobs can be cancelled in bulk or promoted to interactive
//! when the user asks for them directly.
//!
//! # Example
//!
//! ```
//! use mangaview_scheduler::{JobPriority, JobScheduler};
//!
//! let scheduler = JobScheduler::new();
//!
//! let (prefetch_id, _) = scheduler.submit(JobPriority::Speculative, 5u32);
//! let (visible_id, token) = scheduler.submit(JobPriority::Interactive, 4u32);
//!
//! if let Some(job) = scheduler.next_job() {
//!     assert_eq!(job.id, visible_id);
//!     // Worker can check token.is_cancelled() during execution
//!     assert!(!token.is_cancelled());
//!     scheduler.complete_job(job.id);
//! }
//!
//! // The user jumped to page 5 directly
//! scheduler.reprioritize(prefetch_id, JobPriority::Interactive);
//! ```

mod cancel;
mod priority;
mod scheduler;
mod worker;

pub use cancel::{CancellationRegistry, CancellationToken};
pub use priority::{Job, JobId, JobPriority, PriorityQueue};
pub use scheduler::{JobScheduler, SchedulerStats};
pub use worker::{num_cpus, JobExecutor, WorkerPool, WorkerPoolConfig};
