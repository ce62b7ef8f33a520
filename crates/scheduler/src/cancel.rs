//! Cooperative cancellation for queued and running jobs
//!
//! A job that has not started is cancelled by removing it from the queue. A
//! job that is already running only sees its token flip and decides itself
//! whether to stop.

use crate::priority::JobId;
use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

/// Cancellation flag shared between the scheduler and a worker
///
/// # Example
///
/// ```
/// use mangaview_scheduler::CancellationToken;
///
/// let token = CancellationToken::new();
/// let worker_token = token.clone();
///
/// token.cancel();
/// assert!(worker_token.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a token in the non-cancelled state
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel this token and every clone of it
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether `cancel()` has been called on this token or any clone
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Tokens of every job the scheduler still tracks, by id
pub struct CancellationRegistry {
    tokens: Mutex<HashMap<JobId, CancellationToken>>,
}

impl CancellationRegistry {
    /// Create a new empty cancellation registry
    pub fn new() -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Create and store a token for `job_id`
    pub fn register(&self, job_id: JobId) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens.lock().unwrap().insert(job_id, token.clone());
        token
    }

    /// Cancel a job by ID
    ///
    /// Returns `true` if the job was registered.
    pub fn cancel(&self, job_id: JobId) -> bool {
        match self.tokens.lock().unwrap().get(&job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every registered job
    ///
    /// Returns the number of jobs cancelled.
    pub fn cancel_all(&self) -> usize {
        let tokens = self.tokens.lock().unwrap();
        tokens.values().for_each(CancellationToken::cancel);
        tokens.len()
    }

    /// Forget a job once it has completed or left the queue
    pub fn unregister(&self, job_id: JobId) -> bool {
        self.tokens.lock().unwrap().remove(&job_id).is_some()
    }

    /// Token for a registered job
    pub fn get(&self, job_id: JobId) -> Option<CancellationToken> {
        self.tokens.lock().unwrap().get(&job_id).cloned()
    }

    /// Number of registered jobs
    pub fn len(&self) -> usize {
        self.tokens.lock().unwrap().len()
    }

    /// Whether no job is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CancellationRegistry {
    fn default() -> Self {
        Self::new()
    }
}
