//! One-shot results handed to requesters
//!
//! A [`Completer`] is held by the pipeline, the matching [`ResultFuture`] by
//! the requester. The requester can poll without blocking, block with or
//! without a timeout, or `.await` it. Cancelling a future only stops delivery
//! to that requester.

use crate::error::PipelineError;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

struct SlotState<T> {
    result: Option<Result<T, PipelineError>>,
    cancelled: bool,
    waker: Option<Waker>,
}

struct Slot<T> {
    state: Mutex<SlotState<T>>,
    ready: Condvar,
}

impl<T> Slot<T> {
    fn resolve(&self, result: Result<T, PipelineError>) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.result.is_some() || state.cancelled {
            return false;
        }
        state.result = Some(result);
        let waker = state.waker.take();
        drop(state);

        self.ready.notify_all();
        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }
}

/// Create a connected completer/future pair
pub fn channel<T>() -> (Completer<T>, ResultFuture<T>) {
    let slot = Arc::new(Slot {
        state: Mutex::new(SlotState {
            result: None,
            cancelled: false,
            waker: None,
        }),
        ready: Condvar::new(),
    });
    (
        Completer {
            slot: Some(slot.clone()),
        },
        ResultFuture { slot },
    )
}

/// Sending half of a [`ResultFuture`]
///
/// Dropping a completer without calling [`Completer::complete`] resolves the
/// future with [`PipelineError::ShutDown`].
pub struct Completer<T> {
    slot: Option<Arc<Slot<T>>>,
}

impl<T> Completer<T> {
    /// Deliver the result
    ///
    /// Returns `false` if the requester cancelled and the value was dropped.
    pub fn complete(mut self, result: Result<T, PipelineError>) -> bool {
        match self.slot.take() {
            Some(slot) => slot.resolve(result),
            None => false,
        }
    }

    /// Whether the requester cancelled its future
    pub fn is_cancelled(&self) -> bool {
        self.slot
            .as_ref()
            .is_some_and(|slot| slot.state.lock().unwrap().cancelled)
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            slot.resolve(Err(PipelineError::ShutDown));
        }
    }
}

/// Receiving half, owned by one requester
pub struct ResultFuture<T> {
    slot: Arc<Slot<T>>,
}

impl<T> ResultFuture<T> {
    /// A future that is already resolved
    pub fn ready(result: Result<T, PipelineError>) -> Self {
        let (completer, future) = channel();
        completer.complete(result);
        future
    }

    /// Whether a result (or cancellation) is available
    pub fn is_ready(&self) -> bool {
        let state = self.slot.state.lock().unwrap();
        state.result.is_some() || state.cancelled
    }

    /// Stop delivery to this requester
    ///
    /// Other requesters of the same page keep waiting for theirs. Has no effect
    /// once the result arrived.
    pub fn cancel(&self) {
        let mut state = self.slot.state.lock().unwrap();
        if state.result.is_none() {
            state.cancelled = true;
            let waker = state.waker.take();
            drop(state);
            self.slot.ready.notify_all();
            if let Some(waker) = waker {
                waker.wake();
            }
        }
    }

    /// Block until the result arrives
    pub fn wait(self) -> Result<T, PipelineError> {
        let mut state = self.slot.state.lock().unwrap();
        loop {
            if let Some(result) = state.result.take() {
                return result;
            }
            if state.cancelled {
                return Err(PipelineError::Cancelled);
            }
            state = self.slot.ready.wait(state).unwrap();
        }
    }

    /// Block until the result arrives or `timeout` elapses
    ///
    /// Returns `None` on timeout; the future stays usable.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T, PipelineError>>
    where
        T: Clone,
    {
        let deadline = Instant::now() + timeout;
        let mut state = self.slot.state.lock().unwrap();
        loop {
            if let Some(result) = &state.result {
                return Some(result.clone());
            }
            if state.cancelled {
                return Some(Err(PipelineError::Cancelled));
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            state = self.slot.ready.wait_timeout(state, deadline - now).unwrap().0;
        }
    }

    /// The result if it has arrived, without blocking
    pub fn poll_result(&self) -> Option<Result<T, PipelineError>>
    where
        T: Clone,
    {
        let state = self.slot.state.lock().unwrap();
        if state.cancelled {
            return Some(Err(PipelineError::Cancelled));
        }
        state.result.clone()
    }
}

impl<T> Future for ResultFuture<T> {
    type Output = Result<T, PipelineError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.slot.state.lock().unwrap();
        if let Some(result) = state.result.take() {
            return Poll::Ready(result);
        }
        if state.cancelled {
            return Poll::Ready(Err(PipelineError::Cancelled));
        }
        state.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}
