//! State-change notifications
//!
//! Observers register explicitly and get a [`SubscriptionId`] back. Events are
//! delivered synchronously on the thread that produced them (decode workers,
//! the extraction thread or the caller's thread), so observers should hand
//! work off rather than block.

use crate::error::PipelineError;
use crate::prefetch::Direction;
use mangaview_cache::{PageId, ResampleKey};
use mangaview_source::ExtractionProgress;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Which cache an event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    /// Decoded rasters (L2)
    Image,
    /// GPU textures (L1)
    Texture,
}

/// Something observable happened in the pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// A decoded raster was stored; GPU sources are keyed by their decoded size
    ImageCached { key: ResampleKey, byte_size: usize },

    /// A texture was stored
    TextureCached { key: ResampleKey, vram_size: usize },

    /// An entry was evicted
    Evicted { key: ResampleKey, tier: CacheTier },

    /// A request resolved with an error
    RequestFailed { key: ResampleKey, error: PipelineError },

    /// Speculative requests were issued for these pages, nearest first
    PrefetchScheduled { pages: Vec<PageId> },

    /// Archive extraction advanced
    ExtractionProgress(ExtractionProgress),

    /// The displayed page changed
    CurrentPageChanged { page: PageId, direction: Direction },
}

/// Handle returned by [`EventBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Callback receiving pipeline events
pub type EventObserver = Arc<dyn Fn(&PipelineEvent) + Send + Sync>;

/// Registry of observers
#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    observers: RwLock<Vec<(SubscriptionId, EventObserver)>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer
    pub fn subscribe<F>(&self, observer: F) -> SubscriptionId
    where
        F: Fn(&PipelineEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers.write().unwrap().push((id, Arc::new(observer)));
        id
    }

    /// Remove an observer; returns `false` if it was not registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = self.observers.write().unwrap();
        let before = observers.len();
        observers.retain(|(sub, _)| *sub != id);
        observers.len() != before
    }

    /// Deliver an event to every observer
    pub fn emit(&self, event: &PipelineEvent) {
        // Observers may subscribe or unsubscribe from inside a callback
        let observers: Vec<EventObserver> = self
            .observers
            .read()
            .unwrap()
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect();
        for observer in observers {
            observer(event);
        }
    }

    /// Number of registered observers
    pub fn len(&self) -> usize {
        self.observers.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
