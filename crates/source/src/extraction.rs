//! Out-of-order archive extraction
//!
//! A single background thread extracts archive members into a temporary
//! directory. The queue is ordered by priority class first, then by distance
//! from the focus page, then by page index, and is re-ranked whenever the
//! focus moves.

use crate::{Result, SourceError};
use log::{debug, info, warn};
use mangaview_cache::PageId;
use mangaview_scheduler::JobPriority;
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Writes one archive member to disk
///
/// Owned by the extraction thread, so implementations need not be `Sync`.
pub trait MemberExtractor: Send + 'static {
    /// Extract the member backing `page_id` into the file at `dest`
    fn extract(&mut self, page_id: PageId, dest: &Path) -> Result<()>;
}

/// Lifecycle of one page's extraction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketState {
    Queued,
    Extracting,
    Ready(PathBuf),
    Failed(SourceError),
}

impl TicketState {
    fn is_resolved(&self) -> bool {
        matches!(self, TicketState::Ready(_) | TicketState::Failed(_))
    }

    fn outcome(&self) -> Option<Result<PathBuf>> {
        match self {
            TicketState::Ready(path) => Some(Ok(path.clone())),
            TicketState::Failed(err) => Some(Err(err.clone())),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct TicketShared {
    state: Mutex<TicketState>,
    resolved: Condvar,
}

/// Handle on the extraction of one page
///
/// Every request for the same page shares one ticket.
#[derive(Debug, Clone)]
pub struct ExtractionTicket {
    page_id: PageId,
    shared: Arc<TicketShared>,
}

impl ExtractionTicket {
    fn new(page_id: PageId) -> Self {
        Self {
            page_id,
            shared: Arc::new(TicketShared {
                state: Mutex::new(TicketState::Queued),
                resolved: Condvar::new(),
            }),
        }
    }

    /// Page this ticket extracts
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Current state
    pub fn state(&self) -> TicketState {
        self.shared.state.lock().unwrap().clone()
    }

    /// Whether the ticket is `Ready` or `Failed`
    pub fn is_resolved(&self) -> bool {
        self.shared.state.lock().unwrap().is_resolved()
    }

    /// Block until the page is extracted, returning its path
    pub fn wait(&self) -> Result<PathBuf> {
        let state = self.shared.state.lock().unwrap();
        let state = self
            .shared
            .resolved
            .wait_while(state, |state| !state.is_resolved())
            .unwrap();
        state
            .outcome()
            .unwrap_or_else(|| unreachable!("wait_while returned before resolution"))
    }

    /// Block up to `timeout`; `None` if the ticket is still pending
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<PathBuf>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock().unwrap();
        while !state.is_resolved() {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            state = self.shared.resolved.wait_timeout(state, deadline - now).unwrap().0;
        }
        state.outcome()
    }

    fn set(&self, next: TicketState) {
        let mut state = self.shared.state.lock().unwrap();
        *state = next;
        if state.is_resolved() {
            self.shared.resolved.notify_all();
        }
    }
}

/// Extraction progress of one archive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExtractionProgress {
    /// Pages extracted successfully
    pub ready: usize,

    /// Pages whose extraction failed
    pub failed: usize,

    /// Pages in the archive
    pub total: usize,
}

impl ExtractionProgress {
    /// Pages that reached a final state
    pub fn done(&self) -> usize {
        self.ready + self.failed
    }

    /// Whether every page reached a final state
    pub fn is_complete(&self) -> bool {
        self.done() >= self.total
    }
}

/// Callback receiving progress after every finished extraction
pub type ProgressObserver = Arc<dyn Fn(ExtractionProgress) + Send + Sync>;

struct CoordinatorState {
    tickets: HashMap<PageId, ExtractionTicket>,
    queued: HashMap<PageId, JobPriority>,
    focus: PageId,
    ready: usize,
    failed: usize,
    shutdown: bool,
}

impl CoordinatorState {
    /// Best queued page: interactive first, then nearest to focus, then lowest index
    fn next_page(&self) -> Option<PageId> {
        let focus = self.focus;
        self.queued
            .iter()
            .min_by_key(|(page, priority)| (Reverse(**priority), page.distance(focus), page.index()))
            .map(|(page, _)| *page)
    }

    fn enqueue(&mut self, page_id: PageId, priority: JobPriority) -> ExtractionTicket {
        if let Some(ticket) = self.tickets.get(&page_id) {
            // Upgrade a still-queued page; finished tickets are never retried
            if let Some(queued) = self.queued.get_mut(&page_id) {
                *queued = (*queued).max(priority);
            }
            return ticket.clone();
        }
        let ticket = ExtractionTicket::new(page_id);
        self.tickets.insert(page_id, ticket.clone());
        self.queued.insert(page_id, priority);
        ticket
    }
}

struct Shared {
    state: Mutex<CoordinatorState>,
    work: Condvar,
    total: usize,
    observer: Mutex<Option<ProgressObserver>>,
}

impl Shared {
    fn progress(&self, state: &CoordinatorState) -> ExtractionProgress {
        ExtractionProgress {
            ready: state.ready,
            failed: state.failed,
            total: self.total,
        }
    }
}

/// Prioritized extractor for one open archive
///
/// Owns the extraction thread and the temporary directory holding extracted
/// pages. Dropping the coordinator stops the thread, fails every ticket still
/// queued and deletes the directory.
pub struct ExtractionCoordinator {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
    temp_dir: TempDir,
}

impl ExtractionCoordinator {
    /// Start extracting with `extractor` for an archive of `total` pages
    pub fn new<E: MemberExtractor>(extractor: E, total: usize) -> Result<Self> {
        let temp_dir = tempfile::Builder::new()
            .prefix("mangaview-")
            .tempdir()
            .map_err(|err| SourceError::io(std::env::temp_dir(), err))?;

        let shared = Arc::new(Shared {
            state: Mutex::new(CoordinatorState {
                tickets: HashMap::new(),
                queued: HashMap::new(),
                focus: PageId::new(0),
                ready: 0,
                failed: 0,
                shutdown: false,
            }),
            work: Condvar::new(),
            total,
            observer: Mutex::new(None),
        });

        let worker_shared = shared.clone();
        let dir = temp_dir.path().to_path_buf();
        let thread = thread::Builder::new()
            .name("mangaview-extract".to_string())
            .spawn(move || Self::run(worker_shared, extractor, dir))
            .map_err(|err| SourceError::io(temp_dir.path(), err))?;

        debug!(
            "Extraction coordinator started for {} pages in {}",
            total,
            temp_dir.path().display()
        );
        Ok(Self {
            shared,
            thread: Some(thread),
            temp_dir,
        })
    }

    /// Request extraction of a page
    ///
    /// Repeated requests for a page return the same ticket; a queued ticket is
    /// raised to the higher of the two priorities.
    pub fn request_page(&self, page_id: PageId, priority: JobPriority) -> Result<ExtractionTicket> {
        if page_id.index() as usize >= self.shared.total {
            return Err(SourceError::NotFound(page_id.to_string()));
        }
        let ticket = self.shared.state.lock().unwrap().enqueue(page_id, priority);
        self.shared.work.notify_one();
        Ok(ticket)
    }

    /// Queue every page not requested yet
    pub fn request_all(&self, priority: JobPriority) {
        let mut state = self.shared.state.lock().unwrap();
        for index in 0..self.shared.total {
            state.enqueue(PageId::new(index as u32), priority);
        }
        drop(state);
        self.shared.work.notify_one();
    }

    /// Move the focus; queued pages are re-ranked by distance from it
    pub fn set_focus(&self, page_id: PageId) {
        self.shared.state.lock().unwrap().focus = page_id;
    }

    /// Current focus page
    pub fn focus(&self) -> PageId {
        self.shared.state.lock().unwrap().focus
    }

    /// Ticket for a page, if it has been requested
    pub fn ticket(&self, page_id: PageId) -> Option<ExtractionTicket> {
        self.shared.state.lock().unwrap().tickets.get(&page_id).cloned()
    }

    /// Pages still waiting, in the order they would be extracted
    pub fn queued_order(&self) -> Vec<PageId> {
        let state = self.shared.state.lock().unwrap();
        let focus = state.focus;
        let mut pages: Vec<_> = state.queued.iter().map(|(page, prio)| (*page, *prio)).collect();
        pages.sort_by_key(|(page, priority)| (Reverse(*priority), page.distance(focus), page.index()));
        pages.into_iter().map(|(page, _)| page).collect()
    }

    /// Extraction progress so far
    pub fn progress(&self) -> ExtractionProgress {
        let state = self.shared.state.lock().unwrap();
        self.shared.progress(&state)
    }

    /// Register the progress callback, replacing any previous one
    pub fn set_observer(&self, observer: ProgressObserver) {
        *self.shared.observer.lock().unwrap() = Some(observer);
    }

    /// Directory holding extracted pages
    pub fn extraction_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    fn run<E: MemberExtractor>(shared: Arc<Shared>, mut extractor: E, dir: PathBuf) {
        loop {
            let (page_id, ticket) = {
                let state = shared.state.lock().unwrap();
                let mut state = shared
                    .work
                    .wait_while(state, |state| state.queued.is_empty() && !state.shutdown)
                    .unwrap();
                if state.shutdown {
                    break;
                }
                let Some(page_id) = state.next_page() else {
                    continue;
                };
                state.queued.remove(&page_id);
                let Some(ticket) = state.tickets.get(&page_id).cloned() else {
                    continue;
                };
                (page_id, ticket)
            };

            ticket.set(TicketState::Extracting);
            let dest = dir.join(format!("{:06}.page", page_id.index()));
            let result = extractor.extract(page_id, &dest);

            let progress = {
                let mut state = shared.state.lock().unwrap();
                match result {
                    Ok(()) => {
                        state.ready += 1;
                        debug!("Extracted {} to {}", page_id, dest.display());
                        ticket.set(TicketState::Ready(dest));
                    }
                    Err(err) => {
                        state.failed += 1;
                        warn!("Extraction of {} failed: {}", page_id, err);
                        ticket.set(TicketState::Failed(err));
                    }
                }
                shared.progress(&state)
            };

            if progress.is_complete() {
                info!(
                    "Extraction finished: {} ready, {} failed",
                    progress.ready, progress.failed
                );
            }
            let observer = shared.observer.lock().unwrap().clone();
            if let Some(observer) = observer {
                observer(progress);
            }
        }
    }
}

impl Drop for ExtractionCoordinator {
    fn drop(&mut self) {
        let abandoned: Vec<_> = {
            let mut state = self.shared.state.lock().unwrap();
            state.shutdown = true;
            let queued: Vec<_> = state.queued.drain().map(|(page, _)| page).collect();
            let tickets: Vec<_> = queued
                .into_iter()
                .filter_map(|page| state.tickets.get(&page).cloned())
                .collect();
            tickets
        };
        self.shared.work.notify_all();

        for ticket in abandoned {
            ticket.set(TicketState::Failed(SourceError::ExtractionFailed {
                member: ticket.page_id().to_string(),
                reason: "archive closed".to_string(),
            }));
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Extraction thread panicked");
            }
        }
    }
}
