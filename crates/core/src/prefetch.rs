//! Navigation direction inference and prefetch windows
//!
//! The direction is the sign of the sum of the signs of the last N page
//! deltas; a tie keeps the previous direction. The prefetch window covers the
//! current page and the next `prefetch_count` pages in that direction, and
//! every page in it is pinned in both caches.

use mangaview_cache::PageId;
use std::collections::VecDeque;

/// Reading direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Forward,
    Backward,
}

impl Direction {
    /// The opposite direction
    pub fn reversed(self) -> Self {
        match self {
            Direction::Forward => Direction::Backward,
            Direction::Backward => Direction::Forward,
        }
    }
}

/// Recent page deltas
#[derive(Debug, Clone)]
pub struct NavigationHistory {
    deltas: VecDeque<i64>,
    limit: usize,
    last_page: Option<PageId>,
    direction: Direction,
}

impl NavigationHistory {
    /// Remember up to `limit` deltas (at least one)
    pub fn new(limit: usize) -> Self {
        Self {
            deltas: VecDeque::with_capacity(limit.max(1)),
            limit: limit.max(1),
            last_page: None,
            direction: Direction::Forward,
        }
    }

    /// Record a visit and return the inferred direction
    ///
    /// Revisiting the same page does not add a delta.
    pub fn record(&mut self, page: PageId) -> Direction {
        if let Some(last) = self.last_page {
            let delta = i64::from(page.index()) - i64::from(last.index());
            if delta != 0 {
                if self.deltas.len() == self.limit {
                    self.deltas.pop_front();
                }
                self.deltas.push_back(delta);
            }
        }
        self.last_page = Some(page);

        let score: i64 = self.deltas.iter().map(|d| d.signum()).sum();
        if score > 0 {
            self.direction = Direction::Forward;
        } else if score < 0 {
            self.direction = Direction::Backward;
        }
        self.direction
    }

    /// Current direction
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Last recorded page
    pub fn last_page(&self) -> Option<PageId> {
        self.last_page
    }

    /// Change how many deltas are remembered, dropping the oldest
    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit.max(1);
        while self.deltas.len() > self.limit {
            self.deltas.pop_front();
        }
    }
}

/// Outcome of one navigation step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefetchPlan {
    /// Page being displayed
    pub current: PageId,

    /// Inferred direction
    pub direction: Direction,

    /// Pages to prefetch, nearest first, excluding `current`
    pub pages: Vec<PageId>,

    /// Whether the direction flipped on this step
    pub reversed: bool,
}

impl PrefetchPlan {
    /// Pages that must not be evicted: the current page and the window
    pub fn pinned(&self) -> Vec<PageId> {
        std::iter::once(self.current)
            .chain(self.pages.iter().copied())
            .collect()
    }

    /// Whether `page` is the current page or in the window
    pub fn covers(&self, page: PageId) -> bool {
        page == self.current || self.pages.contains(&page)
    }
}

/// Pages after `current` in `direction`, nearest first, clamped to the source
pub fn window(current: PageId, direction: Direction, count: usize, page_count: usize) -> Vec<PageId> {
    let index = current.index() as usize;
    match direction {
        Direction::Forward => (index + 1..page_count.min(index + 1 + count))
            .map(|i| PageId::new(i as u32))
            .collect(),
        Direction::Backward => (index.saturating_sub(count)..index)
            .rev()
            .map(|i| PageId::new(i as u32))
            .collect(),
    }
}

/// Chooses which pages to decode ahead of the reader
#[derive(Debug, Clone)]
pub struct Prefetcher {
    history: NavigationHistory,
    prefetch_count: usize,
}

impl Prefetcher {
    pub fn new(prefetch_count: usize, history_len: usize) -> Self {
        Self {
            history: NavigationHistory::new(history_len),
            prefetch_count,
        }
    }

    /// Register a visit to `page` and plan the next window
    pub fn on_navigate(&mut self, page: PageId, page_count: usize) -> PrefetchPlan {
        let previous = self.history.direction();
        let direction = self.history.record(page);
        PrefetchPlan {
            current: page,
            direction,
            pages: window(page, direction, self.prefetch_count, page_count),
            reversed: direction != previous,
        }
    }

    pub fn direction(&self) -> Direction {
        self.history.direction()
    }

    pub fn prefetch_count(&self) -> usize {
        self.prefetch_count
    }

    pub fn set_prefetch_count(&mut self, count: usize) {
        self.prefetch_count = count;
    }

    pub fn set_history_len(&mut self, len: usize) {
        self.history.set_limit(len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pages(indices: &[u32]) -> Vec<PageId> {
        indices.iter().map(|&i| PageId::new(i)).collect()
    }

    #[test]
    fn test_default_direction_is_forward() {
        let mut history = NavigationHistory::new(4);
        assert_eq!(history.record(PageId::new(5)), Direction::Forward);
    }

    #[test]
    fn test_direction_follows_majority() {
        let mut history = NavigationHistory::new(2);
        for page in [10, 9, 8] {
            history.record(PageId::new(page));
        }
        assert_eq!(history.direction(), Direction::Backward);

        // One step forward ties the window (-1, +1) and keeps the direction
        assert_eq!(history.record(PageId::new(9)), Direction::Backward);
        assert_eq!(history.record(PageId::new(10)), Direction::Forward);
    }

    #[test]
    fn test_large_jump_counts_once() {
        let mut history = NavigationHistory::new(4);
        for page in [0, 1, 2, 3] {
            history.record(PageId::new(page));
        }
        assert_eq!(history.record(PageId::new(0)), Direction::Forward);
    }

    #[test]
    fn test_window_is_clamped() {
        assert_eq!(window(PageId::new(1), Direction::Forward, 2, 3), pages(&[2]));
        assert_eq!(window(PageId::new(0), Direction::Forward, 2, 3), pages(&[1, 2]));
        assert_eq!(window(PageId::new(1), Direction::Backward, 4, 10), pages(&[0]));
        assert_eq!(window(PageId::new(6), Direction::Backward, 2, 10), pages(&[5, 4]));
        assert!(window(PageId::new(2), Direction::Forward, 0, 10).is_empty());
    }

    #[test]
    fn test_plan_reports_reversal_and_pins() {
        let mut prefetcher = Prefetcher::new(2, 1);
        let plan = prefetcher.on_navigate(PageId::new(5), 20);
        assert!(!plan.reversed);
        assert_eq!(plan.pages, pages(&[6, 7]));
        assert_eq!(plan.pinned(), pages(&[5, 6, 7]));

        let plan = prefetcher.on_navigate(PageId::new(4), 20);
        assert!(plan.reversed);
        assert_eq!(plan.direction, Direction::Backward);
        assert_eq!(plan.pages, pages(&[3, 2]));
        assert!(plan.covers(PageId::new(4)));
        assert!(!plan.covers(PageId::new(6)));
    }

    #[test]
    fn test_set_limit_drops_oldest() {
        let mut history = NavigationHistory::new(4);
        for page in [0, 1, 2, 1] {
            history.record(PageId::new(page));
        }
        history.set_limit(1);
        assert_eq!(history.record(PageId::new(1)), Direction::Backward);
    }
}
