//! Browsing session state owned by the pipeline

use crate::config::ViewerConfig;
use crate::error::{PipelineError, Result};
use crate::prefetch::{Direction, PrefetchPlan, Prefetcher};
use mangaview_cache::{PageId, ResampleKey};
use mangaview_source::PageSource;
use std::sync::Arc;

/// Source, configuration and navigation state of one session
pub struct ViewerContext {
    source: Arc<dyn PageSource>,
    config: ViewerConfig,
    prefetcher: Prefetcher,
    current_page: Option<PageId>,
}

impl ViewerContext {
    pub fn new(source: Arc<dyn PageSource>, config: ViewerConfig) -> Self {
        let prefetcher = Prefetcher::new(config.prefetch_count, config.navigation_history);
        Self {
            source,
            config,
            prefetcher,
            current_page: None,
        }
    }

    pub fn source(&self) -> &Arc<dyn PageSource> {
        &self.source
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    /// Replace the configuration; prefetch settings apply to the next step
    pub fn set_config(&mut self, config: ViewerConfig) {
        self.prefetcher.set_prefetch_count(config.prefetch_count);
        self.prefetcher.set_history_len(config.navigation_history);
        self.config = config;
    }

    pub fn page_count(&self) -> usize {
        self.source.page_count()
    }

    pub fn current_page(&self) -> Option<PageId> {
        self.current_page
    }

    pub fn direction(&self) -> Direction {
        self.prefetcher.direction()
    }

    /// Make `page` current and plan the prefetch window
    pub fn navigate(&mut self, page: PageId) -> Result<PrefetchPlan> {
        let count = self.page_count();
        if page.index() as usize >= count {
            return Err(PipelineError::NotFound(format!(
                "{} (source has {} pages)",
                page, count
            )));
        }
        self.current_page = Some(page);
        Ok(self.prefetcher.on_navigate(page, count))
    }

    /// Key for displaying `page` at `width`x`height` with the configured backend
    pub fn key_for(&self, page: PageId, width: u32, height: u32) -> ResampleKey {
        ResampleKey::new(
            page,
            width,
            height,
            self.config.algorithm(),
            self.config.backend(),
        )
    }
}
