//! Pipeline orchestrator
//!
//! Single entry point for page requests. For each [`ResampleKey`] a request
//! either hits the relevant cache, attaches to the job already in flight for
//! that key, or starts exactly one new job. Finished jobs populate the caches
//! and resolve every attached requester with the same value.
//!
//! CPU keys complete on a decode worker. GPU keys are decoded at source
//! resolution on a worker, then queued for the thread that owns the graphics
//! context, which uploads, resamples and caches the texture in
//! [`Pipeline::process_gpu_work`].

use crate::config::ViewerConfig;
use crate::context::ViewerContext;
use crate::decoder::{DecodeInput, DecodeJob, DecoderPool};
use crate::error::{PipelineError, Result};
use crate::events::{CacheTier, EventBus, PipelineEvent, SubscriptionId};
use crate::future::{self, Completer, ResultFuture};
use crate::prefetch::Direction;
use log::{debug, info, warn};
use mangaview_cache::{
    Backend, GpuBackend, GpuTexture, ImageCache, PageId, Promotion, Raster, ResampleKey,
    TextureCache,
};
use mangaview_scheduler::{JobId, JobPriority, SchedulerStats};
use mangaview_source::{open_source_with, ExtractionProgress, OpenOptions, PageSource};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// What a request resolves to
#[derive(Debug, Clone, PartialEq)]
pub enum RenderPayload {
    /// CPU raster at the requested size
    Raster(Arc<Raster>),

    /// GPU texture at the requested size
    Texture(GpuTexture),
}

/// A displayable page
#[derive(Debug, Clone, PartialEq)]
pub struct Renderable {
    pub key: ResampleKey,
    pub payload: RenderPayload,
    cached: bool,
}

impl Renderable {
    fn raster(key: ResampleKey, raster: Arc<Raster>, cached: bool) -> Self {
        Self {
            key,
            payload: RenderPayload::Raster(raster),
            cached,
        }
    }

    fn texture(key: ResampleKey, texture: GpuTexture, cached: bool) -> Self {
        Self {
            key,
            payload: RenderPayload::Texture(texture),
            cached,
        }
    }

    /// Whether the payload is held by a cache
    ///
    /// Uncached payloads were too large for their cache. An uncached texture
    /// stays valid until the next [`Pipeline::process_gpu_work`] call.
    pub fn is_cached(&self) -> bool {
        self.cached
    }

    pub fn as_raster(&self) -> Option<&Arc<Raster>> {
        match &self.payload {
            RenderPayload::Raster(raster) => Some(raster),
            RenderPayload::Texture(_) => None,
        }
    }

    pub fn as_texture(&self) -> Option<GpuTexture> {
        match &self.payload {
            RenderPayload::Raster(_) => None,
            RenderPayload::Texture(texture) => Some(*texture),
        }
    }

    /// Pixel size of the payload
    pub fn size(&self) -> (u32, u32) {
        match &self.payload {
            RenderPayload::Raster(raster) => (raster.width, raster.height),
            RenderPayload::Texture(texture) => (texture.width, texture.height),
        }
    }
}

/// Future resolved with a [`Renderable`]
pub type RenderFuture = ResultFuture<Renderable>;

/// In-flight work for one key
struct PendingJob {
    requesters: Vec<Completer<Renderable>>,
    priority: JobPriority,

    /// Decoder job, `None` while waiting for the GPU stage
    job_id: Option<JobId>,
}

/// Texture to build on the GPU thread
struct GpuWork {
    key: ResampleKey,

    /// Freshly decoded raster; `None` means build from the image cache
    raster: Option<Arc<Raster>>,
}

struct Inner {
    context: Mutex<ViewerContext>,
    source: Arc<dyn PageSource>,
    images: ImageCache,
    textures: TextureCache,
    pending: Mutex<HashMap<ResampleKey, PendingJob>>,
    idle: Condvar,
    gpu_queue: Mutex<VecDeque<GpuWork>>,

    /// Uncached textures handed out during the last GPU pass
    transient: Mutex<Vec<GpuTexture>>,
    events: Arc<EventBus>,
    decoder: DecoderPool,
}

impl Inner {
    fn request(self: &Arc<Self>, key: ResampleKey, priority: JobPriority) -> RenderFuture {
        if key.target_width == 0 || key.target_height == 0 {
            return ResultFuture::ready(Err(PipelineError::InvalidTarget {
                width: key.target_width,
                height: key.target_height,
            }));
        }
        if key.algorithm.backend() != key.backend {
            return ResultFuture::ready(Err(PipelineError::unsupported_algorithm(key.algorithm)));
        }
        if key.page_id.index() as usize >= self.source.page_count() {
            return ResultFuture::ready(Err(PipelineError::NotFound(key.page_id.to_string())));
        }

        let (completer, future) = future::channel();
        let mut pending = self.pending.lock().unwrap();

        if let Some(job) = pending.get_mut(&key) {
            debug!("[Pipeline] {} attached to pending job", key);
            job.requesters.push(completer);
            if priority > job.priority {
                job.priority = priority;
                self.source.prepare(key.page_id, priority);
                if let Some(job_id) = job.job_id {
                    if self.decoder.reprioritize(job_id, priority) {
                        debug!("[Pipeline] {} upgraded to {:?}", key, priority);
                    }
                }
            }
            return future;
        }

        // Checked under the pending lock so a job finishing concurrently is seen
        if let Some(hit) = self.lookup(&key) {
            drop(pending);
            completer.complete(Ok(hit));
            return future;
        }

        let job_id = if key.backend == Backend::Gpu && self.images.find_for_page(key.page_id).is_some() {
            self.gpu_queue.lock().unwrap().push_back(GpuWork { key, raster: None });
            None
        } else {
            // Page data is fetched at the class of the job that needs it
            self.source.prepare(key.page_id, priority);
            Some(self.submit_decode(key, priority))
        };
        pending.insert(
            key,
            PendingJob {
                requesters: vec![completer],
                priority,
                job_id,
            },
        );
        future
    }

    fn lookup(&self, key: &ResampleKey) -> Option<Renderable> {
        match key.backend {
            Backend::Cpu => self
                .images
                .get(key)
                .map(|raster| Renderable::raster(*key, raster, true)),
            Backend::Gpu => self
                .textures
                .get(key)
                .map(|texture| Renderable::texture(*key, texture, true)),
        }
    }

    /// Queue a decode job; the caller holds the pending lock
    fn submit_decode(self: &Arc<Self>, key: ResampleKey, priority: JobPriority) -> JobId {
        let weak = Arc::downgrade(self);
        let job = DecodeJob::new(
            DecodeInput::Page {
                source: self.source.clone(),
                page_id: key.page_id,
            },
            key.target_width,
            key.target_height,
            key.algorithm,
            move |result: Result<Arc<Raster>>| {
                if let Some(inner) = weak.upgrade() {
                    inner.finish_decode(key, result);
                }
            },
        );
        self.decoder.submit(job, priority)
    }

    fn finish_decode(self: &Arc<Self>, key: ResampleKey, result: Result<Arc<Raster>>) {
        let raster = match result {
            Ok(raster) => raster,
            Err(PipelineError::Cancelled) => {
                // An interactive requester may have attached after the job left the queue
                let mut pending = self.pending.lock().unwrap();
                if let Some(job) = pending.get_mut(&key) {
                    if job.priority == JobPriority::Interactive {
                        job.job_id = Some(self.submit_decode(key, JobPriority::Interactive));
                        return;
                    }
                }
                drop(pending);
                self.resolve(key, Err(PipelineError::Cancelled));
                return;
            }
            Err(err) => {
                self.resolve(key, Err(err));
                return;
            }
        };

        match key.backend {
            Backend::Cpu => {
                let cached = self.store_image(key, &raster);
                self.resolve(key, Ok(Renderable::raster(key, raster, cached)));
            }
            Backend::Gpu => {
                // Source resolution, keyed by its own size
                self.store_image(key.with_size(raster.width, raster.height), &raster);
                if let Some(job) = self.pending.lock().unwrap().get_mut(&key) {
                    job.job_id = None;
                }
                self.gpu_queue.lock().unwrap().push_back(GpuWork {
                    key,
                    raster: Some(raster),
                });
            }
        }
    }

    /// Insert into the image cache; `false` if the raster did not fit
    fn store_image(&self, key: ResampleKey, raster: &Arc<Raster>) -> bool {
        match self.images.put(key, raster.clone(), raster.byte_size()) {
            Ok(evicted) => {
                self.emit_evicted(evicted, CacheTier::Image);
                self.events.emit(&PipelineEvent::ImageCached {
                    key,
                    byte_size: raster.byte_size(),
                });
                true
            }
            Err(err) => {
                warn!("[Pipeline] {} delivered uncached: {}", key, err);
                false
            }
        }
    }

    fn emit_evicted(&self, keys: Vec<ResampleKey>, tier: CacheTier) {
        for key in keys {
            self.events.emit(&PipelineEvent::Evicted { key, tier });
        }
    }

    /// Remove the pending job and deliver `result` to every requester
    fn resolve(&self, key: ResampleKey, result: Result<Renderable>) {
        let job = {
            let mut pending = self.pending.lock().unwrap();
            let job = pending.remove(&key);
            if pending.is_empty() {
                self.idle.notify_all();
            }
            job
        };

        if let Err(err) = &result {
            if *err != PipelineError::Cancelled {
                warn!("[Pipeline] request for {} failed: {}", key, err);
                self.events.emit(&PipelineEvent::RequestFailed {
                    key,
                    error: err.clone(),
                });
            }
        }
        if let Some(job) = job {
            for requester in job.requesters {
                requester.complete(result.clone());
            }
        }
    }

    fn process_gpu_work(self: &Arc<Self>, backend: &mut dyn GpuBackend) -> usize {
        for texture in self.transient.lock().unwrap().drain(..) {
            backend.release(texture);
        }
        self.textures.release_evicted(backend);

        let work: Vec<GpuWork> = self.gpu_queue.lock().unwrap().drain(..).collect();
        let mut completed = 0;
        for item in work {
            let key = item.key;
            let outcome = match &item.raster {
                Some(raster) => self.textures.insert_from_raster(&key, raster, backend),
                None => self.textures.promote(&key, &self.images, backend),
            };
            match outcome {
                Ok(Promotion::Miss) => {
                    // The raster was evicted after the request was queued
                    let mut pending = self.pending.lock().unwrap();
                    if let Some(job) = pending.get_mut(&key) {
                        let priority = job.priority;
                        self.source.prepare(key.page_id, priority);
                        job.job_id = Some(self.submit_decode(key, priority));
                    }
                    continue;
                }
                Ok(Promotion::Cached(texture)) => {
                    self.events.emit(&PipelineEvent::TextureCached {
                        key,
                        vram_size: texture.vram_size,
                    });
                    self.resolve(key, Ok(Renderable::texture(key, texture, true)));
                }
                Ok(Promotion::Uncached(texture)) => {
                    self.transient.lock().unwrap().push(texture);
                    self.resolve(key, Ok(Renderable::texture(key, texture, false)));
                }
                Err(err) => self.resolve(key, Err(PipelineError::Gpu(err))),
            }
            completed += 1;
        }

        self.textures.release_evicted(backend);
        completed
    }
}

/// Cache + prefetch + resampling pipeline for one page source
///
/// # Example
///
/// ```no_run
/// use mangaview_core::{Pipeline, ViewerConfig};
/// use mangaview_cache::PageId;
///
/// let pipeline = Pipeline::open("volume01.cbz".as_ref(), ViewerConfig::default())?;
/// let page = pipeline.display_page(PageId::new(0), (1200, 1800)).wait()?;
/// println!("{:?} cached={}", page.size(), page.is_cached());
/// # Ok::<(), mangaview_core::PipelineError>(())
/// ```
pub struct Pipeline {
    inner: Arc<Inner>,
}

impl Pipeline {
    /// Build a pipeline over an open source
    pub fn new(source: Arc<dyn PageSource>, config: ViewerConfig) -> Result<Self> {
        config.validate()?;
        let decoder = DecoderPool::new(config.decode_workers)
            .map_err(|err| PipelineError::Io(format!("cannot start decode workers: {}", err)))?;
        let events = Arc::new(EventBus::new());

        let progress_events = events.clone();
        source.set_progress_observer(Arc::new(move |progress: ExtractionProgress| {
            progress_events.emit(&PipelineEvent::ExtractionProgress(progress));
        }));

        info!(
            "[Pipeline] {} pages from {}, {} decode workers, L2 {} MB, L1 {} MB",
            source.page_count(),
            source.path().display(),
            decoder.num_workers(),
            config.cache_size_l2_mb,
            config.cache_size_l1_mb
        );

        let inner = Inner {
            images: ImageCache::new(config.l2_bytes()),
            textures: TextureCache::new(config.l1_bytes()),
            context: Mutex::new(ViewerContext::new(source.clone(), config)),
            source,
            pending: Mutex::new(HashMap::new()),
            idle: Condvar::new(),
            gpu_queue: Mutex::new(VecDeque::new()),
            transient: Mutex::new(Vec::new()),
            events,
            decoder,
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Open a folder, image or archive and build a pipeline over it
    pub fn open(path: &Path, config: ViewerConfig) -> Result<Self> {
        let options = OpenOptions {
            extract_in_background: config.extract_in_background,
        };
        let source = open_source_with(path, options)?;
        Self::new(source, config)
    }

    /// Request one rendering of one page
    ///
    /// Resolves at once on a cache hit. Otherwise the request joins the job in
    /// flight for `key`, or starts one. An interactive request for a key whose
    /// speculative job is still queued moves that job to the interactive class.
    pub fn request_image(&self, key: ResampleKey, priority: JobPriority) -> RenderFuture {
        self.inner.request(key, priority)
    }

    /// Show `page` at `size`, prefetching the pages that are likely next
    ///
    /// Updates the navigation history, pins the current page and the prefetch
    /// window at this size in both caches, moves the extraction focus and issues speculative requests for
    /// the window. On a direction reversal, queued speculative jobs outside
    /// the new window are cancelled.
    pub fn display_page(&self, page: PageId, size: (u32, u32)) -> RenderFuture {
        let (plan, key) = {
            let mut context = self.inner.context.lock().unwrap();
            match context.navigate(page) {
                Ok(plan) => (plan, context.key_for(page, size.0, size.1)),
                Err(err) => return ResultFuture::ready(Err(err)),
            }
        };

        let pinned: Vec<ResampleKey> = plan.pinned().into_iter().map(|p| key.with_page(p)).collect();
        self.inner.images.set_pinned_keys(pinned.iter().copied());
        self.inner.textures.set_pinned_keys(pinned);
        self.inner.source.set_focus(page);

        if plan.reversed {
            let cancelled = self.inner.decoder.cancel_queued(|job| {
                job.priority == JobPriority::Speculative
                    && job.payload.page_id().is_some_and(|p| !plan.covers(p))
            });
            debug!(
                "[Pipeline] direction now {:?}, cancelled {} prefetch jobs",
                plan.direction, cancelled
            );
        }
        self.inner.events.emit(&PipelineEvent::CurrentPageChanged {
            page,
            direction: plan.direction,
        });

        let future = self.inner.request(key, JobPriority::Interactive);
        for &ahead in &plan.pages {
            // Speculative results land in the caches; nobody waits on them
            let _ = self.inner.request(key.with_page(ahead), JobPriority::Speculative);
        }
        if !plan.pages.is_empty() {
            self.inner.events.emit(&PipelineEvent::PrefetchScheduled { pages: plan.pages });
        }
        future
    }

    /// Run the GPU stage; call from the thread that owns the graphics context
    ///
    /// Releases textures evicted since the last call, builds queued textures
    /// and resolves their requesters. Returns how many requests completed.
    pub fn process_gpu_work(&self, backend: &mut dyn GpuBackend) -> usize {
        self.inner.process_gpu_work(backend)
    }

    /// Whether textures are waiting for [`Pipeline::process_gpu_work`]
    pub fn has_gpu_work(&self) -> bool {
        !self.inner.gpu_queue.lock().unwrap().is_empty()
    }

    /// Drop every texture and release it through `backend`
    pub fn release_textures(&self, backend: &mut dyn GpuBackend) {
        self.inner.textures.clear();
        self.inner.textures.release_evicted(backend);
        for texture in self.inner.transient.lock().unwrap().drain(..) {
            backend.release(texture);
        }
    }

    /// Apply a new configuration to the running pipeline
    ///
    /// Cache budgets shrink or grow immediately, evicting LRU entries to fit.
    /// Algorithms and prefetch depth apply to later requests. The number of
    /// decode workers is fixed for the pipeline's lifetime.
    pub fn apply_config(&self, config: ViewerConfig) -> Result<()> {
        config.validate()?;
        let evicted = self.inner.images.set_capacity(config.l2_bytes());
        self.inner.emit_evicted(evicted, CacheTier::Image);
        let evicted = self.inner.textures.set_capacity(config.l1_bytes());
        self.inner.emit_evicted(evicted, CacheTier::Texture);

        let mut context = self.inner.context.lock().unwrap();
        if context.config().decode_workers != config.decode_workers {
            warn!("[Pipeline] decode worker count changes on next open");
        }
        context.set_config(config);
        Ok(())
    }

    /// Block until no request is in flight, or `timeout` elapses
    ///
    /// GPU requests only finish through [`Pipeline::process_gpu_work`].
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut pending = self.inner.pending.lock().unwrap();
        while !pending.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            pending = self.inner.idle.wait_timeout(pending, deadline - now).unwrap().0;
        }
        true
    }

    /// Register an observer for pipeline events
    pub fn subscribe<F>(&self, observer: F) -> SubscriptionId
    where
        F: Fn(&PipelineEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(observer)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.events.unsubscribe(id)
    }

    pub fn images(&self) -> &ImageCache {
        &self.inner.images
    }

    pub fn textures(&self) -> &TextureCache {
        &self.inner.textures
    }

    pub fn source(&self) -> &Arc<dyn PageSource> {
        &self.inner.source
    }

    pub fn page_count(&self) -> usize {
        self.inner.source.page_count()
    }

    pub fn config(&self) -> ViewerConfig {
        self.inner.context.lock().unwrap().config().clone()
    }

    pub fn current_page(&self) -> Option<PageId> {
        self.inner.context.lock().unwrap().current_page()
    }

    pub fn direction(&self) -> Direction {
        self.inner.context.lock().unwrap().direction()
    }

    /// Keys with a job in flight
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.lock().unwrap().len()
    }

    /// Decoder queue statistics
    pub fn decoder_stats(&self) -> SchedulerStats {
        self.inner.decoder.stats()
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        // Join workers while this handle still keeps the shared state alive
        self.inner.decoder.shutdown();
        self.inner.source.set_progress_observer(Arc::new(|_: ExtractionProgress| {}));
    }
}
