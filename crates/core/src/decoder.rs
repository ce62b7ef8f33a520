//! Decoder/resampler pool
//!
//! A fixed set of worker threads pulls [`DecodeJob`]s from a two-class
//! priority queue: interactive jobs always run before queued speculative ones,
//! and jobs of one class run in submission order. A job fetches its encoded
//! bytes (possibly waiting on archive extraction), decodes them to RGBA8 and
//! resamples the result with the requested CPU algorithm. Jobs for a GPU
//! algorithm stop after decoding; the GPU stage resamples.

use crate::error::{PipelineError, Result};
use crate::future::{self, ResultFuture};
use crate::resample::{self, ResampleError};
use mangaview_cache::{AlgorithmId, Backend, PageId, Raster};
use mangaview_scheduler::{
    CancellationToken, Job, JobExecutor, JobId, JobPriority, JobScheduler, SchedulerStats,
    WorkerPool, WorkerPoolConfig,
};
use mangaview_source::PageSource;
use log::{debug, warn};
use std::borrow::Cow;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Where a job gets its encoded bytes
pub enum DecodeInput {
    /// Bytes already in memory
    Bytes(Vec<u8>),

    /// A page fetched inside the worker
    Page {
        source: Arc<dyn PageSource>,
        page_id: PageId,
    },
}

/// Called once with the job's outcome
pub type DecodeCallback = Box<dyn FnOnce(Result<Arc<Raster>>) + Send>;

/// Typed decode/resample job
pub struct DecodeJob {
    pub input: DecodeInput,
    pub target_width: u32,
    pub target_height: u32,
    pub algorithm: AlgorithmId,
    on_done: DecodeCallback,
}

impl DecodeJob {
    pub fn new<F>(
        input: DecodeInput,
        target_width: u32,
        target_height: u32,
        algorithm: AlgorithmId,
        on_done: F,
    ) -> Self
    where
        F: FnOnce(Result<Arc<Raster>>) + Send + 'static,
    {
        Self {
            input,
            target_width,
            target_height,
            algorithm,
            on_done: Box::new(on_done),
        }
    }

    /// Page decoded by this job, if it reads from a source
    pub fn page_id(&self) -> Option<PageId> {
        match &self.input {
            DecodeInput::Bytes(_) => None,
            DecodeInput::Page { page_id, .. } => Some(*page_id),
        }
    }

    /// Hand the outcome to the callback
    pub fn finish(self, result: Result<Arc<Raster>>) {
        (self.on_done)(result);
    }

    fn run(&self) -> Result<Raster> {
        if self.target_width == 0 || self.target_height == 0 {
            return Err(PipelineError::InvalidTarget {
                width: self.target_width,
                height: self.target_height,
            });
        }

        let page = self.page_id();
        let bytes: Cow<'_, [u8]> = match &self.input {
            DecodeInput::Bytes(bytes) => Cow::Borrowed(bytes.as_slice()),
            DecodeInput::Page { source, page_id } => Cow::Owned(source.fetch_raw_bytes(*page_id)?),
        };

        let started = Instant::now();
        let decoded = decode_rgba(page, &bytes)?;
        if self.algorithm.backend() == Backend::Gpu {
            return Ok(decoded);
        }

        let resampled = resample::resample(
            &decoded,
            self.target_width,
            self.target_height,
            self.algorithm,
        )
        .map_err(|err| resample_error(page, err))?;
        debug!(
            "[Decoder] {} {}x{} -> {}x{} ({}) in {:?}",
            page.map_or_else(|| "bytes".to_string(), |p| p.to_string()),
            decoded.width,
            decoded.height,
            resampled.width,
            resampled.height,
            self.algorithm,
            started.elapsed()
        );
        Ok(resampled)
    }
}

/// Decode encoded image bytes to an RGBA8 raster
pub fn decode_rgba(page: Option<PageId>, bytes: &[u8]) -> Result<Raster> {
    let image = image::load_from_memory(bytes).map_err(|err| PipelineError::decode(page, err))?;
    let rgba = image.into_rgba8();
    let (width, height) = rgba.dimensions();
    Raster::new(width, height, rgba.into_raw())
        .ok_or_else(|| PipelineError::decode(page, "pixel buffer does not match dimensions"))
}

fn resample_error(page: Option<PageId>, err: ResampleError) -> PipelineError {
    match err {
        ResampleError::InvalidTarget { width, height } => {
            PipelineError::InvalidTarget { width, height }
        }
        ResampleError::UnsupportedAlgorithm(algorithm) => {
            PipelineError::unsupported_algorithm(algorithm)
        }
        other => PipelineError::decode(page, other),
    }
}

fn execute(job: Job<DecodeJob>, token: &CancellationToken) {
    let decode = job.payload;
    if token.is_cancelled() {
        decode.finish(Err(PipelineError::Cancelled));
        return;
    }

    let result = decode.run().map(Arc::new);
    if let Err(err) = &result {
        warn!("[Decoder] job {} failed: {}", job.id, err);
    }
    decode.finish(result);
}

/// Pool of decode workers
pub struct DecoderPool {
    scheduler: Arc<JobScheduler<DecodeJob>>,
    workers: Mutex<Option<WorkerPool<DecodeJob>>>,
    num_workers: usize,
}

impl DecoderPool {
    /// Start `num_workers` decode threads (0 = one per logical core)
    pub fn new(num_workers: usize) -> io::Result<Self> {
        let scheduler = Arc::new(JobScheduler::new());
        let executor: JobExecutor<DecodeJob> = Arc::new(execute);
        let config = WorkerPoolConfig::new(num_workers).with_thread_name("mangaview-decode");
        let workers = WorkerPool::new(scheduler.clone(), executor, config)?;
        let num_workers = workers.num_workers();

        Ok(Self {
            scheduler,
            workers: Mutex::new(Some(workers)),
            num_workers,
        })
    }

    /// Queue a job
    pub fn submit(&self, job: DecodeJob, priority: JobPriority) -> JobId {
        self.scheduler.submit(priority, job).0
    }

    /// Decode and resample in-memory bytes
    pub fn submit_bytes(
        &self,
        bytes: Vec<u8>,
        target_width: u32,
        target_height: u32,
        algorithm: AlgorithmId,
        priority: JobPriority,
    ) -> ResultFuture<Arc<Raster>> {
        let (completer, future) = future::channel();
        let job = DecodeJob::new(
            DecodeInput::Bytes(bytes),
            target_width,
            target_height,
            algorithm,
            move |result: Result<Arc<Raster>>| {
                completer.complete(result);
            },
        );
        self.submit(job, priority);
        future
    }

    /// Move a queued job to another priority class
    pub fn reprioritize(&self, job_id: JobId, priority: JobPriority) -> bool {
        self.scheduler.reprioritize(job_id, priority)
    }

    /// Remove queued jobs matching `predicate`, reporting them as cancelled
    ///
    /// Jobs already running are not affected. Returns how many were removed.
    pub fn cancel_queued<F>(&self, predicate: F) -> usize
    where
        F: Fn(&Job<DecodeJob>) -> bool,
    {
        let removed = self.scheduler.cancel_jobs_if(predicate);
        let count = removed.len();
        for job in removed {
            job.payload.finish(Err(PipelineError::Cancelled));
        }
        if count > 0 {
            debug!("[Decoder] cancelled {} queued jobs", count);
        }
        count
    }

    /// Queue statistics
    pub fn stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    /// Jobs waiting for a worker
    pub fn queued(&self) -> usize {
        self.scheduler.pending_jobs()
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Stop the workers and fail every queued job with [`PipelineError::ShutDown`]
    ///
    /// Running jobs finish first. Safe to call more than once.
    pub fn shutdown(&self) {
        let workers = self.workers.lock().unwrap().take();
        if let Some(workers) = workers {
            workers.shutdown();
        }
        for job in self.scheduler.clear() {
            job.payload.finish(Err(PipelineError::ShutDown));
        }
    }
}

impl Drop for DecoderPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
