use image::{ImageFormat, Rgba, RgbaImage};
use mangaview_cache::{AlgorithmId, Backend, PageId, Promotion, Raster, ResampleKey};
use mangaview_core::{
    CacheTier, Direction, Pipeline, PipelineError, PipelineEvent, SoftwareGpu, ViewerConfig,
};
use mangaview_scheduler::JobPriority;
use mangaview_source::{
    ArchiveSource, MemberExtractor, OpenOptions, PageSource, SourceError, SourceKind,
};
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::{mpsc, Arc, Barrier, Mutex};
use std::thread;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(10);

fn png(width: u32, height: u32, color: [u8; 4]) -> Vec<u8> {
    let mut bytes = Vec::new();
    RgbaImage::from_pixel(width, height, Rgba(color))
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

fn write_folder(dir: &Path, pages: u32, width: u32, height: u32) {
    for page in 0..pages {
        let shade = (page * 40 % 256) as u8;
        std::fs::write(
            dir.join(format!("page{}.png", page + 1)),
            png(width, height, [shade, 100, 200, 255]),
        )
        .unwrap();
    }
}

/// Resampling a flat color may round by one step
fn assert_color(actual: Option<[u8; 4]>, expected: [u8; 4]) {
    let actual = actual.expect("pixel inside the raster");
    for (a, e) in actual.iter().zip(expected) {
        assert!(a.abs_diff(e) <= 1, "{:?} != {:?}", actual, expected);
    }
}

fn cpu_key(page: u32, width: u32, height: u32) -> ResampleKey {
    ResampleKey::new(PageId::new(page), width, height, AlgorithmId::Lanczos3, Backend::Cpu)
}

/// In-memory source; one page can be held until released, another can fail
struct TestSource {
    pages: Vec<Vec<u8>>,
    gated_page: Option<u32>,
    gate: Mutex<Option<mpsc::Receiver<()>>>,
    entered: Mutex<Option<mpsc::Sender<()>>>,
    failing_page: Option<u32>,
    fetched: Mutex<Vec<PageId>>,
}

struct Gate {
    release: mpsc::Sender<()>,
    entered: mpsc::Receiver<()>,
}

impl Gate {
    /// Wait until a worker is blocked inside the gated fetch
    fn wait_entered(&self) {
        self.entered.recv_timeout(WAIT).expect("gated page was fetched");
    }

    fn open(&self) {
        self.release.send(()).unwrap();
    }
}

impl TestSource {
    fn new(count: u32, side: u32) -> Self {
        Self {
            pages: (0..count).map(|_| png(side, side, [50, 60, 70, 255])).collect(),
            gated_page: None,
            gate: Mutex::new(None),
            entered: Mutex::new(None),
            failing_page: None,
            fetched: Mutex::new(Vec::new()),
        }
    }

    fn gated(count: u32, side: u32, page: u32) -> (Self, Gate) {
        let (release, gate) = mpsc::channel();
        let (entered_tx, entered) = mpsc::channel();
        let mut source = Self::new(count, side);
        source.gated_page = Some(page);
        source.gate = Mutex::new(Some(gate));
        source.entered = Mutex::new(Some(entered_tx));
        (source, Gate { release, entered })
    }

    fn fetched(&self) -> Vec<PageId> {
        self.fetched.lock().unwrap().clone()
    }
}

impl PageSource for TestSource {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn page_id_at(&self, index: usize) -> Option<PageId> {
        (index < self.pages.len()).then(|| PageId::new(index as u32))
    }

    fn page_name(&self, _page_id: PageId) -> Option<&str> {
        None
    }

    fn fetch_raw_bytes(&self, page_id: PageId) -> mangaview_source::Result<Vec<u8>> {
        self.fetched.lock().unwrap().push(page_id);
        if self.gated_page == Some(page_id.index()) {
            let gate = self.gate.lock().unwrap().take();
            if let Some(gate) = gate {
                if let Some(entered) = self.entered.lock().unwrap().take() {
                    let _ = entered.send(());
                }
                let _ = gate.recv_timeout(WAIT);
            }
        }
        if self.failing_page == Some(page_id.index()) {
            return Err(SourceError::ExtractionFailed {
                member: format!("{:03}.png", page_id.index()),
                reason: "invalid compressed data".into(),
            });
        }
        Ok(self.pages[page_id.index() as usize].clone())
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Archive
    }

    fn path(&self) -> &Path {
        Path::new("memory.cbz")
    }
}

fn single_worker() -> ViewerConfig {
    ViewerConfig::default().with_decode_workers(1)
}

fn collect_events(pipeline: &Pipeline) -> Arc<Mutex<Vec<PipelineEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    pipeline.subscribe(move |event: &PipelineEvent| sink.lock().unwrap().push(event.clone()));
    events
}

/// Drive the GPU stage until `done` holds
fn pump_gpu(pipeline: &Pipeline, gpu: &mut SoftwareGpu, done: impl Fn() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !done() {
        assert!(Instant::now() < deadline, "GPU work did not finish");
        if pipeline.process_gpu_work(gpu) == 0 {
            thread::sleep(Duration::from_millis(1));
        }
    }
}

#[test]
fn test_three_image_folder_prefetches_window() {
    let dir = tempfile::tempdir().unwrap();
    write_folder(dir.path(), 3, 64, 96);
    let config = ViewerConfig::default().with_prefetch_count(2);
    let pipeline = Pipeline::open(dir.path(), config).unwrap();
    let events = collect_events(&pipeline);

    let page = pipeline.display_page(PageId::new(0), (32, 48)).wait().unwrap();
    assert_eq!(page.size(), (32, 48));
    assert!(page.is_cached());
    assert!(pipeline.wait_idle(WAIT));

    for index in 0..3 {
        assert!(pipeline.images().contains(&cpu_key(index, 32, 48)), "page {}", index);
    }
    assert_eq!(
        pipeline.images().pinned_pages(),
        vec![PageId::new(0), PageId::new(1), PageId::new(2)]
    );

    let events = events.lock().unwrap();
    assert!(events.contains(&PipelineEvent::PrefetchScheduled {
        pages: vec![PageId::new(1), PageId::new(2)]
    }));
    assert!(events.contains(&PipelineEvent::CurrentPageChanged {
        page: PageId::new(0),
        direction: Direction::Forward
    }));
}

#[test]
fn test_identical_concurrent_requests_decode_once() {
    let (source, gate) = TestSource::gated(1, 40, 0);
    let source = Arc::new(source);
    let pipeline = Arc::new(Pipeline::new(source.clone(), single_worker()).unwrap());
    let key = cpu_key(0, 20, 20);

    let first = pipeline.request_image(key, JobPriority::Interactive);
    gate.wait_entered();

    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let pipeline = pipeline.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                pipeline.request_image(key, JobPriority::Interactive)
            })
        })
        .collect();
    let futures: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(pipeline.pending_requests(), 1);
    gate.open();

    let expected = first.wait().unwrap();
    for future in futures {
        let page = future.wait().unwrap();
        assert!(Arc::ptr_eq(page.as_raster().unwrap(), expected.as_raster().unwrap()));
    }

    // Later requests are cache hits
    let again = pipeline.request_image(key, JobPriority::Interactive).wait().unwrap();
    assert!(Arc::ptr_eq(again.as_raster().unwrap(), expected.as_raster().unwrap()));
    assert_eq!(source.fetched(), vec![PageId::new(0)]);
    assert_eq!(pipeline.decoder_stats().jobs_submitted, 1);
}

#[test]
fn test_failure_reaches_every_requester() {
    let (mut source, gate) = TestSource::gated(2, 16, 1);
    source.failing_page = Some(1);
    let pipeline = Pipeline::new(Arc::new(source), single_worker()).unwrap();
    let events = collect_events(&pipeline);
    let key = cpu_key(1, 8, 8);

    let futures: Vec<_> = (0..3)
        .map(|_| pipeline.request_image(key, JobPriority::Interactive))
        .collect();
    gate.wait_entered();
    gate.open();

    let errors: Vec<_> = futures.into_iter().map(|f| f.wait().unwrap_err()).collect();
    assert!(matches!(errors[0], PipelineError::ExtractionFailed { .. }));
    assert!(errors.iter().all(|err| *err == errors[0]));
    assert!(!pipeline.images().contains(&key));

    let failures = events
        .lock()
        .unwrap()
        .iter()
        .filter(|event| matches!(event, PipelineEvent::RequestFailed { .. }))
        .count();
    assert_eq!(failures, 1);

    // No automatic retry, but a new request starts a new job
    let _ = pipeline.request_image(key, JobPriority::Interactive).wait();
    assert_eq!(pipeline.decoder_stats().jobs_submitted, 2);
}

#[test]
fn test_malformed_page_is_decode_error() {
    let mut source = TestSource::new(1, 8);
    source.pages[0] = b"definitely not a png".to_vec();
    let pipeline = Pipeline::new(Arc::new(source), single_worker()).unwrap();

    let err = pipeline
        .request_image(cpu_key(0, 4, 4), JobPriority::Interactive)
        .wait()
        .unwrap_err();
    assert!(matches!(err, PipelineError::Decode { .. }));
}

#[test]
fn test_lru_evicts_least_recently_accessed() {
    // 300x300 RGBA rasters: two fit in 1 MB, three do not
    let source = Arc::new(TestSource::new(3, 600));
    let config = single_worker().with_l2_mb(1);
    let pipeline = Pipeline::new(source, config).unwrap();
    let events = collect_events(&pipeline);

    let first = cpu_key(0, 300, 300);
    let second = cpu_key(1, 300, 300);
    let third = cpu_key(2, 300, 300);
    pipeline.request_image(first, JobPriority::Interactive).wait().unwrap();
    pipeline.request_image(second, JobPriority::Interactive).wait().unwrap();

    // Touch the first entry so the second is the oldest
    assert!(pipeline.request_image(first, JobPriority::Interactive).wait().unwrap().is_cached());
    pipeline.request_image(third, JobPriority::Interactive).wait().unwrap();

    assert!(pipeline.images().contains(&first));
    assert!(!pipeline.images().contains(&second));
    assert!(pipeline.images().contains(&third));
    assert!(pipeline.images().used_bytes() <= pipeline.images().capacity_bytes());
    assert!(events.lock().unwrap().contains(&PipelineEvent::Evicted {
        key: second,
        tier: CacheTier::Image
    }));
}

#[test]
fn test_pinned_window_is_not_evicted() {
    let source = Arc::new(TestSource::new(4, 600));
    let config = single_worker().with_l2_mb(1).with_prefetch_count(1);
    let pipeline = Pipeline::new(source, config).unwrap();

    pipeline.display_page(PageId::new(0), (300, 300)).wait().unwrap();
    assert!(pipeline.wait_idle(WAIT));
    assert!(pipeline.images().contains(&cpu_key(1, 300, 300)));

    // Page 3 is outside the window; the cache is full of pinned pages
    let outside = pipeline
        .request_image(cpu_key(3, 300, 300), JobPriority::Interactive)
        .wait()
        .unwrap();
    assert!(!outside.is_cached());
    assert_eq!(outside.size(), (300, 300));
    assert!(pipeline.images().contains(&cpu_key(0, 300, 300)));
    assert!(pipeline.images().contains(&cpu_key(1, 300, 300)));
    assert_eq!(pipeline.images().stats().rejected, 1);
}

#[test]
fn test_resized_window_is_cached_again() {
    let source = Arc::new(TestSource::new(4, 600));
    let config = single_worker().with_l2_mb(1).with_prefetch_count(1);
    let pipeline = Pipeline::new(source.clone(), config).unwrap();

    pipeline.display_page(PageId::new(0), (300, 300)).wait().unwrap();
    assert!(pipeline.wait_idle(WAIT));

    // The old size of the current page makes room for the new one
    let resized = pipeline.display_page(PageId::new(0), (290, 290)).wait().unwrap();
    assert!(resized.is_cached());
    assert!(pipeline.wait_idle(WAIT));
    let again = pipeline.display_page(PageId::new(0), (290, 290)).wait().unwrap();
    assert!(again.is_cached());

    assert!(!pipeline.images().contains(&cpu_key(0, 300, 300)));
    assert!(pipeline.images().contains(&cpu_key(1, 290, 290)));
    assert_eq!(pipeline.images().stats().rejected, 0);
    let decodes = source.fetched().into_iter().filter(|page| *page == PageId::new(0)).count();
    assert_eq!(decodes, 2);
}

#[test]
fn test_interactive_request_upgrades_queued_prefetch() {
    let (source, gate) = TestSource::gated(4, 16, 0);
    let source = Arc::new(source);
    let pipeline = Pipeline::new(source.clone(), single_worker()).unwrap();

    let _blocking = pipeline.request_image(cpu_key(0, 8, 8), JobPriority::Interactive);
    gate.wait_entered();
    for page in 1..4 {
        let _ = pipeline.request_image(cpu_key(page, 8, 8), JobPriority::Speculative);
    }
    let upgraded = pipeline.request_image(cpu_key(3, 8, 8), JobPriority::Interactive);
    gate.open();

    upgraded.wait().unwrap();
    assert!(pipeline.wait_idle(WAIT));
    assert_eq!(
        source.fetched(),
        vec![PageId::new(0), PageId::new(3), PageId::new(1), PageId::new(2)]
    );
    assert_eq!(pipeline.decoder_stats().jobs_reprioritized, 1);
}

#[test]
fn test_reversal_cancels_prefetch_outside_window() {
    let (source, gate) = TestSource::gated(12, 16, 5);
    let source = Arc::new(source);
    let config = single_worker().with_prefetch_count(3);
    let pipeline = Pipeline::new(source.clone(), config).unwrap();

    let _five = pipeline.display_page(PageId::new(5), (8, 8));
    gate.wait_entered();
    let four = pipeline.display_page(PageId::new(4), (8, 8));
    assert_eq!(pipeline.direction(), Direction::Backward);
    gate.open();

    four.wait().unwrap();
    assert!(pipeline.wait_idle(WAIT));
    let fetched = source.fetched();
    for page in [6, 7, 8] {
        assert!(!fetched.contains(&PageId::new(page)), "page {} was decoded", page);
    }
    for page in [1, 2, 3, 4] {
        assert!(fetched.contains(&PageId::new(page)));
    }
    assert_eq!(pipeline.decoder_stats().jobs_cancelled, 3);
}

#[test]
fn test_cancel_detaches_only_one_requester() {
    let (source, gate) = TestSource::gated(1, 16, 0);
    let pipeline = Pipeline::new(Arc::new(source), single_worker()).unwrap();
    let key = cpu_key(0, 8, 8);

    let kept = pipeline.request_image(key, JobPriority::Interactive);
    let dropped = pipeline.request_image(key, JobPriority::Interactive);
    gate.wait_entered();
    dropped.cancel();
    gate.open();

    assert!(kept.wait().is_ok());
    assert_eq!(dropped.wait(), Err(PipelineError::Cancelled));
    assert!(pipeline.images().contains(&key));
}

#[test]
fn test_gpu_request_fills_both_caches() {
    let source = Arc::new(TestSource::new(2, 64));
    let config = single_worker().with_gpu(true);
    let pipeline = Pipeline::new(source, config).unwrap();
    let mut gpu = SoftwareGpu::new();
    let events = collect_events(&pipeline);

    let key = ResampleKey::new(PageId::new(0), 32, 32, AlgorithmId::GlQuintic, Backend::Gpu);
    let future = pipeline.request_image(key, JobPriority::Interactive);
    pump_gpu(&pipeline, &mut gpu, || future.is_ready());

    let page = future.wait().unwrap();
    let texture = page.as_texture().unwrap();
    assert_eq!((texture.width, texture.height), (32, 32));
    assert_color(gpu.download(&texture).unwrap().pixel(4, 4), [50, 60, 70, 255]);
    assert_eq!(pipeline.textures().get(&key), Some(texture));

    // L2 keeps the source-resolution raster, keyed by its own size
    let (source_key, raster) = pipeline.images().find_for_page(PageId::new(0)).unwrap();
    assert_eq!(source_key, key.with_size(64, 64));
    assert_eq!((raster.width, raster.height), (64, 64));
    assert!(pipeline.images().get(&key).is_none());
    assert!(events.lock().unwrap().contains(&PipelineEvent::TextureCached {
        key,
        vram_size: 32 * 32 * 4
    }));
}

#[test]
fn test_promote_round_trip() {
    let source = Arc::new(TestSource::new(2, 64));
    let pipeline = Pipeline::new(source.clone(), single_worker().with_gpu(true)).unwrap();
    let mut gpu = SoftwareGpu::new();

    // Nothing decoded for page 1 yet: promotion misses
    let missing = ResampleKey::new(PageId::new(1), 16, 16, AlgorithmId::GlLanczos3, Backend::Gpu);
    let promotion = pipeline
        .textures()
        .promote(&missing, pipeline.images(), &mut gpu)
        .unwrap();
    assert_eq!(promotion, Promotion::Miss);

    // The full pipeline then succeeds and leaves both caches consistent
    let future = pipeline.request_image(missing, JobPriority::Interactive);
    pump_gpu(&pipeline, &mut gpu, || future.is_ready());
    future.wait().unwrap();
    assert!(pipeline.textures().contains(&missing));
    assert!(pipeline.images().find_for_page(PageId::new(1)).is_some());

    // A new size for the same page is promoted without decoding again
    let resized = ResampleKey { target_width: 24, ..missing };
    let promotion = pipeline
        .textures()
        .promote(&resized, pipeline.images(), &mut gpu)
        .unwrap();
    assert!(promotion.succeeded());
    assert_eq!(source.fetched(), vec![PageId::new(1)]);
}

#[test]
fn test_gpu_request_promotes_from_image_cache() {
    let source = Arc::new(TestSource::new(1, 64));
    let pipeline = Pipeline::new(source.clone(), single_worker().with_gpu(true)).unwrap();
    let mut gpu = SoftwareGpu::new();

    let small = ResampleKey::new(PageId::new(0), 16, 16, AlgorithmId::GlBilinear, Backend::Gpu);
    let future = pipeline.request_image(small, JobPriority::Interactive);
    pump_gpu(&pipeline, &mut gpu, || future.is_ready());
    future.wait().unwrap();

    let large = ResampleKey { target_width: 48, target_height: 48, ..small };
    let future = pipeline.request_image(large, JobPriority::Interactive);
    assert!(pipeline.has_gpu_work());
    pump_gpu(&pipeline, &mut gpu, || future.is_ready());

    assert_eq!(future.wait().unwrap().size(), (48, 48));
    assert_eq!(source.fetched().len(), 1);
}

#[test]
fn test_gpu_miss_keeps_cached_textures() {
    let source = Arc::new(TestSource::new(2, 64));
    // One 512x512 texture fills the 1 MB texture budget
    let config = single_worker().with_gpu(true).with_l1_mb(1);
    let pipeline = Pipeline::new(source, config).unwrap();
    let mut gpu = SoftwareGpu::new();

    let first = ResampleKey::new(PageId::new(0), 512, 512, AlgorithmId::GlBilinear, Backend::Gpu);
    let future = pipeline.request_image(first, JobPriority::Interactive);
    pump_gpu(&pipeline, &mut gpu, || future.is_ready());
    assert!(future.wait().unwrap().is_cached());

    // Page 1 is queued for promotion, then its raster leaves the image cache
    let second = first.with_page(PageId::new(1));
    let source_key = second.with_size(64, 64);
    let raster = Arc::new(Raster::filled(64, 64, [1, 2, 3, 255]));
    pipeline.images().put(source_key, raster.clone(), raster.byte_size()).unwrap();
    let future = pipeline.request_image(second, JobPriority::Interactive);
    assert!(pipeline.has_gpu_work());
    pipeline.images().remove(&source_key);

    assert_eq!(pipeline.process_gpu_work(&mut gpu), 0);
    assert!(pipeline.textures().contains(&first));
    assert_eq!(pipeline.textures().stats().evictions, 0);

    // The page is decoded again and only then displaces the first texture
    pump_gpu(&pipeline, &mut gpu, || future.is_ready());
    assert_eq!(future.wait().unwrap().size(), (512, 512));
    assert!(!pipeline.textures().contains(&first));
}

#[test]
fn test_apply_config_resizes_caches() {
    let source = Arc::new(TestSource::new(3, 500));
    let pipeline = Pipeline::new(source, single_worker().with_l2_mb(4)).unwrap();
    let events = collect_events(&pipeline);

    for page in 0..3 {
        pipeline
            .request_image(cpu_key(page, 500, 500), JobPriority::Interactive)
            .wait()
            .unwrap();
    }
    assert_eq!(pipeline.images().len(), 3);

    let config = pipeline.config().with_l2_mb(1).with_prefetch_count(7);
    pipeline.apply_config(config).unwrap();
    assert_eq!(pipeline.images().len(), 1);
    assert!(pipeline.images().contains(&cpu_key(2, 500, 500)));
    assert_eq!(pipeline.config().prefetch_count, 7);

    let evictions = events
        .lock()
        .unwrap()
        .iter()
        .filter(|event| matches!(event, PipelineEvent::Evicted { tier: CacheTier::Image, .. }))
        .count();
    assert_eq!(evictions, 2);

    let invalid = pipeline.config().with_cpu_algorithm(AlgorithmId::GlNearest);
    assert!(matches!(
        pipeline.apply_config(invalid),
        Err(PipelineError::InvalidConfig(_))
    ));
}

#[test]
fn test_invalid_requests_resolve_immediately() {
    let pipeline = Pipeline::new(Arc::new(TestSource::new(1, 8)), single_worker()).unwrap();

    let zero = pipeline.request_image(cpu_key(0, 0, 4), JobPriority::Interactive);
    assert_eq!(
        zero.poll_result(),
        Some(Err(PipelineError::InvalidTarget { width: 0, height: 4 }))
    );

    let mismatched = ResampleKey::new(PageId::new(0), 4, 4, AlgorithmId::GlQuintic, Backend::Cpu);
    assert!(matches!(
        pipeline.request_image(mismatched, JobPriority::Interactive).poll_result(),
        Some(Err(PipelineError::UnsupportedAlgorithm(_)))
    ));

    assert!(matches!(
        pipeline.display_page(PageId::new(9), (4, 4)).poll_result(),
        Some(Err(PipelineError::NotFound(_)))
    ));
    assert_eq!(pipeline.pending_requests(), 0);
}

#[test]
fn test_unsubscribe_stops_events() {
    let pipeline = Pipeline::new(Arc::new(TestSource::new(1, 8)), single_worker()).unwrap();
    let count = Arc::new(Mutex::new(0));
    let counter = count.clone();
    let id = pipeline.subscribe(move |_: &PipelineEvent| *counter.lock().unwrap() += 1);
    assert!(pipeline.unsubscribe(id));

    pipeline.display_page(PageId::new(0), (4, 4)).wait().unwrap();
    assert_eq!(*count.lock().unwrap(), 0);
}

fn write_zip(path: &Path, pages: u32) {
    let file = std::fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::FileOptions::default();
    for page in (0..pages).rev() {
        zip.start_file(format!("chapter1/p{}.png", page + 1), options).unwrap();
        zip.write_all(&png(24, 24, [page as u8, 0, 0, 255])).unwrap();
    }
    zip.finish().unwrap();
}

#[test]
fn test_archive_pages_flow_through_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("volume.cbz");
    write_zip(&path, 12);

    let pipeline = Pipeline::open(&path, ViewerConfig::default().with_prefetch_count(2)).unwrap();
    assert_eq!(pipeline.page_count(), 12);

    // Natural order: p1, p2, ..., p10, p11, p12
    let page = pipeline.display_page(PageId::new(9), (12, 12)).wait().unwrap();
    assert_color(page.as_raster().unwrap().pixel(6, 6), [9, 0, 0, 255]);
    assert!(pipeline.wait_idle(WAIT));
    assert!(pipeline.images().contains(&cpu_key(11, 12, 12)));

    let deadline = Instant::now() + WAIT;
    while !pipeline.source().extraction_progress().unwrap().is_complete() {
        assert!(Instant::now() < deadline);
        thread::sleep(Duration::from_millis(5));
    }
    let progress = pipeline.source().extraction_progress().unwrap();
    assert_eq!((progress.ready, progress.failed), (12, 0));
}

/// Writes solid pages and records the order; the first extraction waits
struct HeldExtractor {
    order: Arc<Mutex<Vec<u32>>>,
    held: Option<(mpsc::Sender<()>, mpsc::Receiver<()>)>,
}

impl MemberExtractor for HeldExtractor {
    fn extract(&mut self, page_id: PageId, dest: &Path) -> mangaview_source::Result<()> {
        if let Some((entered, release)) = self.held.take() {
            let _ = entered.send(());
            let _ = release.recv_timeout(WAIT);
        }
        self.order.lock().unwrap().push(page_id.index());
        std::fs::write(dest, png(16, 16, [page_id.index() as u8, 0, 0, 255]))
            .map_err(|err| SourceError::io(dest, err))
    }
}

#[test]
fn test_archive_reversal_extracts_new_window_first() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let (entered_tx, entered) = mpsc::channel();
    let (release, release_rx) = mpsc::channel();
    let extractor = HeldExtractor {
        order: order.clone(),
        held: Some((entered_tx, release_rx)),
    };
    let names = (1..=12).map(|i| format!("p{}.png", i)).collect();
    let options = OpenOptions { extract_in_background: false };
    let archive = Arc::new(
        ArchiveSource::with_extractor(Path::new("held.cbz"), names, extractor, options).unwrap(),
    );
    let config = ViewerConfig::default().with_decode_workers(3).with_prefetch_count(2);
    let pipeline = Pipeline::new(archive.clone(), config).unwrap();

    // Workers block on pages 4, 5 and 6 while page 4 is being extracted
    let _four = pipeline.display_page(PageId::new(4), (8, 8));
    entered.recv_timeout(WAIT).expect("page 4 extraction started");
    let three = pipeline.display_page(PageId::new(3), (8, 8));
    assert_eq!(pipeline.direction(), Direction::Backward);

    // Pages 5 and 6 are behind the new window even though workers wait on them
    let queued = archive.coordinator().queued_order();
    assert_eq!(queued, [3, 2, 1, 5, 6].map(PageId::new).to_vec());

    release.send(()).unwrap();
    assert_color(three.wait().unwrap().as_raster().unwrap().pixel(4, 4), [3, 0, 0, 255]);
    let deadline = Instant::now() + WAIT;
    while order.lock().unwrap().len() < 6 {
        assert!(Instant::now() < deadline, "extraction stalled");
        thread::sleep(Duration::from_millis(2));
    }
    assert_eq!(*order.lock().unwrap(), vec![4, 3, 2, 1, 5, 6]);
    assert!(pipeline.wait_idle(WAIT));
}
