use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{debug, info};
use mangaview_cache::{AlgorithmId, Backend, CacheStats, PageId, Raster};
use mangaview_core::{Pipeline, RenderPayload, Renderable, SoftwareGpu, ViewerConfig};
use mangaview_scheduler::SchedulerStats;
use mangaview_source::{open_source_with, OpenOptions, SourceKind};
use serde::Serialize;
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const GPU_TIMEOUT: Duration = Duration::from_secs(30);
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Parser)]
#[command(name = "mangaview")]
#[command(about = "Page cache and resampling pipeline for image folders and comic archives")]
pub struct Cli {
    /// Log pipeline activity to stderr.
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Read configuration from FILE instead of the default location.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print machine-readable page list.
    Info {
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },
    /// Render one page at a target size to PNG.
    Render {
        #[arg(value_name = "PATH")]
        path: PathBuf,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long)]
        width: u32,
        #[arg(long)]
        height: u32,
        /// Resampling algorithm; a gl_* name selects the GPU path.
        #[arg(long)]
        algorithm: Option<AlgorithmId>,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Display every page in order and print cache statistics.
    Walk {
        #[arg(value_name = "PATH")]
        path: PathBuf,
        #[arg(long, default_value_t = 800)]
        width: u32,
        #[arg(long, default_value_t = 1200)]
        height: u32,
        /// Walk from the last page to the first.
        #[arg(long)]
        backward: bool,
    },
    /// Print the effective configuration.
    Config,
    /// Print CLI version.
    Version,
}

#[derive(Debug, Serialize)]
struct InfoOutput {
    path: String,
    kind: SourceKind,
    page_count: usize,
    pages: Vec<PageOutput>,
}

#[derive(Debug, Serialize)]
struct PageOutput {
    index: u32,
    name: Option<String>,
}

#[derive(Debug, Serialize)]
struct WalkOutput {
    pages_displayed: usize,
    elapsed_ms: u128,
    image_cache: CacheOutput,
    texture_cache: CacheOutput,
    decoder: DecoderOutput,
}

#[derive(Debug, Serialize)]
struct CacheOutput {
    entries: usize,
    used_bytes: usize,
    capacity_bytes: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
    rejected: u64,
}

impl From<CacheStats> for CacheOutput {
    fn from(stats: CacheStats) -> Self {
        Self {
            entries: stats.entry_count,
            used_bytes: stats.used_bytes,
            capacity_bytes: stats.capacity_bytes,
            hits: stats.hits,
            misses: stats.misses,
            evictions: stats.evictions,
            rejected: stats.rejected,
        }
    }
}

#[derive(Debug, Serialize)]
struct DecoderOutput {
    submitted: u64,
    completed: u64,
    cancelled: u64,
    reprioritized: u64,
}

impl From<SchedulerStats> for DecoderOutput {
    fn from(stats: SchedulerStats) -> Self {
        Self {
            submitted: stats.jobs_submitted,
            completed: stats.jobs_completed,
            cancelled: stats.jobs_cancelled,
            reprioritized: stats.jobs_reprioritized,
        }
    }
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);
    init_logging(cli.verbose);
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Info { path } => run_info(&path),
        Commands::Render { path, page, width, height, algorithm, output } => {
            let config = load_config(config_path)?;
            run_render(&path, config, page, (width, height), algorithm, output.as_deref())
        }
        Commands::Walk { path, width, height, backward } => {
            let config = load_config(config_path)?;
            run_walk(&path, config, (width, height), backward)
        }
        Commands::Config => {
            let config = load_config(config_path)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { LevelFilter::Debug } else { LevelFilter::Warn };
    // A logger may already be installed when run() is called twice in-process
    let _ = TermLogger::init(level, Config::default(), TerminalMode::Stderr, ColorChoice::Never);
}

fn load_config(path: Option<&Path>) -> Result<ViewerConfig> {
    let config = match path {
        Some(path) => ViewerConfig::from_file(path)
            .with_context(|| format!("failed to read config {}", path.display()))?
            .with_env_overrides()?,
        None => ViewerConfig::load().context("failed to load configuration")?,
    };
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn run_info(path: &Path) -> Result<()> {
    ensure_exists(path)?;
    // Listing pages needs no extracted data
    let options = OpenOptions { extract_in_background: false };
    let source = open_source_with(path, options).context("failed to open source")?;

    let pages = (0..source.page_count())
        .filter_map(|index| source.page_id_at(index))
        .map(|id| PageOutput {
            index: id.index(),
            name: source.page_name(id).map(ToOwned::to_owned),
        })
        .collect();
    let payload = InfoOutput {
        path: path.display().to_string(),
        kind: source.kind(),
        page_count: source.page_count(),
        pages,
    };

    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

fn run_render(
    path: &Path,
    mut config: ViewerConfig,
    page: u32,
    size: (u32, u32),
    algorithm: Option<AlgorithmId>,
    output: Option<&Path>,
) -> Result<()> {
    ensure_exists(path)?;
    if page == 0 {
        anyhow::bail!("--page is 1-based and must be >= 1");
    }
    if let Some(algorithm) = algorithm {
        config = match algorithm.backend() {
            Backend::Cpu => config.with_cpu_algorithm(algorithm).with_gpu(false),
            Backend::Gpu => config.with_gpu_algorithm(algorithm).with_gpu(true),
        };
    }
    // Only the requested page is needed
    config = config.with_prefetch_count(0);

    let pipeline = Pipeline::open(path, config).context("failed to open source")?;
    let page_id = PageId::new(page - 1);
    let mut gpu = SoftwareGpu::new();
    let rendered = display(&pipeline, &mut gpu, page_id, size)
        .with_context(|| format!("failed to render page {page}"))?;
    let raster = payload_raster(&rendered, &gpu)?;

    let output = output.map(ToOwned::to_owned).unwrap_or_else(|| default_output(path, page));
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)?;
    }
    let image = image::RgbaImage::from_raw(raster.width, raster.height, raster.pixels)
        .context("rendered raster has an invalid size")?;
    image
        .save(&output)
        .with_context(|| format!("failed to write image to {}", output.display()))?;

    pipeline.release_textures(&mut gpu);
    println!("{}", output.display());
    Ok(())
}

fn run_walk(path: &Path, config: ViewerConfig, size: (u32, u32), backward: bool) -> Result<()> {
    ensure_exists(path)?;
    let pipeline = Pipeline::open(path, config).context("failed to open source")?;
    let mut gpu = SoftwareGpu::new();
    let start = Instant::now();

    let count = pipeline.page_count() as u32;
    let order: Vec<u32> = if backward {
        (0..count).rev().collect()
    } else {
        (0..count).collect()
    };
    for index in &order {
        let page = PageId::new(*index);
        let rendered = display(&pipeline, &mut gpu, page, size)
            .with_context(|| format!("failed to display {page}"))?;
        debug!("displayed {} ({} cached)", page, rendered.is_cached());
    }
    if !pipeline.wait_idle(IDLE_TIMEOUT) {
        anyhow::bail!("prefetch did not settle within {:?}", IDLE_TIMEOUT);
    }
    info!("walked {} pages in {:?}", order.len(), start.elapsed());

    let payload = WalkOutput {
        pages_displayed: order.len(),
        elapsed_ms: start.elapsed().as_millis(),
        image_cache: pipeline.images().stats().into(),
        texture_cache: pipeline.textures().stats().into(),
        decoder: pipeline.decoder_stats().into(),
    };
    pipeline.release_textures(&mut gpu);

    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

/// Display a page, driving the GPU stage on this thread when needed
fn display(
    pipeline: &Pipeline,
    gpu: &mut SoftwareGpu,
    page: PageId,
    size: (u32, u32),
) -> Result<Renderable> {
    let future = pipeline.display_page(page, size);
    if pipeline.config().backend() == Backend::Cpu {
        return Ok(future.wait()?);
    }

    let deadline = Instant::now() + GPU_TIMEOUT;
    loop {
        pipeline.process_gpu_work(gpu);
        if let Some(result) = future.wait_timeout(Duration::from_millis(2)) {
            return Ok(result?);
        }
        if Instant::now() >= deadline {
            anyhow::bail!("timed out waiting for {page}");
        }
    }
}

fn payload_raster(rendered: &Renderable, gpu: &SoftwareGpu) -> Result<Raster> {
    match &rendered.payload {
        RenderPayload::Raster(raster) => Ok(raster.as_ref().clone()),
        RenderPayload::Texture(texture) => gpu
            .download(texture)
            .cloned()
            .context("texture was released before it could be read"),
    }
}

fn ensure_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("path does not exist: {}", path.display());
    }
    Ok(())
}

fn default_output(path: &Path, page: u32) -> PathBuf {
    let stem = path.file_stem().and_then(|name| name.to_str()).unwrap_or("page");

    path.with_file_name(format!("{stem}-page-{page}.png"))
}
