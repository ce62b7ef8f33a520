//! MangaView Core Library
//!
//! The cache + prefetch + resampling pipeline of the viewer. A [`Pipeline`]
//! owns one page source, the decoded-image cache (L2), the texture cache (L1),
//! a pool of decode workers and the prefetcher, and serves
//! [`Pipeline::display_page`] requests without blocking the caller.

pub mod config;
pub mod context;
pub mod decoder;
pub mod error;
pub mod events;
pub mod future;
pub mod orchestrator;
pub mod prefetch;
pub mod resample;
pub mod software_gpu;

pub use config::{ConfigError, ViewerConfig};
pub use context::ViewerContext;
pub use decoder::{decode_rgba, DecodeInput, DecodeJob, DecoderPool};
pub use error::{PipelineError, Result};
pub use events::{CacheTier, EventBus, PipelineEvent, SubscriptionId};
pub use future::{Completer, ResultFuture};
pub use orchestrator::{Pipeline, RenderFuture, RenderPayload, Renderable};
pub use prefetch::{Direction, NavigationHistory, PrefetchPlan, Prefetcher};
pub use resample::{resample, resampler_for, ResampleError, ResampleFn, CPU_RESAMPLERS};
pub use software_gpu::SoftwareGpu;
