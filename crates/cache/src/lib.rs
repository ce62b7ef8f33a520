//! MangaView Cache Library
//!
//! Two-tier page cache: decoded rasters in RAM (L2) and GPU textures in VRAM
//! (L1), both keyed by [`ResampleKey`] with size-bounded LRU eviction and
//! page pinning.

pub mod gpu;
pub mod key;
mod lru;
pub mod ram;

pub use gpu::{GpuBackend, GpuError, GpuTexture, Promotion, TextureCache, TextureHandle};
pub use key::{AlgorithmId, Backend, PageId, ResampleKey, UnknownAlgorithm};
pub use lru::{CacheError, CacheStats};
pub use ram::{ImageCache, Raster};
