//! GPU texture cache (L1) with LRU eviction
//!
//! Textures live in VRAM owned by the thread that holds the graphics context.
//! The cache itself only tracks handles and sizes; evicted handles are queued
//! and released by the owning thread through [`TextureCache::release_evicted`].

use crate::key::{AlgorithmId, PageId, ResampleKey};
use crate::lru::{CacheError, CacheStats, LruStore};
use crate::ram::{ImageCache, Raster};
use log::{debug, warn};
use std::sync::Mutex;

/// Opaque handle to a texture owned by a [`GpuBackend`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub u64);

/// GPU texture handle with metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuTexture {
    /// Backend handle
    pub handle: TextureHandle,

    /// Width of the texture in pixels
    pub width: u32,

    /// Height of the texture in pixels
    pub height: u32,

    /// Estimated VRAM usage in bytes
    pub vram_size: usize,
}

impl GpuTexture {
    /// Describe an RGBA8 texture of the given size
    pub fn rgba8(handle: TextureHandle, width: u32, height: u32) -> Self {
        Self {
            handle,
            width,
            height,
            vram_size: width as usize * height as usize * 4,
        }
    }
}

/// Errors reported by a GPU backend
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GpuError {
    #[error("texture upload failed: {0}")]
    Upload(String),

    #[error("GPU resampling failed: {0}")]
    Resample(String),

    #[error("algorithm {0} is not available on this GPU backend")]
    UnsupportedAlgorithm(AlgorithmId),

    #[error("unknown texture handle {0:?}")]
    UnknownTexture(TextureHandle),
}

/// Graphics context capable of holding and resampling textures
///
/// Every method must be called from the thread that owns the context.
pub trait GpuBackend {
    /// Upload a raster as a new texture
    fn upload(&mut self, raster: &Raster) -> Result<GpuTexture, GpuError>;

    /// Produce a new texture of `width`x`height` from `source`
    fn resample(
        &mut self,
        source: &GpuTexture,
        width: u32,
        height: u32,
        algorithm: AlgorithmId,
    ) -> Result<GpuTexture, GpuError>;

    /// Free a texture's VRAM
    fn release(&mut self, texture: GpuTexture);
}

/// Result of [`TextureCache::promote`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Promotion {
    /// No decoded raster exists for the page
    Miss,

    /// Texture built and stored in the cache
    Cached(GpuTexture),

    /// Texture built but too large to cache; the caller owns and releases it
    Uncached(GpuTexture),
}

impl Promotion {
    /// Whether a texture was produced
    pub fn succeeded(&self) -> bool {
        !matches!(self, Promotion::Miss)
    }

    /// The produced texture, if any
    pub fn texture(&self) -> Option<GpuTexture> {
        match self {
            Promotion::Miss => None,
            Promotion::Cached(texture) | Promotion::Uncached(texture) => Some(*texture),
        }
    }
}

/// GPU texture cache (L1)
///
/// Same eviction contract as [`ImageCache`], sized in VRAM bytes. Entries are
/// independent of L2: evicting a raster never drops its texture, and the
/// reverse is also true.
///
/// # Example
///
/// ```
/// use mangaview_cache::{AlgorithmId, Backend, GpuTexture, PageId, ResampleKey, TextureCache, TextureHandle};
///
/// let cache = TextureCache::with_mb_limit(256);
/// let key = ResampleKey::new(PageId::new(3), 512, 512, AlgorithmId::GlLanczos3, Backend::Gpu);
/// let texture = GpuTexture::rgba8(TextureHandle(1), 512, 512);
///
/// cache.put(key, texture, texture.vram_size).unwrap();
/// assert_eq!(cache.get(&key), Some(texture));
/// ```
pub struct TextureCache {
    store: LruStore<GpuTexture>,

    /// Evicted or replaced textures awaiting release on the GPU thread
    released: Mutex<Vec<GpuTexture>>,
}

impl TextureCache {
    /// Create a new texture cache with the specified VRAM limit in bytes
    pub fn new(vram_limit: usize) -> Self {
        Self {
            store: LruStore::new(vram_limit, "TextureCache"),
            released: Mutex::new(Vec::new()),
        }
    }

    /// Create a new texture cache with a VRAM limit in megabytes
    pub fn with_mb_limit(megabytes: usize) -> Self {
        Self::new(megabytes * 1024 * 1024)
    }

    /// Retrieve a texture, marking it as recently used
    pub fn get(&self, key: &ResampleKey) -> Option<GpuTexture> {
        self.store.get(key)
    }

    /// Store a texture
    ///
    /// Evicted and replaced textures are queued for release. On
    /// [`CacheError::CapacityExceeded`] the cache is unchanged and the caller
    /// still owns `texture`.
    pub fn put(
        &self,
        key: ResampleKey,
        texture: GpuTexture,
        byte_size: usize,
    ) -> Result<Vec<ResampleKey>, CacheError> {
        let inserted = self.store.put(key, texture, byte_size)?;
        let mut released = self.released.lock().unwrap();
        if let Some(old) = inserted.replaced {
            if old.handle != texture.handle {
                released.push(old);
            }
        }
        Ok(inserted
            .evicted
            .into_iter()
            .map(|(key, texture)| {
                released.push(texture);
                key
            })
            .collect())
    }

    /// Evict until `incoming_size` more bytes would fit
    pub fn evict_if_needed(&self, incoming_size: usize) -> Result<Vec<ResampleKey>, CacheError> {
        let evicted = self.store.evict_if_needed(incoming_size)?;
        Ok(self.queue_release(evicted))
    }

    fn queue_release(&self, evicted: Vec<(ResampleKey, GpuTexture)>) -> Vec<ResampleKey> {
        let mut released = self.released.lock().unwrap();
        evicted
            .into_iter()
            .map(|(key, texture)| {
                released.push(texture);
                key
            })
            .collect()
    }

    /// Build the texture for `key` from a decoded raster without decoding again
    ///
    /// Uses the best raster [`ImageCache`] holds for `key.page_id`. The raster
    /// is uploaded and, when its size differs from the key's target, resampled
    /// on the GPU with `key.algorithm`. Returns [`Promotion::Miss`] when L2 has
    /// nothing for the page.
    pub fn promote(
        &self,
        key: &ResampleKey,
        images: &ImageCache,
        backend: &mut dyn GpuBackend,
    ) -> Result<Promotion, GpuError> {
        let Some((source_key, raster)) = images.find_for_page(key.page_id) else {
            debug!("[TextureCache] promote miss for {}", key);
            return Ok(Promotion::Miss);
        };
        debug!("[TextureCache] promoting {} from {}", key, source_key);
        self.insert_from_raster(key, &raster, backend)
    }

    /// Upload `raster`, resample it to `key`'s target and store the texture
    ///
    /// Used when the caller already holds the decoded raster, for example
    /// because it was too large for [`ImageCache`].
    pub fn insert_from_raster(
        &self,
        key: &ResampleKey,
        raster: &Raster,
        backend: &mut dyn GpuBackend,
    ) -> Result<Promotion, GpuError> {
        let uploaded = backend.upload(raster)?;
        let texture = if (uploaded.width, uploaded.height) == key.target_size() {
            uploaded
        } else {
            let resampled =
                backend.resample(&uploaded, key.target_width, key.target_height, key.algorithm);
            backend.release(uploaded);
            resampled?
        };

        match self.put(*key, texture, texture.vram_size) {
            Ok(_) => Ok(Promotion::Cached(texture)),
            Err(err) => {
                warn!("[TextureCache] texture for {} not cached: {}", key, err);
                Ok(Promotion::Uncached(texture))
            }
        }
    }

    /// Take the textures waiting to be released
    pub fn drain_released(&self) -> Vec<GpuTexture> {
        std::mem::take(&mut *self.released.lock().unwrap())
    }

    /// Release every queued texture through `backend`
    ///
    /// Returns how many textures were released.
    pub fn release_evicted(&self, backend: &mut dyn GpuBackend) -> usize {
        let released = self.drain_released();
        let count = released.len();
        for texture in released {
            backend.release(texture);
        }
        count
    }

    /// Check if a key is cached without updating recency
    pub fn contains(&self, key: &ResampleKey) -> bool {
        self.store.contains(key)
    }

    /// Remove a texture, queueing it for release
    pub fn remove(&self, key: &ResampleKey) -> bool {
        match self.store.remove(key) {
            Some(texture) => {
                self.released.lock().unwrap().push(texture);
                true
            }
            None => false,
        }
    }

    /// Drop every texture, queueing all of them for release
    pub fn clear(&self) {
        let cleared = self.store.clear();
        self.queue_release(cleared);
    }

    /// Textures that must survive eviction
    ///
    /// Each key pins its own texture; other sizes of the same page stay
    /// evictable.
    pub fn set_pinned_keys<I: IntoIterator<Item = ResampleKey>>(&self, keys: I) {
        self.store.set_pinned(keys, std::iter::empty());
    }

    /// Currently pinned keys
    pub fn pinned_keys(&self) -> Vec<ResampleKey> {
        self.store.pinned_keys()
    }

    /// Pages with at least one pinned key, ascending
    pub fn pinned_pages(&self) -> Vec<PageId> {
        self.store.pinned_pages()
    }

    /// Change the VRAM limit, queueing textures that no longer fit
    pub fn set_capacity(&self, capacity_bytes: usize) -> Vec<ResampleKey> {
        let evicted = self.store.set_capacity(capacity_bytes);
        self.queue_release(evicted)
    }

    /// Cached keys from least to most recently used
    pub fn recency_order(&self) -> Vec<ResampleKey> {
        self.store.recency_order()
    }

    /// Get current cache statistics
    pub fn stats(&self) -> CacheStats {
        self.store.stats()
    }

    /// Current VRAM usage in bytes
    pub fn used_bytes(&self) -> usize {
        self.store.used_bytes()
    }

    /// Configured VRAM limit in bytes
    pub fn capacity_bytes(&self) -> usize {
        self.store.capacity_bytes()
    }

    /// Number of cached textures
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TextureCache {
    /// Create a cache with a default 256MB VRAM limit
    fn default() -> Self {
        Self::with_mb_limit(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Backend;
    use std::collections::HashMap;
    use std::sync::Arc;

    const TEX: usize = 256 * 256 * 4;

    /// Backend that records calls and keeps live handles
    #[derive(Default)]
    struct MockBackend {
        next: u64,
        live: HashMap<TextureHandle, (u32, u32)>,
        uploads: usize,
        resamples: Vec<AlgorithmId>,
        fail_resample: bool,
    }

    impl MockBackend {
        fn allocate(&mut self, width: u32, height: u32) -> GpuTexture {
            self.next += 1;
            let handle = TextureHandle(self.next);
            self.live.insert(handle, (width, height));
            GpuTexture::rgba8(handle, width, height)
        }
    }

    impl GpuBackend for MockBackend {
        fn upload(&mut self, raster: &Raster) -> Result<GpuTexture, GpuError> {
            self.uploads += 1;
            Ok(self.allocate(raster.width, raster.height))
        }

        fn resample(
            &mut self,
            source: &GpuTexture,
            width: u32,
            height: u32,
            algorithm: AlgorithmId,
        ) -> Result<GpuTexture, GpuError> {
            if !self.live.contains_key(&source.handle) {
                return Err(GpuError::UnknownTexture(source.handle));
            }
            if self.fail_resample {
                return Err(GpuError::Resample("shader compile failed".into()));
            }
            self.resamples.push(algorithm);
            Ok(self.allocate(width, height))
        }

        fn release(&mut self, texture: GpuTexture) {
            self.live.remove(&texture.handle);
        }
    }

    fn gpu_key(page: u32, side: u32) -> ResampleKey {
        ResampleKey::new(PageId::new(page), side, side, AlgorithmId::GlLanczos3, Backend::Gpu)
    }

    fn texture(id: u64) -> GpuTexture {
        GpuTexture::rgba8(TextureHandle(id), 256, 256)
    }

    #[test]
    fn test_basic_put_get() {
        let cache = TextureCache::new(1024 * 1024);
        cache.put(gpu_key(1, 256), texture(42), TEX).unwrap();

        let found = cache.get(&gpu_key(1, 256)).expect("Texture should be in cache");
        assert_eq!(found.handle, TextureHandle(42));
        assert_eq!(found.vram_size, TEX);
        assert!(cache.get(&gpu_key(2, 256)).is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_lru_eviction_queues_release() {
        let cache = TextureCache::new(2 * TEX);
        cache.put(gpu_key(1, 256), texture(1), TEX).unwrap();
        cache.put(gpu_key(2, 256), texture(2), TEX).unwrap();
        let evicted = cache.put(gpu_key(3, 256), texture(3), TEX).unwrap();

        assert_eq!(evicted, vec![gpu_key(1, 256)]);
        assert_eq!(cache.drain_released(), vec![texture(1)]);
        assert!(cache.drain_released().is_empty());
    }

    #[test]
    fn test_replaced_texture_is_released() {
        let cache = TextureCache::new(4 * TEX);
        cache.put(gpu_key(1, 256), texture(1), TEX).unwrap();
        cache.put(gpu_key(1, 256), texture(2), TEX).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.drain_released(), vec![texture(1)]);
    }

    #[test]
    fn test_promote_miss_without_raster() {
        let cache = TextureCache::new(4 * TEX);
        let images = ImageCache::new(4 * TEX);
        let mut backend = MockBackend::default();

        let promotion = cache.promote(&gpu_key(7, 256), &images, &mut backend).unwrap();
        assert_eq!(promotion, Promotion::Miss);
        assert!(!promotion.succeeded());
        assert_eq!(backend.uploads, 0);
    }

    #[test]
    fn test_promote_resamples_source_raster() {
        let cache = TextureCache::new(4 * TEX);
        let images = ImageCache::new(16 * TEX);
        let mut backend = MockBackend::default();

        // Source-resolution raster stored under a different key for the page
        let source = Arc::new(Raster::filled(512, 512, [1, 2, 3, 255]));
        images
            .put(gpu_key(7, 512), source.clone(), source.byte_size())
            .unwrap();

        let key = gpu_key(7, 256);
        let promotion = cache.promote(&key, &images, &mut backend).unwrap();
        let texture = promotion.texture().unwrap();

        assert!(matches!(promotion, Promotion::Cached(_)));
        assert_eq!((texture.width, texture.height), (256, 256));
        assert_eq!(backend.resamples, vec![AlgorithmId::GlLanczos3]);
        // Only the resampled texture stays alive
        assert_eq!(backend.live.len(), 1);
        assert_eq!(cache.get(&key), Some(texture));
    }

    #[test]
    fn test_promote_skips_resample_at_matching_size() {
        let cache = TextureCache::new(4 * TEX);
        let images = ImageCache::new(4 * TEX);
        let mut backend = MockBackend::default();

        let raster = Arc::new(Raster::filled(256, 256, [0, 0, 0, 255]));
        let key = gpu_key(2, 256);
        images.put(key, raster, TEX).unwrap();

        assert!(cache.promote(&key, &images, &mut backend).unwrap().succeeded());
        assert!(backend.resamples.is_empty());
        assert_eq!(backend.uploads, 1);
    }

    #[test]
    fn test_promote_failure_releases_upload() {
        let cache = TextureCache::new(4 * TEX);
        let images = ImageCache::new(16 * TEX);
        let mut backend = MockBackend {
            fail_resample: true,
            ..Default::default()
        };

        let raster = Arc::new(Raster::filled(512, 512, [0, 0, 0, 255]));
        images.put(gpu_key(1, 512), raster.clone(), raster.byte_size()).unwrap();

        let err = cache.promote(&gpu_key(1, 256), &images, &mut backend).unwrap_err();
        assert!(matches!(err, GpuError::Resample(_)));
        assert!(backend.live.is_empty());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_promote_too_large_is_uncached() {
        let cache = TextureCache::new(TEX / 2);
        let images = ImageCache::new(4 * TEX);
        let mut backend = MockBackend::default();

        let key = gpu_key(4, 256);
        images.put(key, Arc::new(Raster::filled(256, 256, [0; 4])), TEX).unwrap();

        let promotion = cache.promote(&key, &images, &mut backend).unwrap();
        assert!(matches!(promotion, Promotion::Uncached(_)));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_insert_from_raster_without_image_cache() {
        let cache = TextureCache::new(4 * TEX);
        let mut backend = MockBackend::default();

        let key = gpu_key(6, 128);
        let raster = Raster::filled(256, 256, [9; 4]);
        let promotion = cache.insert_from_raster(&key, &raster, &mut backend).unwrap();

        let texture = promotion.texture().unwrap();
        assert_eq!((texture.width, texture.height), (128, 128));
        assert_eq!(cache.get(&key), Some(texture));
    }

    #[test]
    fn test_release_evicted_frees_backend_textures() {
        let cache = TextureCache::new(TEX);
        let images = ImageCache::new(8 * TEX);
        let mut backend = MockBackend::default();

        for page in 0..3 {
            let key = gpu_key(page, 256);
            images.put(key, Arc::new(Raster::filled(256, 256, [0; 4])), TEX).unwrap();
            cache.promote(&key, &images, &mut backend).unwrap();
        }

        assert_eq!(backend.live.len(), 3);
        assert_eq!(cache.release_evicted(&mut backend), 2);
        assert_eq!(backend.live.len(), 1);
    }

    #[test]
    fn test_pinned_textures_survive() {
        let cache = TextureCache::new(2 * TEX);
        cache.put(gpu_key(1, 256), texture(1), TEX).unwrap();
        cache.put(gpu_key(2, 256), texture(2), TEX).unwrap();
        cache.set_pinned_keys([gpu_key(1, 256), gpu_key(2, 256)]);

        assert!(cache.put(gpu_key(3, 256), texture(3), TEX).is_err());
        assert_eq!(cache.len(), 2);
        assert!(cache.drain_released().is_empty());
    }

    #[test]
    fn test_pinned_page_at_new_size_replaces_old_texture() {
        let cache = TextureCache::new(2 * TEX);
        cache.put(gpu_key(1, 256), texture(1), TEX).unwrap();
        cache.put(gpu_key(2, 256), texture(2), TEX).unwrap();
        cache.set_pinned_keys([gpu_key(1, 200), gpu_key(2, 200)]);

        let smaller = GpuTexture::rgba8(TextureHandle(3), 200, 200);
        let evicted = cache.put(gpu_key(1, 200), smaller, smaller.vram_size).unwrap();
        assert_eq!(evicted, vec![gpu_key(1, 256)]);
        assert_eq!(cache.drain_released(), vec![texture(1)]);
        assert_eq!(cache.pinned_pages(), vec![PageId::new(1), PageId::new(2)]);
    }
}
