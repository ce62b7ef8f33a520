//! Decoded image cache (L2) with LRU eviction
//!
//! Holds CPU-side rasters produced by the decoder pool. When an insert would
//! exceed the byte budget, least recently used unpinned rasters are evicted
//! first; an insert that cannot fit is rejected and the caller renders the
//! raster uncached.
//!
//! CPU-backend entries hold the raster at their key's target size. GPU-backend
//! entries hold a decoded page at source resolution, keyed by its own
//! dimensions, and feed texture promotion at any target size.

use crate::key::{Backend, PageId, ResampleKey};
use crate::lru::{CacheError, CacheStats, LruStore};
use std::sync::Arc;

/// Decoded raster
///
/// Pixel data is tightly packed RGBA8, row-major, `width * 4` bytes per row.
#[derive(Clone, PartialEq, Eq)]
pub struct Raster {
    /// Width of the raster in pixels
    pub width: u32,

    /// Height of the raster in pixels
    pub height: u32,

    /// Raw pixel data (RGBA format)
    pub pixels: Vec<u8>,
}

impl Raster {
    /// Bytes per pixel of the RGBA8 layout
    pub const BYTES_PER_PIXEL: usize = 4;

    /// Create a raster from RGBA8 pixels
    ///
    /// Returns `None` if the buffer length does not match the dimensions.
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Option<Self> {
        let expected = width as usize * height as usize * Self::BYTES_PER_PIXEL;
        (pixels.len() == expected).then_some(Self {
            width,
            height,
            pixels,
        })
    }

    /// Create a raster filled with a single RGBA color
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let pixels = rgba.repeat(width as usize * height as usize);
        Self {
            width,
            height,
            pixels,
        }
    }

    /// Get the memory size of this raster in bytes
    pub fn byte_size(&self) -> usize {
        self.pixels.len()
    }

    /// Bytes per row
    pub fn stride(&self) -> usize {
        self.width as usize * Self::BYTES_PER_PIXEL
    }

    /// RGBA value of one pixel
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = y as usize * self.stride() + x as usize * Self::BYTES_PER_PIXEL;
        let px = &self.pixels[offset..offset + Self::BYTES_PER_PIXEL];
        Some([px[0], px[1], px[2], px[3]])
    }
}

impl std::fmt::Debug for Raster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Raster")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// Decoded image cache (L2)
///
/// Thread-safe, byte-bounded store of decoded rasters keyed by
/// [`ResampleKey`]. Reads mark the entry as recently used.
///
/// # Example
///
/// ```
/// use mangaview_cache::{AlgorithmId, Backend, ImageCache, PageId, Raster, ResampleKey};
/// use std::sync::Arc;
///
/// let cache = ImageCache::with_mb_limit(64);
/// let key = ResampleKey::new(PageId::new(0), 256, 256, AlgorithmId::Lanczos3, Backend::Cpu);
/// let raster = Arc::new(Raster::filled(256, 256, [0, 0, 0, 255]));
///
/// cache.put(key, raster.clone(), raster.byte_size()).unwrap();
/// assert!(cache.get(&key).is_some());
///
/// let stats = cache.stats();
/// println!("Hit rate: {:.2}%", stats.hit_rate() * 100.0);
/// ```
pub struct ImageCache {
    store: LruStore<Arc<Raster>>,
}

impl ImageCache {
    /// Create a new image cache with the specified capacity in bytes
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            store: LruStore::new(capacity_bytes, "ImageCache"),
        }
    }

    /// Create a new image cache with a capacity in megabytes
    pub fn with_mb_limit(megabytes: usize) -> Self {
        Self::new(megabytes * 1024 * 1024)
    }

    /// Retrieve a raster, marking it as recently used
    ///
    /// The raster's size always equals `key.target_size()`. Use
    /// [`ImageCache::find_for_page`] to look up a texture source.
    pub fn get(&self, key: &ResampleKey) -> Option<Arc<Raster>> {
        self.store.get(key)
    }

    /// Store a raster
    ///
    /// Evicts least recently used unpinned rasters until the new one fits.
    /// Returns the evicted keys, or [`CacheError::CapacityExceeded`] without
    /// changing the cache if it cannot fit.
    pub fn put(
        &self,
        key: ResampleKey,
        raster: Arc<Raster>,
        byte_size: usize,
    ) -> Result<Vec<ResampleKey>, CacheError> {
        let inserted = self.store.put(key, raster, byte_size)?;
        Ok(inserted.evicted.into_iter().map(|(key, _)| key).collect())
    }

    /// Evict until `incoming_size` more bytes would fit
    pub fn evict_if_needed(&self, incoming_size: usize) -> Result<Vec<ResampleKey>, CacheError> {
        let evicted = self.store.evict_if_needed(incoming_size)?;
        Ok(evicted.into_iter().map(|(key, _)| key).collect())
    }

    /// Check if a key is cached without updating recency
    pub fn contains(&self, key: &ResampleKey) -> bool {
        self.store.contains(key)
    }

    /// Retrieve a raster without updating recency or statistics
    pub fn peek(&self, key: &ResampleKey) -> Option<Arc<Raster>> {
        self.store.peek(key)
    }

    /// Best cached raster for a page, at any key
    ///
    /// Prefers the source-resolution raster stored under a GPU-backend key,
    /// then the largest CPU raster.
    pub fn find_for_page(&self, page_id: PageId) -> Option<(ResampleKey, Arc<Raster>)> {
        self.store.find_for_page(page_id)
    }

    /// Remove a raster from the cache
    pub fn remove(&self, key: &ResampleKey) -> Option<Arc<Raster>> {
        self.store.remove(key)
    }

    /// Clear all rasters from the cache
    pub fn clear(&self) {
        self.store.clear();
    }

    /// Renderings that must survive eviction
    ///
    /// A CPU key pins its own entry only, so the same page at another size
    /// stays evictable. A GPU key pins the page's source-resolution raster,
    /// since every texture size of that page is promoted from it.
    pub fn set_pinned_keys<I: IntoIterator<Item = ResampleKey>>(&self, keys: I) {
        let keys: Vec<ResampleKey> = keys.into_iter().collect();
        let sources: Vec<PageId> = keys
            .iter()
            .filter(|key| key.backend == Backend::Gpu)
            .map(|key| key.page_id)
            .collect();
        self.store.set_pinned(keys, sources);
    }

    /// Currently pinned keys
    pub fn pinned_keys(&self) -> Vec<ResampleKey> {
        self.store.pinned_keys()
    }

    /// Pages with at least one pinned key, ascending
    pub fn pinned_pages(&self) -> Vec<PageId> {
        self.store.pinned_pages()
    }

    /// Change the capacity, evicting unpinned rasters that no longer fit
    pub fn set_capacity(&self, capacity_bytes: usize) -> Vec<ResampleKey> {
        self.store
            .set_capacity(capacity_bytes)
            .into_iter()
            .map(|(key, _)| key)
            .collect()
    }

    /// All cached keys in arbitrary order
    pub fn keys(&self) -> Vec<ResampleKey> {
        self.store.keys()
    }

    /// Cached keys from least to most recently used
    pub fn recency_order(&self) -> Vec<ResampleKey> {
        self.store.recency_order()
    }

    /// Get current cache statistics
    pub fn stats(&self) -> CacheStats {
        self.store.stats()
    }

    /// Current usage in bytes
    pub fn used_bytes(&self) -> usize {
        self.store.used_bytes()
    }

    /// Sum of entry sizes, recomputed
    pub fn accounted_bytes(&self) -> usize {
        self.store.accounted_bytes()
    }

    /// Configured capacity in bytes
    pub fn capacity_bytes(&self) -> usize {
        self.store.capacity_bytes()
    }

    /// Number of cached rasters
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ImageCache {
    /// Create a cache with a default 512MB limit
    fn default() -> Self {
        Self::with_mb_limit(512)
    }
}
