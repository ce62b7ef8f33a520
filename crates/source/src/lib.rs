//! MangaView Source Library
//!
//! Page sources for the viewer: image folders, single images and zip/cbz
//! archives. Archive pages are extracted by a background worker that orders
//! its queue by distance from the page being viewed.
//!
//! # Example
//!
//! ```no_run
//! use mangaview_source::open_source;
//!
//! let source = open_source("volume01.cbz".as_ref())?;
//! let first = source.page_id_at(0).expect("archive has pages");
//! let bytes = source.fetch_raw_bytes(first)?;
//! println!("{} pages, first is {} bytes", source.page_count(), bytes.len());
//! # Ok::<(), mangaview_source::SourceError>(())
//! ```

mod archive;
mod extraction;
mod folder;
pub mod natural;

use mangaview_cache::PageId;
use mangaview_scheduler::JobPriority;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

pub use archive::{ArchiveSource, ZipExtractor};
pub use extraction::{
    ExtractionCoordinator, ExtractionProgress, ExtractionTicket, MemberExtractor, ProgressObserver,
    TicketState,
};
pub use folder::FolderSource;

/// Image file extensions recognized as pages (lowercase, without dot)
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "webp", "gif", "tif", "tiff"];

/// Archive extensions that can be opened
pub const ARCHIVE_EXTENSIONS: &[&str] = &["zip", "cbz"];

/// Archive extensions that are recognized but have no reader
pub const UNSUPPORTED_ARCHIVE_EXTENSIONS: &[&str] = &["7z", "cb7", "rar", "cbr"];

/// Errors that can occur while opening or reading a page source
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("I/O error on {path}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("extraction of {member} failed: {reason}")]
    ExtractionFailed { member: String, reason: String },
}

impl SourceError {
    /// Wrap an I/O error with the path it happened on
    pub fn io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        let path = path.into();
        if err.kind() == std::io::ErrorKind::NotFound {
            SourceError::NotFound(path.display().to_string())
        } else {
            SourceError::Io {
                path,
                message: err.to_string(),
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, SourceError>;

/// Kind of container behind a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Folder,
    Image,
    Archive,
}

/// Ordered collection of pages that can hand out raw encoded bytes
///
/// Implementations are shared between the UI thread and decode workers.
/// `fetch_raw_bytes` may block (archive pages wait for extraction), so it must
/// only be called from worker threads.
pub trait PageSource: Send + Sync {
    /// Number of pages
    fn page_count(&self) -> usize;

    /// Identifier of the page at a zero-based position
    fn page_id_at(&self, index: usize) -> Option<PageId>;

    /// Display name of a page (file or member name)
    fn page_name(&self, page_id: PageId) -> Option<&str>;

    /// Encoded bytes of a page
    fn fetch_raw_bytes(&self, page_id: PageId) -> Result<Vec<u8>>;

    /// Container kind
    fn kind(&self) -> SourceKind;

    /// Path the source was opened from
    fn path(&self) -> &Path;

    /// Tell the source which page is being viewed
    fn set_focus(&self, _page_id: PageId) {}

    /// Ask the source to have a page ready soon
    ///
    /// Repeated calls keep the highest `priority` seen for a page.
    fn prepare(&self, _page_id: PageId, _priority: JobPriority) {}

    /// Extraction progress, for sources that extract
    fn extraction_progress(&self) -> Option<ExtractionProgress> {
        None
    }

    /// Register a callback for extraction progress
    fn set_progress_observer(&self, _observer: ProgressObserver) {}
}

/// Options applied when opening a source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenOptions {
    /// Queue every archive page for extraction right after opening
    pub extract_in_background: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            extract_in_background: true,
        }
    }
}

/// Lowercase extension of a path, without the dot
pub(crate) fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

/// Whether a file name has a page image extension
pub fn is_image_name(name: &str) -> bool {
    extension_of(Path::new(name)).is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// Open a folder, image file or archive with default options
pub fn open_source(path: &Path) -> Result<Arc<dyn PageSource>> {
    open_source_with(path, OpenOptions::default())
}

/// Open a folder, image file or archive
pub fn open_source_with(path: &Path, options: OpenOptions) -> Result<Arc<dyn PageSource>> {
    let metadata = std::fs::metadata(path).map_err(|err| SourceError::io(path, err))?;
    if metadata.is_dir() {
        return Ok(Arc::new(FolderSource::open(path)?));
    }

    let ext = extension_of(path).unwrap_or_default();
    if ARCHIVE_EXTENSIONS.contains(&ext.as_str()) {
        Ok(Arc::new(ArchiveSource::open(path, options)?))
    } else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        Ok(Arc::new(FolderSource::single(path)?))
    } else if UNSUPPORTED_ARCHIVE_EXTENSIONS.contains(&ext.as_str()) {
        Err(SourceError::UnsupportedFormat(format!(
            "{} archives are not supported",
            ext
        )))
    } else {
        Err(SourceError::UnsupportedFormat(path.display().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_is_image_name() {
        assert!(is_image_name("001.PNG"));
        assert!(is_image_name("dir/cover.jpeg"));
        assert!(is_image_name("scan.tif"));
        assert!(!is_image_name("notes.txt"));
        assert!(!is_image_name("png"));
    }

    #[test]
    fn test_open_missing_path() {
        let err = open_source(Path::new("/definitely/not/here.cbz")).err().unwrap();
        assert!(matches!(err, SourceError::NotFound(_)));
    }

    #[test]
    fn test_open_unsupported_archive() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["book.rar", "book.cb7", "notes.txt"] {
            let path = dir.path().join(name);
            fs::write(&path, b"data").unwrap();
            let err = open_source(&path).err().unwrap();
            assert!(matches!(err, SourceError::UnsupportedFormat(_)), "{}", name);
        }
    }

    #[test]
    fn test_io_error_mapping() {
        let not_found = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(matches!(SourceError::io("a", not_found), SourceError::NotFound(_)));

        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert!(matches!(SourceError::io("a", denied), SourceError::Io { .. }));
    }
}
