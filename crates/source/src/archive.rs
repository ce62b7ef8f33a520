//! Zip/cbz archive source

use crate::extraction::{ExtractionCoordinator, ExtractionProgress, MemberExtractor, ProgressObserver};
use crate::natural::natural_cmp;
use crate::{is_image_name, OpenOptions, PageSource, Result, SourceError, SourceKind};
use log::{info, warn};
use mangaview_cache::PageId;
use mangaview_scheduler::JobPriority;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use zip::result::ZipError;
use zip::ZipArchive;

/// Reads page members out of a zip archive
pub struct ZipExtractor {
    archive: ZipArchive<File>,
    /// Zip entry index of each page, in page order
    entries: Vec<usize>,
    names: Vec<String>,
}

impl ZipExtractor {
    /// Open an archive and list its image members in natural order
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|err| SourceError::io(path, err))?;
        let mut archive = ZipArchive::new(file).map_err(|err| match err {
            ZipError::Io(err) => SourceError::io(path, err),
            other => SourceError::UnsupportedFormat(format!("{}: {}", path.display(), other)),
        })?;

        let mut members = Vec::new();
        for index in 0..archive.len() {
            let entry = match archive.by_index(index) {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("Skipping unreadable entry {} in {}: {}", index, path.display(), err);
                    continue;
                }
            };
            let name = entry.name().to_string();
            if entry.is_dir() || !is_page_member(&name) {
                continue;
            }
            members.push((name, index));
        }
        members.sort_by(|(a, _), (b, _)| natural_cmp(a, b));

        let (names, entries): (Vec<String>, Vec<usize>) = members.into_iter().unzip();
        Ok(Self {
            archive,
            entries,
            names,
        })
    }

    /// Member names in page order
    pub fn names(&self) -> &[String] {
        &self.names
    }

    fn member_name(&self, page_id: PageId) -> String {
        self.names
            .get(page_id.index() as usize)
            .cloned()
            .unwrap_or_else(|| page_id.to_string())
    }
}

/// Image members outside of macOS resource forks and hidden files
fn is_page_member(name: &str) -> bool {
    let base = name.rsplit('/').next().unwrap_or(name);
    !name.starts_with("__MACOSX/") && !base.starts_with('.') && is_image_name(name)
}

impl MemberExtractor for ZipExtractor {
    fn extract(&mut self, page_id: PageId, dest: &Path) -> Result<()> {
        let Some(&index) = self.entries.get(page_id.index() as usize) else {
            return Err(SourceError::NotFound(page_id.to_string()));
        };
        let name = self.member_name(page_id);
        let failed = |reason: String| SourceError::ExtractionFailed {
            member: name.clone(),
            reason,
        };

        let mut member = self
            .archive
            .by_index(index)
            .map_err(|err| failed(err.to_string()))?;
        let mut out = File::create(dest).map_err(|err| SourceError::io(dest, err))?;

        let copied = io::copy(&mut member, &mut out);
        drop(out);
        if let Err(err) = copied {
            let _ = fs::remove_file(dest);
            return Err(failed(err.to_string()));
        }
        Ok(())
    }
}

/// Pages stored in a zip or cbz archive
///
/// Pages are extracted on demand by an [`ExtractionCoordinator`]; reading a
/// page blocks until its member is on disk.
pub struct ArchiveSource {
    path: PathBuf,
    names: Vec<String>,
    coordinator: ExtractionCoordinator,
}

impl ArchiveSource {
    /// Open an archive and start its extraction thread
    pub fn open(path: &Path, options: OpenOptions) -> Result<Self> {
        let extractor = ZipExtractor::open(path)?;
        let names = extractor.names().to_vec();
        Self::with_extractor(path, names, extractor, options)
    }

    /// Build a source over any member extractor
    ///
    /// `names` lists the members in page order.
    pub fn with_extractor<E: MemberExtractor>(
        path: &Path,
        names: Vec<String>,
        extractor: E,
        options: OpenOptions,
    ) -> Result<Self> {
        let coordinator = ExtractionCoordinator::new(extractor, names.len())?;
        if options.extract_in_background {
            coordinator.request_all(JobPriority::Speculative);
        }

        info!("Opened archive {} with {} pages", path.display(), names.len());
        Ok(Self {
            path: path.to_path_buf(),
            names,
            coordinator,
        })
    }

    /// Extraction coordinator of this archive
    pub fn coordinator(&self) -> &ExtractionCoordinator {
        &self.coordinator
    }
}

impl PageSource for ArchiveSource {
    fn page_count(&self) -> usize {
        self.names.len()
    }

    fn page_id_at(&self, index: usize) -> Option<PageId> {
        (index < self.names.len()).then(|| PageId::new(index as u32))
    }

    fn page_name(&self, page_id: PageId) -> Option<&str> {
        self.names.get(page_id.index() as usize).map(String::as_str)
    }

    /// Blocks until the page is extracted
    ///
    /// Never raises the page's extraction class; callers announce urgency
    /// through [`PageSource::prepare`].
    fn fetch_raw_bytes(&self, page_id: PageId) -> Result<Vec<u8>> {
        let ticket = self.coordinator.request_page(page_id, JobPriority::Speculative)?;
        let path = ticket.wait()?;
        fs::read(&path).map_err(|err| SourceError::io(path, err))
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Archive
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn set_focus(&self, page_id: PageId) {
        self.coordinator.set_focus(page_id);
    }

    fn prepare(&self, page_id: PageId, priority: JobPriority) {
        if let Err(err) = self.coordinator.request_page(page_id, priority) {
            warn!("Cannot queue {} for extraction: {}", page_id, err);
        }
    }

    fn extraction_progress(&self) -> Option<ExtractionProgress> {
        Some(self.coordinator.progress())
    }

    fn set_progress_observer(&self, observer: ProgressObserver) {
        self.coordinator.set_observer(observer);
    }
}
