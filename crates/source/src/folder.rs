//! Folder and single-image sources

use crate::natural::natural_cmp;
use crate::{is_image_name, PageSource, Result, SourceError, SourceKind};
use log::info;
use mangaview_cache::PageId;
use std::fs;
use std::path::{Path, PathBuf};

/// Pages read straight from image files on disk
///
/// A folder source lists the image files directly inside a directory in
/// natural order. A single-image source is the same thing with one page.
#[derive(Debug)]
pub struct FolderSource {
    root: PathBuf,
    pages: Vec<PathBuf>,
    names: Vec<String>,
    kind: SourceKind,
}

impl FolderSource {
    /// List the image files in `dir`
    pub fn open(dir: &Path) -> Result<Self> {
        let entries = fs::read_dir(dir).map_err(|err| SourceError::io(dir, err))?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| SourceError::io(dir, err))?;
            let is_file = entry
                .file_type()
                .map(|kind| kind.is_file())
                .unwrap_or(false);
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_file && !name.starts_with('.') && is_image_name(&name) {
                files.push((name, entry.path()));
            }
        }
        files.sort_by(|(a, _), (b, _)| natural_cmp(a, b));

        info!("Opened folder {} with {} pages", dir.display(), files.len());
        let (names, pages): (Vec<String>, Vec<PathBuf>) = files.into_iter().unzip();
        Ok(Self {
            root: dir.to_path_buf(),
            pages,
            names,
            kind: SourceKind::Folder,
        })
    }

    /// Wrap one image file as a one-page source
    pub fn single(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(SourceError::NotFound(path.display().to_string()));
        }
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            root: path.to_path_buf(),
            pages: vec![path.to_path_buf()],
            names: vec![name],
            kind: SourceKind::Image,
        })
    }

    fn page_path(&self, page_id: PageId) -> Result<&Path> {
        self.pages
            .get(page_id.index() as usize)
            .map(PathBuf::as_path)
            .ok_or_else(|| SourceError::NotFound(page_id.to_string()))
    }
}

impl PageSource for FolderSource {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn page_id_at(&self, index: usize) -> Option<PageId> {
        (index < self.pages.len()).then(|| PageId::new(index as u32))
    }

    fn page_name(&self, page_id: PageId) -> Option<&str> {
        self.names.get(page_id.index() as usize).map(String::as_str)
    }

    fn fetch_raw_bytes(&self, page_id: PageId) -> Result<Vec<u8>> {
        let path = self.page_path(page_id)?;
        fs::read(path).map_err(|err| SourceError::io(path, err))
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn path(&self) -> &Path {
        &self.root
    }
}
