//! Pipeline error taxonomy

use crate::config::ConfigError;
use mangaview_cache::{AlgorithmId, CacheError, GpuError, PageId};
use mangaview_source::SourceError;
use thiserror::Error;

/// Errors delivered to page requesters
///
/// Cloned to every requester attached to the same job, so all of them see an
/// identical value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("failed to decode {page}: {reason}")]
    Decode { page: String, reason: String },

    #[error("unsupported resampling algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("extraction of {member} failed: {reason}")]
    ExtractionFailed { member: String, reason: String },

    #[error("{size} bytes do not fit in a cache of {capacity} bytes")]
    CapacityExceeded { size: usize, capacity: usize },

    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),

    #[error("invalid target size {width}x{height}")]
    InvalidTarget { width: u32, height: u32 },

    #[error("request cancelled")]
    Cancelled,

    #[error("pipeline shut down")]
    ShutDown,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PipelineError {
    /// Decode failure for a page, or for anonymous bytes when `page` is `None`
    pub fn decode(page: Option<PageId>, reason: impl ToString) -> Self {
        PipelineError::Decode {
            page: page.map_or_else(|| "raw bytes".to_string(), |page| page.to_string()),
            reason: reason.to_string(),
        }
    }

    /// Algorithm that has no implementation on the backend asked to run it
    pub fn unsupported_algorithm(algorithm: AlgorithmId) -> Self {
        PipelineError::UnsupportedAlgorithm(algorithm.to_string())
    }
}

impl From<SourceError> for PipelineError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::NotFound(what) => PipelineError::NotFound(what),
            SourceError::Io { path, message } => {
                PipelineError::Io(format!("{}: {}", path.display(), message))
            }
            SourceError::UnsupportedFormat(what) => PipelineError::UnsupportedFormat(what),
            SourceError::ExtractionFailed { member, reason } => {
                PipelineError::ExtractionFailed { member, reason }
            }
        }
    }
}

impl From<CacheError> for PipelineError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::CapacityExceeded { size, capacity, .. } => {
                PipelineError::CapacityExceeded { size, capacity }
            }
        }
    }
}

impl From<ConfigError> for PipelineError {
    fn from(err: ConfigError) -> Self {
        PipelineError::InvalidConfig(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_source_errors_map_to_taxonomy() {
        let io: PipelineError = SourceError::Io {
            path: PathBuf::from("/books/a.cbz"),
            message: "denied".into(),
        }
        .into();
        assert_eq!(io, PipelineError::Io("/books/a.cbz: denied".into()));

        let failed: PipelineError = SourceError::ExtractionFailed {
            member: "001.png".into(),
            reason: "crc".into(),
        }
        .into();
        assert!(matches!(failed, PipelineError::ExtractionFailed { .. }));
    }

    #[test]
    fn test_decode_error_names_page() {
        let err = PipelineError::decode(Some(PageId::new(3)), "bad header");
        assert_eq!(err.to_string(), "failed to decode page#3: bad header");
        let err = PipelineError::decode(None, "truncated");
        assert!(err.to_string().contains("raw bytes"));
    }

    #[test]
    fn test_errors_are_cloneable_and_equal() {
        let err = PipelineError::unsupported_algorithm(AlgorithmId::GlQuintic);
        assert_eq!(err.clone(), err);
        assert_eq!(err.to_string(), "unsupported resampling algorithm: gl_quintic");
    }
}
