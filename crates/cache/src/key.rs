//! Cache keys shared by the image (L2) and texture (L1) caches
//!
//! A [`ResampleKey`] names one concrete rendering of one page: which page,
//! at what target size, with which algorithm, on which backend. Two keys are
//! equal only when every field is equal; there is no resolution snapping.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Stable identifier of a page within one browsing session
///
/// Wraps the zero-based position of the page in its source, so ordering
/// page ids gives the page sequence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageId(u32);

impl PageId {
    /// Create a page id from a zero-based page index
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Zero-based page index
    pub const fn index(self) -> u32 {
        self.0
    }

    /// Absolute distance (in pages) between two page ids
    pub fn distance(self, other: PageId) -> u32 {
        self.0.abs_diff(other.0)
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page#{}", self.0)
    }
}

/// Where resampling happens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Cpu,
    Gpu,
}

/// Resampling algorithm identifier
///
/// CPU algorithms are executed by the decoder pool; `Gl*` algorithms name
/// shader programs run by the rendering layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AlgorithmId {
    Nearest,
    Bilinear,
    Hamming,
    CatmullRom,
    Mitchell,
    Lanczos3,
    Area,
    Gaussian,
    GlNearest,
    GlBilinear,
    GlLanczos3,
    GlLanczos4,
    GlQuintic,
}

impl AlgorithmId {
    /// Every known algorithm, CPU first
    pub const ALL: [AlgorithmId; 13] = [
        AlgorithmId::Nearest,
        AlgorithmId::Bilinear,
        AlgorithmId::Hamming,
        AlgorithmId::CatmullRom,
        AlgorithmId::Mitchell,
        AlgorithmId::Lanczos3,
        AlgorithmId::Area,
        AlgorithmId::Gaussian,
        AlgorithmId::GlNearest,
        AlgorithmId::GlBilinear,
        AlgorithmId::GlLanczos3,
        AlgorithmId::GlLanczos4,
        AlgorithmId::GlQuintic,
    ];

    /// Stable configuration name of the algorithm
    pub fn as_str(self) -> &'static str {
        match self {
            AlgorithmId::Nearest => "nearest",
            AlgorithmId::Bilinear => "bilinear",
            AlgorithmId::Hamming => "hamming",
            AlgorithmId::CatmullRom => "catmull_rom",
            AlgorithmId::Mitchell => "mitchell",
            AlgorithmId::Lanczos3 => "lanczos3",
            AlgorithmId::Area => "area",
            AlgorithmId::Gaussian => "gaussian",
            AlgorithmId::GlNearest => "gl_nearest",
            AlgorithmId::GlBilinear => "gl_bilinear",
            AlgorithmId::GlLanczos3 => "gl_lanczos3",
            AlgorithmId::GlLanczos4 => "gl_lanczos4",
            AlgorithmId::GlQuintic => "gl_quintic",
        }
    }

    /// Backend that executes this algorithm
    pub fn backend(self) -> Backend {
        match self {
            AlgorithmId::GlNearest
            | AlgorithmId::GlBilinear
            | AlgorithmId::GlLanczos3
            | AlgorithmId::GlLanczos4
            | AlgorithmId::GlQuintic => Backend::Gpu,
            _ => Backend::Cpu,
        }
    }
}

impl fmt::Display for AlgorithmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an algorithm name that is not in the table
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown resampling algorithm: {0}")]
pub struct UnknownAlgorithm(pub String);

impl FromStr for AlgorithmId {
    type Err = UnknownAlgorithm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        AlgorithmId::ALL
            .into_iter()
            .find(|alg| alg.as_str() == wanted)
            .ok_or_else(|| UnknownAlgorithm(s.to_string()))
    }
}

impl TryFrom<String> for AlgorithmId {
    type Error = UnknownAlgorithm;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AlgorithmId> for String {
    fn from(value: AlgorithmId) -> Self {
        value.as_str().to_string()
    }
}

/// Composite lookup key for both caches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResampleKey {
    pub page_id: PageId,
    pub target_width: u32,
    pub target_height: u32,
    pub algorithm: AlgorithmId,
    pub backend: Backend,
}

impl ResampleKey {
    /// Create a new key
    pub fn new(
        page_id: PageId,
        target_width: u32,
        target_height: u32,
        algorithm: AlgorithmId,
        backend: Backend,
    ) -> Self {
        Self {
            page_id,
            target_width,
            target_height,
            algorithm,
            backend,
        }
    }

    /// The same rendering parameters applied to another page
    pub fn with_page(self, page_id: PageId) -> Self {
        Self { page_id, ..self }
    }

    /// The same rendering parameters at another size
    pub fn with_size(self, target_width: u32, target_height: u32) -> Self {
        Self {
            target_width,
            target_height,
            ..self
        }
    }

    /// Target size as a `(width, height)` pair
    pub fn target_size(&self) -> (u32, u32) {
        (self.target_width, self.target_height)
    }
}

impl fmt::Display for ResampleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}x{}/{}/{:?}",
            self.page_id, self.target_width, self.target_height, self.algorithm, self.backend
        )
    }
}
