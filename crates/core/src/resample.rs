//! CPU resampling table
//!
//! Every CPU [`AlgorithmId`] maps to a pure function
//! `(&Raster, width, height) -> Raster`. Adding an algorithm means adding a
//! row to [`CPU_RESAMPLERS`]. GPU shader ids have no row here; they are run by
//! the rendering layer through [`mangaview_cache::GpuBackend`].
//!
//! Large targets are split into horizontal destination strips that are
//! resampled in parallel from the shared source and written straight into
//! one output buffer.

use fast_image_resize as fir;
use fir::images::{TypedImage, TypedImageRef};
use fir::pixels::U8x4;
use fir::{FilterType, ResizeAlg, ResizeOptions, Resizer};
use mangaview_cache::{AlgorithmId, Raster};
use rayon::prelude::*;
use thiserror::Error;

/// Destination size (in pixels) from which resampling is split into strips
pub const STRIP_THRESHOLD_PIXELS: u64 = 1024 * 1024;

/// Minimum number of destination rows in one strip
pub const MIN_STRIP_ROWS: u32 = 64;

/// Pure CPU resampling function
pub type ResampleFn = fn(&Raster, u32, u32) -> Result<Raster, ResampleError>;

/// Errors raised by the CPU resamplers
#[derive(Debug, Error)]
pub enum ResampleError {
    #[error("invalid target size {width}x{height}")]
    InvalidTarget { width: u32, height: u32 },

    #[error("source raster is empty")]
    EmptySource,

    #[error("no CPU resampler for {0}")]
    UnsupportedAlgorithm(AlgorithmId),

    #[error("resize failed: {0}")]
    Resize(#[from] fir::ResizeError),

    #[error("bad pixel buffer: {0}")]
    Buffer(#[from] fir::ImageBufferError),
}

/// Algorithm table
pub static CPU_RESAMPLERS: &[(AlgorithmId, ResampleFn)] = &[
    (AlgorithmId::Nearest, nearest),
    (AlgorithmId::Bilinear, bilinear),
    (AlgorithmId::Hamming, hamming),
    (AlgorithmId::CatmullRom, catmull_rom),
    (AlgorithmId::Mitchell, mitchell),
    (AlgorithmId::Lanczos3, lanczos3),
    (AlgorithmId::Area, area),
    (AlgorithmId::Gaussian, gaussian),
];

/// Look up the CPU function for an algorithm
pub fn resampler_for(algorithm: AlgorithmId) -> Option<ResampleFn> {
    CPU_RESAMPLERS
        .iter()
        .find(|(id, _)| *id == algorithm)
        .map(|(_, f)| *f)
}

/// Resample `src` to `width`x`height` with a CPU algorithm
pub fn resample(
    src: &Raster,
    width: u32,
    height: u32,
    algorithm: AlgorithmId,
) -> Result<Raster, ResampleError> {
    let f = resampler_for(algorithm).ok_or(ResampleError::UnsupportedAlgorithm(algorithm))?;
    f(src, width, height)
}

fn nearest(src: &Raster, width: u32, height: u32) -> Result<Raster, ResampleError> {
    convolve(src, width, height, ResizeAlg::Nearest)
}

fn bilinear(src: &Raster, width: u32, height: u32) -> Result<Raster, ResampleError> {
    convolve(src, width, height, ResizeAlg::Convolution(FilterType::Bilinear))
}

fn hamming(src: &Raster, width: u32, height: u32) -> Result<Raster, ResampleError> {
    convolve(src, width, height, ResizeAlg::Convolution(FilterType::Hamming))
}

fn catmull_rom(src: &Raster, width: u32, height: u32) -> Result<Raster, ResampleError> {
    convolve(src, width, height, ResizeAlg::Convolution(FilterType::CatmullRom))
}

fn mitchell(src: &Raster, width: u32, height: u32) -> Result<Raster, ResampleError> {
    convolve(src, width, height, ResizeAlg::Convolution(FilterType::Mitchell))
}

fn lanczos3(src: &Raster, width: u32, height: u32) -> Result<Raster, ResampleError> {
    convolve(src, width, height, ResizeAlg::Convolution(FilterType::Lanczos3))
}

fn area(src: &Raster, width: u32, height: u32) -> Result<Raster, ResampleError> {
    convolve(src, width, height, ResizeAlg::Convolution(FilterType::Box))
}

fn gaussian(src: &Raster, width: u32, height: u32) -> Result<Raster, ResampleError> {
    convolve(src, width, height, ResizeAlg::Convolution(FilterType::Gaussian))
}

fn convolve(src: &Raster, width: u32, height: u32, alg: ResizeAlg) -> Result<Raster, ResampleError> {
    if width == 0 || height == 0 {
        return Err(ResampleError::InvalidTarget { width, height });
    }
    if src.width == 0 || src.height == 0 {
        return Err(ResampleError::EmptySource);
    }
    if (src.width, src.height) == (width, height) {
        return Ok(src.clone());
    }

    let rows = strip_rows(width, height);
    resample_in_strips(src, width, height, alg, rows)
}

/// Rows per strip for a destination size; the full height when no split pays off
fn strip_rows(width: u32, height: u32) -> u32 {
    if u64::from(width) * u64::from(height) < STRIP_THRESHOLD_PIXELS {
        return height;
    }
    let strips = (height / MIN_STRIP_ROWS)
        .min(rayon::current_num_threads() as u32)
        .max(1);
    height.div_ceil(strips)
}

/// Resample into strips of `rows` destination rows each, in parallel
///
/// Each strip reads the band of the source that maps onto it, so the
/// concatenated strips form the full-size result.
pub(crate) fn resample_in_strips(
    src: &Raster,
    width: u32,
    height: u32,
    alg: ResizeAlg,
    rows: u32,
) -> Result<Raster, ResampleError> {
    let rows = rows.clamp(1, height);
    let stride = width as usize * Raster::BYTES_PER_PIXEL;
    let mut pixels = vec![0u8; stride * height as usize];
    let source = TypedImageRef::<U8x4>::from_buffer(src.width, src.height, &src.pixels)?;
    let scale_y = f64::from(src.height) / f64::from(height);

    pixels
        .par_chunks_mut(stride * rows as usize)
        .enumerate()
        .try_for_each(|(index, chunk)| -> Result<(), ResampleError> {
            let first_row = index as u32 * rows;
            let strip_height = (chunk.len() / stride) as u32;
            let top = f64::from(first_row) * scale_y;
            let band = (f64::from(strip_height) * scale_y).min(f64::from(src.height) - top);

            let mut dst = TypedImage::<U8x4>::from_buffer(width, strip_height, chunk)?;
            let options = ResizeOptions::new()
                .resize_alg(alg)
                .crop(0.0, top, f64::from(src.width), band);
            Resizer::new().resize_typed::<U8x4>(&source, &mut dst, &options)?;
            Ok(())
        })?;

    Raster::new(width, height, pixels).ok_or(ResampleError::InvalidTarget { width, height })
}
