//! CPU stand-in for a graphics context
//!
//! Keeps "textures" as rasters in memory and runs each shader id through the
//! CPU resampler of the same class. Used by the command-line tool and by
//! tests, where no graphics context exists.

use crate::resample;
use mangaview_cache::{AlgorithmId, GpuBackend, GpuError, GpuTexture, Raster, TextureHandle};
use std::collections::HashMap;

/// CPU algorithm that stands in for a shader
pub fn cpu_equivalent(shader: AlgorithmId) -> Option<AlgorithmId> {
    match shader {
        AlgorithmId::GlNearest => Some(AlgorithmId::Nearest),
        AlgorithmId::GlBilinear => Some(AlgorithmId::Bilinear),
        AlgorithmId::GlLanczos3 | AlgorithmId::GlLanczos4 => Some(AlgorithmId::Lanczos3),
        AlgorithmId::GlQuintic => Some(AlgorithmId::CatmullRom),
        _ => None,
    }
}

/// In-memory texture store implementing [`GpuBackend`]
#[derive(Default)]
pub struct SoftwareGpu {
    next_handle: u64,
    textures: HashMap<TextureHandle, Raster>,
    uploads: usize,
    resamples: usize,
}

impl SoftwareGpu {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pixels of a live texture
    pub fn download(&self, texture: &GpuTexture) -> Option<&Raster> {
        self.textures.get(&texture.handle)
    }

    /// Textures currently allocated
    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn uploads(&self) -> usize {
        self.uploads
    }

    pub fn resamples(&self) -> usize {
        self.resamples
    }

    fn store(&mut self, raster: Raster) -> GpuTexture {
        self.next_handle += 1;
        let handle = TextureHandle(self.next_handle);
        let texture = GpuTexture::rgba8(handle, raster.width, raster.height);
        self.textures.insert(handle, raster);
        texture
    }
}

impl GpuBackend for SoftwareGpu {
    fn upload(&mut self, raster: &Raster) -> Result<GpuTexture, GpuError> {
        if raster.width == 0 || raster.height == 0 {
            return Err(GpuError::Upload("empty raster".to_string()));
        }
        self.uploads += 1;
        Ok(self.store(raster.clone()))
    }

    fn resample(
        &mut self,
        source: &GpuTexture,
        width: u32,
        height: u32,
        algorithm: AlgorithmId,
    ) -> Result<GpuTexture, GpuError> {
        let cpu = cpu_equivalent(algorithm).ok_or(GpuError::UnsupportedAlgorithm(algorithm))?;
        let raster = self
            .textures
            .get(&source.handle)
            .ok_or(GpuError::UnknownTexture(source.handle))?;
        let resampled = resample::resample(raster, width, height, cpu)
            .map_err(|err| GpuError::Resample(err.to_string()))?;
        self.resamples += 1;
        Ok(self.store(resampled))
    }

    fn release(&mut self, texture: GpuTexture) {
        self.textures.remove(&texture.handle);
    }
}
