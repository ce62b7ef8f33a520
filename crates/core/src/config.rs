//! Viewer configuration
//!
//! Options that steer the pipeline: resampling algorithms, GPU use, cache
//! budgets, prefetch depth and worker counts. Configuration can be loaded from
//! a JSON file, environment variables, or created programmatically, and a new
//! value can be applied to a running pipeline.

use mangaview_cache::{AlgorithmId, Backend};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Largest accepted prefetch depth
pub const MAX_PREFETCH_COUNT: usize = 64;

/// Configuration consumed by the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Algorithm used when resampling on the CPU
    pub resampling_algorithm_cpu: AlgorithmId,
    /// Shader used when resampling on the GPU
    pub resampling_algorithm_gpu: AlgorithmId,
    /// Route display requests through the texture cache
    pub use_gpu_acceleration: bool,
    /// ImageCache budget in megabytes
    pub cache_size_l2_mb: usize,
    /// Pages decoded ahead of the current one
    pub prefetch_count: usize,
    /// TextureCache budget in megabytes
    pub cache_size_l1_mb: usize,
    /// Decode worker threads (0 = one per logical core)
    pub decode_workers: usize,
    /// Navigation steps used to infer direction
    pub navigation_history: usize,
    /// Extract every archive page after opening, nearest first
    pub extract_in_background: bool,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            resampling_algorithm_cpu: AlgorithmId::Lanczos3,
            resampling_algorithm_gpu: AlgorithmId::GlQuintic,
            use_gpu_acceleration: false,
            cache_size_l2_mb: 1024,
            prefetch_count: 4,
            cache_size_l1_mb: 512,
            decode_workers: 0,
            navigation_history: 4,
            extract_in_background: true,
        }
    }
}

impl ViewerConfig {
    /// Sets the CPU resampling algorithm.
    pub fn with_cpu_algorithm(mut self, algorithm: AlgorithmId) -> Self {
        self.resampling_algorithm_cpu = algorithm;
        self
    }

    /// Sets the GPU resampling shader.
    pub fn with_gpu_algorithm(mut self, algorithm: AlgorithmId) -> Self {
        self.resampling_algorithm_gpu = algorithm;
        self
    }

    /// Enables or disables the GPU path.
    pub fn with_gpu(mut self, enabled: bool) -> Self {
        self.use_gpu_acceleration = enabled;
        self
    }

    /// Sets the ImageCache budget in megabytes.
    pub fn with_l2_mb(mut self, mb: usize) -> Self {
        self.cache_size_l2_mb = mb;
        self
    }

    /// Sets the TextureCache budget in megabytes.
    pub fn with_l1_mb(mut self, mb: usize) -> Self {
        self.cache_size_l1_mb = mb;
        self
    }

    /// Sets the prefetch depth.
    pub fn with_prefetch_count(mut self, count: usize) -> Self {
        self.prefetch_count = count;
        self
    }

    /// Sets the number of decode workers.
    pub fn with_decode_workers(mut self, workers: usize) -> Self {
        self.decode_workers = workers;
        self
    }

    /// Backend display requests are routed to
    pub fn backend(&self) -> Backend {
        if self.use_gpu_acceleration {
            Backend::Gpu
        } else {
            Backend::Cpu
        }
    }

    /// Algorithm matching [`ViewerConfig::backend`]
    pub fn algorithm(&self) -> AlgorithmId {
        match self.backend() {
            Backend::Cpu => self.resampling_algorithm_cpu,
            Backend::Gpu => self.resampling_algorithm_gpu,
        }
    }

    /// ImageCache budget in bytes
    pub fn l2_bytes(&self) -> usize {
        self.cache_size_l2_mb * 1024 * 1024
    }

    /// TextureCache budget in bytes
    pub fn l1_bytes(&self) -> usize {
        self.cache_size_l1_mb * 1024 * 1024
    }

    /// Checks every option against its accepted range.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidValue`] naming the first offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.resampling_algorithm_cpu.backend() != Backend::Cpu {
            return Err(ConfigError::InvalidValue("resampling_algorithm_cpu".to_string()));
        }
        if self.resampling_algorithm_gpu.backend() != Backend::Gpu {
            return Err(ConfigError::InvalidValue("resampling_algorithm_gpu".to_string()));
        }
        if self.cache_size_l2_mb == 0 {
            return Err(ConfigError::InvalidValue("cache_size_l2_mb".to_string()));
        }
        if self.cache_size_l1_mb == 0 {
            return Err(ConfigError::InvalidValue("cache_size_l1_mb".to_string()));
        }
        if self.prefetch_count > MAX_PREFETCH_COUNT {
            return Err(ConfigError::InvalidValue("prefetch_count".to_string()));
        }
        if self.navigation_history == 0 {
            return Err(ConfigError::InvalidValue("navigation_history".to_string()));
        }
        Ok(())
    }

    /// Returns the default configuration file path for the current platform.
    ///
    /// - macOS: ~/Library/Application Support/mangaview/config.json
    /// - Linux: ~/.config/mangaview/config.json
    /// - Windows: %APPDATA%\mangaview\config.json
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("mangaview").join("config.json")
        } else {
            PathBuf::from("mangaview.json")
        }
    }

    /// Loads the default file if it exists, then applies environment overrides.
    ///
    /// # Errors
    /// Returns an error if the file or any variable holds an invalid value.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        let config = if path.exists() {
            Self::from_file(&path)?
        } else {
            Self::default()
        };
        config.with_env_overrides()
    }

    /// Loads configuration from environment variables on top of the defaults.
    ///
    /// Environment variables:
    /// - `MANGAVIEW_RESAMPLING_CPU`: CPU algorithm name (default: lanczos3)
    /// - `MANGAVIEW_RESAMPLING_GPU`: GPU shader name (default: gl_quintic)
    /// - `MANGAVIEW_USE_GPU`: `true`/`false` (default: false)
    /// - `MANGAVIEW_CACHE_L2_MB`: ImageCache size in MB (default: 1024)
    /// - `MANGAVIEW_CACHE_L1_MB`: TextureCache size in MB (default: 512)
    /// - `MANGAVIEW_PREFETCH_COUNT`: pages prefetched (default: 4)
    /// - `MANGAVIEW_DECODE_WORKERS`: decode threads, 0 for all cores
    /// - `MANGAVIEW_NAVIGATION_HISTORY`: steps used for direction (default: 4)
    /// - `MANGAVIEW_EXTRACT_IN_BACKGROUND`: `true`/`false` (default: true)
    ///
    /// # Errors
    /// Returns an error if any environment variable contains an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides()
    }

    /// Applies `MANGAVIEW_*` variables on top of `self`.
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Some(val) = env_value("MANGAVIEW_RESAMPLING_CPU") {
            self.resampling_algorithm_cpu = parse_env("MANGAVIEW_RESAMPLING_CPU", &val)?;
        }
        if let Some(val) = env_value("MANGAVIEW_RESAMPLING_GPU") {
            self.resampling_algorithm_gpu = parse_env("MANGAVIEW_RESAMPLING_GPU", &val)?;
        }
        if let Some(val) = env_value("MANGAVIEW_USE_GPU") {
            self.use_gpu_acceleration = parse_env("MANGAVIEW_USE_GPU", &val)?;
        }
        if let Some(val) = env_value("MANGAVIEW_CACHE_L2_MB") {
            self.cache_size_l2_mb = parse_env("MANGAVIEW_CACHE_L2_MB", &val)?;
        }
        if let Some(val) = env_value("MANGAVIEW_CACHE_L1_MB") {
            self.cache_size_l1_mb = parse_env("MANGAVIEW_CACHE_L1_MB", &val)?;
        }
        if let Some(val) = env_value("MANGAVIEW_PREFETCH_COUNT") {
            self.prefetch_count = parse_env("MANGAVIEW_PREFETCH_COUNT", &val)?;
        }
        if let Some(val) = env_value("MANGAVIEW_DECODE_WORKERS") {
            self.decode_workers = parse_env("MANGAVIEW_DECODE_WORKERS", &val)?;
        }
        if let Some(val) = env_value("MANGAVIEW_NAVIGATION_HISTORY") {
            self.navigation_history = parse_env("MANGAVIEW_NAVIGATION_HISTORY", &val)?;
        }
        if let Some(val) = env_value("MANGAVIEW_EXTRACT_IN_BACKGROUND") {
            self.extract_in_background = parse_env("MANGAVIEW_EXTRACT_IN_BACKGROUND", &val)?;
        }

        self.validate()?;
        Ok(self)
    }

    /// Loads configuration from a JSON file.
    ///
    /// Missing keys take their default value. Expected file format:
    /// ```json
    /// {
    ///   "resampling_algorithm_cpu": "lanczos3",
    ///   "resampling_algorithm_gpu": "gl_quintic",
    ///   "use_gpu_acceleration": false,
    ///   "cache_size_l2_mb": 1024,
    ///   "prefetch_count": 4
    /// }
    /// ```
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_json(&contents)
    }

    /// Parses configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Saves configuration to a JSON file, creating parent directories.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|val| !val.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidValue(name.to_string()))
}

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid value for a configuration parameter
    #[error("invalid value for configuration key: {0}")]
    InvalidValue(String),

    /// I/O error reading or writing configuration file
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Malformed configuration file
    #[error("malformed configuration: {0}")]
    Parse(#[from] serde_json::Error),
}
