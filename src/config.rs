//! Benchmark configuration
//!
//! Loaded from a TOML file. Every field has a default so an empty file (or no
//! file at all) runs the stock benchmark: a 200x200 matrix multiplied ten
//! times, and a 32-filter 7x7 convolution over a 100x100x100x3 batch timed
//! over 30 trials.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::backend::ExecutionMode;
use crate::error::{BenchError, BenchResult};
use crate::layers::Padding;

/// Environment variable naming a config file
pub const CONFIG_ENV_VAR: &str = "DEVICE_BENCH_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    pub devices: DeviceConfig,
    pub matmul: MatmulConfig,
    pub conv: ConvConfig,
    /// Execution mode for GPU work outside the convolution benchmark
    pub execution: ExecutionMode,
    /// Where to write the JSON report, if anywhere
    pub output: Option<PathBuf>,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            devices: DeviceConfig::default(),
            matmul: MatmulConfig::default(),
            conv: ConvConfig::default(),
            execution: ExecutionMode::Eager,
            output: None,
        }
    }
}

/// Which wgpu backends to search for adapters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendSelection {
    All,
    Primary,
    Vulkan,
    Metal,
    Dx12,
    Gl,
    /// Skip GPU discovery entirely
    None,
}

impl BackendSelection {
    pub fn to_wgpu(self) -> wgpu::Backends {
        match self {
            BackendSelection::All => wgpu::Backends::all(),
            BackendSelection::Primary => wgpu::Backends::PRIMARY,
            BackendSelection::Vulkan => wgpu::Backends::VULKAN,
            BackendSelection::Metal => wgpu::Backends::METAL,
            BackendSelection::Dx12 => wgpu::Backends::DX12,
            BackendSelection::Gl => wgpu::Backends::GL,
            BackendSelection::None => wgpu::Backends::empty(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PowerPreference {
    LowPower,
    HighPerformance,
}

impl PowerPreference {
    pub fn to_wgpu(self) -> wgpu::PowerPreference {
        match self {
            PowerPreference::LowPower => wgpu::PowerPreference::LowPower,
            PowerPreference::HighPerformance => wgpu::PowerPreference::HighPerformance,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub backends: BackendSelection,
    pub power_preference: PowerPreference,
    /// Count software rasterizers (llvmpipe, WARP, SwiftShader) as GPUs
    pub allow_software_adapter: bool,
    /// Request incremental allocation on every GPU before initialization
    pub memory_growth: bool,
    /// Bytes reserved up front on GPUs that do not use memory growth
    pub reserve_bytes: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            backends: BackendSelection::All,
            power_preference: PowerPreference::HighPerformance,
            allow_software_adapter: false,
            memory_growth: true,
            reserve_bytes: 256 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatmulConfig {
    /// Side length of the square matrix
    pub size: usize,
    /// Chained self-multiplications inside the timed region
    pub steps: usize,
    pub seed: Option<u64>,
}

impl Default for MatmulConfig {
    fn default() -> Self {
        Self {
            size: 200,
            steps: 10,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvConfig {
    pub batch: usize,
    pub height: usize,
    pub width: usize,
    pub channels: usize,
    pub filters: usize,
    pub kernel_size: usize,
    pub stride: usize,
    pub padding: Padding,
    pub trials: usize,
    pub seed: Option<u64>,
}

impl Default for ConvConfig {
    fn default() -> Self {
        Self {
            batch: 100,
            height: 100,
            width: 100,
            channels: 3,
            filters: 32,
            kernel_size: 7,
            stride: 1,
            padding: Padding::Valid,
            trials: 30,
            seed: None,
        }
    }
}

impl ConvConfig {
    /// Shape of one random input batch (NHWC)
    pub fn input_dims(&self) -> [usize; 4] {
        [self.batch, self.height, self.width, self.channels]
    }
}

impl BenchConfig {
    /// Load and validate a TOML config file
    pub fn load(path: impl AsRef<Path>) -> BenchResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&raw)?;
        log::info!("[BenchConfig] Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> BenchResult<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the file named by `DEVICE_BENCH_CONFIG`, or use defaults
    pub fn from_env() -> BenchResult<Self> {
        match std::env::var(CONFIG_ENV_VAR) {
            Ok(path) if !path.is_empty() => Self::load(path),
            _ => {
                log::debug!("[BenchConfig] {} not set, using defaults", CONFIG_ENV_VAR);
                Ok(Self::default())
            }
        }
    }

    pub fn validate(&self) -> BenchResult<()> {
        if self.matmul.size == 0 {
            return Err(BenchError::InvalidConfig("matmul.size must be positive".into()));
        }

        let conv = &self.conv;
        let dims = [
            ("conv.batch", conv.batch),
            ("conv.height", conv.height),
            ("conv.width", conv.width),
            ("conv.channels", conv.channels),
            ("conv.filters", conv.filters),
            ("conv.kernel_size", conv.kernel_size),
            ("conv.stride", conv.stride),
            ("conv.trials", conv.trials),
        ];
        for (name, value) in dims {
            if value == 0 {
                return Err(BenchError::InvalidConfig(format!("{} must be positive", name)));
            }
        }

        if conv.padding == Padding::Valid
            && (conv.kernel_size > conv.height || conv.kernel_size > conv.width)
        {
            return Err(BenchError::InvalidConfig(format!(
                "conv.kernel_size {} does not fit a {}x{} image with valid padding",
                conv.kernel_size, conv.height, conv.width
            )));
        }

        Ok(())
    }
}
