//! Engine configuration

use candle_core::Device;
use polysent_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How candle engines are constructed and run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandleEngineConfig {
    /// Compute device: "cpu", "cuda", "cuda:N" or "metal"
    #[serde(default = "default_device")]
    pub device: String,

    /// Maximum tokens per message; longer messages are truncated
    #[serde(default = "default_max_length")]
    pub max_length: usize,

    /// Messages per forward pass
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Hub revision (branch, tag or commit) for every model
    #[serde(default)]
    pub revision: Option<String>,

    /// Download cache; defaults to the user cache directory
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

impl Default for CandleEngineConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            max_length: default_max_length(),
            batch_size: default_batch_size(),
            revision: None,
            cache_dir: None,
        }
    }
}

impl CandleEngineConfig {
    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.max_length == 0 {
            return Err(Error::config("max_length must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(Error::config("batch_size must be at least 1"));
        }
        parse_device(&self.device)?;
        Ok(())
    }

    /// Cache directory used for hub downloads
    pub fn resolved_cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("polysent/models")
        })
    }

    /// Open the configured device
    pub fn open_device(&self) -> Result<Device> {
        match parse_device(&self.device)? {
            DeviceSpec::Cpu => Ok(Device::Cpu),
            DeviceSpec::Cuda(ordinal) => Device::new_cuda(ordinal)
                .map_err(|e| Error::engine_load(format!("Failed to initialize CUDA: {}", e))),
            DeviceSpec::Metal => Device::new_metal(0)
                .map_err(|e| Error::engine_load(format!("Failed to initialize Metal: {}", e))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeviceSpec {
    Cpu,
    Cuda(usize),
    Metal,
}

pub(crate) fn parse_device(device: &str) -> Result<DeviceSpec> {
    let device = device.trim().to_ascii_lowercase();
    match device.as_str() {
        "cpu" => Ok(DeviceSpec::Cpu),
        "cuda" => Ok(DeviceSpec::Cuda(0)),
        "mps" | "metal" => Ok(DeviceSpec::Metal),
        other => match other.strip_prefix("cuda:") {
            Some(ordinal) => ordinal
                .parse()
                .map(DeviceSpec::Cuda)
                .map_err(|_| Error::config(format!("invalid CUDA device '{}'", other))),
            None => Err(Error::config(format!("unknown device '{}'", other))),
        },
    }
}

fn default_device() -> String {
    "cpu".to_string()
}

fn default_max_length() -> usize {
    512
}

fn default_batch_size() -> usize {
    16
}
