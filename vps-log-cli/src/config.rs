//! Configuration loading and parsing

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use vps_log_decoder::{FilterConfig, ReadMode};

/// Application configuration (loaded from a TOML file, every section optional)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub split: SplitConfig,
    /// Default filter; command-line filters override it per predicate
    #[serde(default)]
    pub filter: FilterConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScanConfig {
    /// Transit files larger than this are memory-mapped
    #[serde(default = "default_mmap_threshold_mb")]
    pub mmap_threshold_mb: u64,
    /// Progress log interval in scanned units (0 disables)
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            mmap_threshold_mb: default_mmap_threshold_mb(),
            progress_interval: default_progress_interval(),
        }
    }
}

impl ScanConfig {
    pub fn read_mode(&self) -> ReadMode {
        ReadMode::Auto {
            threshold_bytes: self.mmap_threshold_mb.saturating_mul(1024 * 1024),
        }
    }
}

fn default_mmap_threshold_mb() -> u64 {
    100
}

fn default_progress_interval() -> u64 {
    1_000_000
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    /// Default listing length
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Default length of top-N tables
    #[serde(default = "default_top_n")]
    pub top_n: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            top_n: default_top_n(),
        }
    }
}

fn default_limit() -> usize {
    100
}

fn default_top_n() -> usize {
    20
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SplitConfig {
    /// Maximum simultaneously open split files (0 = unbounded)
    #[serde(default)]
    pub max_open_sinks: usize,
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path).with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig =
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))?;

    Ok(config)
}

/// Load the file given with `--config`, or the defaults
pub fn load_or_default(path: Option<&Path>) -> Result<AppConfig> {
    match path {
        Some(path) => {
            log::info!("Loading configuration from: {:?}", path);
            load_config(path)
        }
        None => Ok(AppConfig::default()),
    }
}
