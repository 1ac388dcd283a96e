use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const CONFIG_FILE_NAME: &str = "config.toml";
const ENV_DATA_DIR: &str = "RIFE_BRIDGE_DATA_DIR";

/// `gpu_id` value that asks the engine for its CPU path.
pub const CPU_GPU_ID: i32 = -1;

/// Construction-time settings for one engine instance. Immutable once a
/// context has been created from it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    pub gpu_id: i32,
    pub tta_mode: bool,
    pub tta_temporal_mode: bool,
    pub uhd_mode: bool,
    pub num_threads: i32,
    pub rife_v2: bool,
    pub rife_v4: bool,
    pub padding: i32,
}

/// Which device an [`EngineConfig`] selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accelerator {
    Cpu,
    Gpu(u32),
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            gpu_id: 0,
            tta_mode: false,
            tta_temporal_mode: false,
            uhd_mode: false,
            num_threads: 1,
            rife_v2: false,
            rife_v4: true,
            padding: 64,
        }
    }
}

impl EngineConfig {
    /// Negative ids all mean CPU; the engine decides whether a GPU index exists.
    pub fn accelerator(&self) -> Accelerator {
        if self.gpu_id < 0 {
            Accelerator::Cpu
        } else {
            Accelerator::Gpu(self.gpu_id as u32)
        }
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(raw).context("failed to parse engine config JSON")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: Option<String>,
    pub retention_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: None,
            retention_files: crate::logging::DEFAULT_LOG_RETENTION_FILES,
        }
    }
}

/// File-level configuration: engine settings plus where to find the model.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BridgeConfig {
    pub engine: EngineConfig,
    pub model_dir: Option<PathBuf>,
    pub logging: LoggingConfig,
}

impl BridgeConfig {
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        if raw.trim().is_empty() {
            return Ok(Self::default());
        }

        toml::from_str(&raw)
            .with_context(|| format!("failed to parse config TOML: {}", path.display()))
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        let parent = path
            .parent()
            .context("config path does not have a parent directory")?;
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory: {}", parent.display()))?;

        let encoded = toml::to_string_pretty(self).context("failed to serialize config TOML")?;
        fs::write(path, encoded)
            .with_context(|| format!("failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Model directory resolved against `base` (normally the config file's directory).
    pub fn resolve_model_dir(&self, base: &Path) -> Option<PathBuf> {
        self.model_dir
            .as_deref()
            .map(|dir| resolve_relative_to(base, dir))
    }
}

/// Resolve the data directory with 3-tier priority:
/// 1. explicit override if provided
/// 2. RIFE_BRIDGE_DATA_DIR environment variable
/// 3. Default: ./data
pub fn data_dir(override_dir: Option<&Path>) -> PathBuf {
    if let Some(path) = override_dir {
        return path.to_path_buf();
    }

    if let Some(env_dir) = env::var_os(ENV_DATA_DIR) {
        return PathBuf::from(env_dir);
    }

    PathBuf::from("data")
}

/// Returns the path to config.toml within the given data directory.
pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join(CONFIG_FILE_NAME)
}

/// Returns the path as-is if absolute, otherwise joins it to base.
pub fn resolve_relative_to(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
