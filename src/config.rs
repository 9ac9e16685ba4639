//! Application configuration
//!
//! JSON file, every field optional. Lookup order for the file: explicit path,
//! then `<config dir>/audio-hal-io/config.json`, then built-in defaults.
//! Environment variables override the file afterwards.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::audio::host::{BackendKind, SimulatedHostConfig};
use crate::audio::types::{SampleEncoding, StreamFormat};

pub const BACKEND_ENV: &str = "AUDIO_HAL_BACKEND";
pub const LOG_ENV: &str = "AUDIO_HAL_LOG";

/// Output stream settings used by the demo
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    pub encoding: SampleEncoding,
    pub channels: u32,
    pub sample_rate: f64,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            encoding: SampleEncoding::F32LE,
            channels: 2,
            sample_rate: 44_100.0,
        }
    }
}

impl StreamSettings {
    pub fn format(&self) -> StreamFormat {
        StreamFormat::new(self.encoding, self.channels, self.sample_rate)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioIoConfig {
    pub backend: BackendKind,
    /// Default tracing filter when `RUST_LOG` is unset
    pub log_filter: String,
    pub stream: StreamSettings,
    pub simulated: SimulatedHostConfig,
}

impl Default for AudioIoConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            log_filter: "audio_hal_io=info".to_string(),
            stream: StreamSettings::default(),
            simulated: SimulatedHostConfig::default(),
        }
    }
}

impl AudioIoConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load `path` if given, else the default file if it exists, else defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("audio-hal-io").join("config.json"))
    }

    /// Apply `AUDIO_HAL_BACKEND` and `AUDIO_HAL_LOG` from the environment
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(std::env::var(BACKEND_ENV).ok(), std::env::var(LOG_ENV).ok())
    }

    fn apply_overrides(&mut self, backend: Option<String>, log_filter: Option<String>) -> Result<()> {
        if let Some(backend) = backend {
            self.backend = backend
                .parse()
                .map_err(anyhow::Error::msg)
                .with_context(|| format!("Invalid {}", BACKEND_ENV))?;
        }
        if let Some(filter) = log_filter {
            self.log_filter = filter;
        }
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text).with_context(|| format!("Failed to write config file {}", path.display()))?;
        Ok(())
    }
}
