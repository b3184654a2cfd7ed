//! Shared configuration for flowstore tools
//!
//! Reads from ~/.flowstore/config.toml

use anyhow::{Context, Result};
use flowstore_core::{
    FlowConfig, UploadOption, DEFAULT_CHUNK_SIZE, DEFAULT_POLL_INTERVAL,
    DEFAULT_SEGMENT_MAX_CHUNKS,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level config structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub flow: FlowSection,
    #[serde(default)]
    pub upload: UploadSection,
}

/// Chunk and segment geometry; must match the network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowSection {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_segment_max_chunks")]
    pub segment_max_chunks: usize,
}

impl Default for FlowSection {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            segment_max_chunks: default_segment_max_chunks(),
        }
    }
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_segment_max_chunks() -> usize {
    DEFAULT_SEGMENT_MAX_CHUNKS
}

/// Upload polling configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadSection {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Bound on each wait for the storage node; unset waits indefinitely
    #[serde(default)]
    pub wait_timeout_secs: Option<u64>,
}

impl Default for UploadSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            wait_timeout_secs: None,
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL.as_millis() as u64
}

impl Config {
    /// Load config from file, or create default if doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = get_config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Load config, returning default on any error (no panic)
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_default()
    }

    /// Load config from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content).context("Failed to parse config file")
    }

    /// Save config to file
    pub fn save(&self) -> Result<()> {
        self.save_to(&get_config_path())
    }

    /// Save config to a specific file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;

        Ok(())
    }

    /// Validated flow geometry
    pub fn flow_config(&self) -> Result<FlowConfig> {
        FlowConfig::new(self.flow.chunk_size, self.flow.segment_max_chunks)
            .context("Invalid [flow] section")
    }

    /// Base upload option from the `[upload]` section
    pub fn upload_option(&self) -> UploadOption {
        let option = UploadOption::default()
            .with_poll_interval(Duration::from_millis(self.upload.poll_interval_ms));
        match self.upload.wait_timeout_secs {
            Some(secs) => option.with_wait_timeout(Duration::from_secs(secs)),
            None => option,
        }
    }
}

/// Get the flowstore directory (~/.flowstore)
pub fn get_flowstore_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("FLOWSTORE_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".flowstore")
}

/// Get the config file path (~/.flowstore/config.toml)
pub fn get_config_path() -> PathBuf {
    get_flowstore_dir().join("config.toml")
}
