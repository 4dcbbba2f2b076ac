//! Store configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. A TOML file chosen by the application shell
//!
//! The shell owns any environment overrides; this crate reads none.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{StoreError, StoreResult};

/// How much of a migrated table is read back before the swap
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyMode {
    /// Decode every migrated row
    #[default]
    All,
    /// Decode the first N rows of each entity
    Sample(usize),
}

/// Store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding the store file
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Store file name inside `data_dir`
    #[serde(default = "default_file_name")]
    pub file_name: String,

    /// Read-back verification during migration
    #[serde(default)]
    pub verify: VerifyMode,

    /// How long a statement waits on a locked file
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            file_name: default_file_name(),
            verify: VerifyMode::default(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl StoreConfig {
    /// Config rooted at a specific directory, everything else default
    pub fn in_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a specific path
    ///
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// Load configuration from a TOML string
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        toml::from_str(toml_content).context("Failed to parse config TOML")
    }

    /// Save configuration to a file, creating its directory
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;
        Ok(())
    }

    /// Path of the store file
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(&self.file_name)
    }

    /// Ensure the data directory exists
    pub fn ensure_data_dir(&self) -> StoreResult<()> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir).map_err(|source| {
                match StoreError::from_io(source, self.data_dir.clone()) {
                    StoreError::Io { path, source } => StoreError::CreateDirectory { path, source },
                    other => other,
                }
            })?;
        }
        Ok(())
    }
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("anidex")
}

fn default_file_name() -> String {
    "anidex.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}
