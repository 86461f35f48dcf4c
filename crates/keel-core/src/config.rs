//! Configuration for the keel runtime.
//!
//! Loads from `$KEEL_HOME/config.toml` with sensible defaults; a missing
//! file is not an error.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::cache::CacheOptions;
use crate::logging::LoggerOptions;
use crate::memory::MemoryMonitorConfig;

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeelConfig {
    /// Defaults for registry-created caches.
    pub cache: CacheOptions,
    /// Memory-pressure monitor settings.
    pub memory: MemoryMonitorConfig,
    /// Defaults for registry-created session loggers.
    pub logging: LoggerOptions,
}

impl KeelConfig {
    /// Loads configuration from the default config path.
    ///
    /// # Errors
    /// Returns an error when the file exists but cannot be read or
    /// parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_path())
    }

    /// Loads configuration from a specific path.
    /// Returns defaults if the file doesn't exist.
    ///
    /// # Errors
    /// Returns an error when the file exists but cannot be read or
    /// parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }
}

pub mod paths {
    //! Path resolution for keel configuration and data directories.
    //!
    //! KEEL_HOME resolution order:
    //! 1. KEEL_HOME environment variable (if set)
    //! 2. ~/.config/keel (default)

    use std::path::PathBuf;

    /// Returns the keel home directory.
    pub fn keel_home() -> PathBuf {
        if let Ok(home) = std::env::var("KEEL_HOME") {
            return PathBuf::from(home);
        }

        dirs::home_dir()
            .map(|h| h.join(".config").join("keel"))
            .expect("Could not determine home directory")
    }

    /// Returns the path to the config.toml file.
    pub fn config_path() -> PathBuf {
        keel_home().join("config.toml")
    }

    /// Returns the directory session log files land in.
    pub fn logs_dir() -> PathBuf {
        keel_home().join("logs")
    }
}
