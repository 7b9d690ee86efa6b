// SPDX-License-Identifier: GPL-3.0-only

//! Engine configuration
//!
//! Stored as JSON in `<config dir>/media-capture/config.json`. Every field has
//! a default, so partial files and a missing file are both valid.

use crate::backends::BackendRegistry;
use crate::backends::synthetic::SyntheticConfig;
use crate::capture::ContextSettings;
use crate::constants::{app_info, pool, sync, timing};
use crate::logging::LogLevel;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Errors reading or writing the configuration file
#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: std::io::Error },
    Parse { path: PathBuf, message: String },
    /// No per-user config directory on this platform
    NoConfigDir,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => write!(f, "{}: {}", path.display(), source),
            ConfigError::Parse { path, message } => {
                write!(f, "Invalid config {}: {}", path.display(), message)
            }
            ConfigError::NoConfigDir => write!(f, "No configuration directory available"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Initial log level, overridden by `RUST_LOG`
    pub log_level: LogLevel,
    /// Backend pool slots per open stream
    pub pool_size: usize,
    /// Dispatcher copy-on-wrap pool slots
    pub copy_pool_size: usize,
    /// Deadline for backend open + start
    pub open_timeout_ms: u64,
    /// Stop waits this long for callbacks before warning
    pub stop_warn_ms: u64,
    /// Synchronizer matching tolerance
    pub sync_tolerance_us: u64,
    pub synthetic: SyntheticConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_level: crate::logging::DEFAULT_LEVEL,
            pool_size: pool::DEFAULT_BACKEND_SLOTS,
            copy_pool_size: pool::DEFAULT_COPY_SLOTS,
            open_timeout_ms: timing::DEFAULT_OPEN_TIMEOUT_MS,
            stop_warn_ms: timing::DEFAULT_STOP_WARN_MS,
            sync_tolerance_us: sync::DEFAULT_TOLERANCE_US,
            synthetic: SyntheticConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Default location of the config file
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| {
            dir.join(app_info::CONFIG_DIR_NAME)
                .join(app_info::CONFIG_FILE_NAME)
        })
    }

    /// Load from the default location, falling back to defaults
    pub fn load() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => {
                warn!("No config directory, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load from `path`; a missing file yields the defaults
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "Config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let config: Self = serde_json::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        debug!(path = %path.display(), ?config, "Loaded config");
        Ok(config.sanitized())
    }

    /// Write to the default location
    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = Self::default_path().ok_or(ConfigError::NoConfigDir)?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let io_error = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }
        let text = serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        std::fs::write(path, text).map_err(io_error)
    }

    /// Clamp pool sizes into `1..=MAX_SLOTS` and timeouts to at least 1ms
    pub fn sanitized(mut self) -> Self {
        self.pool_size = self.pool_size.clamp(1, pool::MAX_SLOTS);
        self.copy_pool_size = self.copy_pool_size.clamp(1, pool::MAX_SLOTS);
        self.open_timeout_ms = self.open_timeout_ms.max(1);
        self.stop_warn_ms = self.stop_warn_ms.max(1);
        self
    }

    pub fn context_settings(&self) -> ContextSettings {
        ContextSettings {
            copy_pool_size: self.copy_pool_size.clamp(1, pool::MAX_SLOTS),
            open_timeout: Duration::from_millis(self.open_timeout_ms.max(1)),
            stop_warn: Duration::from_millis(self.stop_warn_ms.max(1)),
        }
    }

    /// Synthetic backends for every domain, sized from this config
    pub fn backend_registry(&self) -> BackendRegistry {
        let synthetic = SyntheticConfig {
            pool_size: self.pool_size.clamp(1, pool::MAX_SLOTS),
            ..self.synthetic.clone()
        };
        BackendRegistry::synthetic(synthetic)
    }
}
