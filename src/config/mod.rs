//! Configuration management for devfarm
//!
//! Settings live in one TOML file, by default `<config dir>/devfarm/config.toml`.
//! Every section and field is optional. A missing file or field falls back to
//! the stock devfarm setup: lock files `/tmp/device-lock-<serial>` with a one
//! hour wait, the `mace_opencl_precompiled_platform_info_key` platform key,
//! and `adb` staging binaries under `/data/local/tmp/mace`.

pub mod schema;

pub use schema::{
    check_timeout_secs, secs_to_duration, CacheConfig, Config, DeviceConfig, LockConfig,
};

use crate::error::{DevfarmError, DevfarmResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Loads and saves the devfarm config file.
///
/// A loaded file is validated, so an unusable value such as a negative or
/// infinite `lock.timeout_secs` fails with [`DevfarmError::ConfigInvalid`]
/// instead of quietly changing how long device locks are waited for.
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
        }
    }

    /// Create a config manager with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("devfarm")
            .join("config.toml")
    }

    /// Load configuration, falling back to defaults if the file is absent
    pub async fn load(&self) -> DevfarmResult<Config> {
        if !self.config_path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Config::default());
        }

        self.load_from_file(&self.config_path).await
    }

    /// Load configuration from a specific file
    pub async fn load_from_file(&self, path: &Path) -> DevfarmResult<Config> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| DevfarmError::io(format!("reading config from {}", path.display()), e))?;

        let config: Config = toml::from_str(&content).map_err(|e| DevfarmError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        config
            .validate()
            .map_err(|reason| DevfarmError::ConfigInvalid {
                path: path.to_path_buf(),
                reason,
            })?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self, config: &Config) -> DevfarmResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| DevfarmError::ConfigDirCreate {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }

        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content).await.map_err(|e| {
            DevfarmError::io(
                format!("writing config to {}", self.config_path.display()),
                e,
            )
        })?;

        info!("Configuration saved to {}", self.config_path.display());
        Ok(())
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}
