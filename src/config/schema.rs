//! Configuration schema for devfarm
//!
//! Configuration is stored at `~/.config/devfarm/config.toml`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Device lock settings
    pub lock: LockConfig,

    /// Binary cache merge settings
    pub cache: CacheConfig,

    /// Device bridge and on-device run settings
    pub device: DeviceConfig,
}

impl Config {
    /// Check values that parse but cannot be used
    pub fn validate(&self) -> Result<(), String> {
        check_timeout_secs(self.lock.timeout_secs)
            .map_err(|reason| format!("lock.timeout_secs: {}", reason))?;
        if self.lock.prefix.is_empty() {
            return Err("lock.prefix must not be empty".to_string());
        }
        if self.cache.platform_info_key.is_empty() {
            return Err("cache.platform_info_key must not be empty".to_string());
        }
        Ok(())
    }
}

/// Device lock configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Directory holding the per-device lock files.
    /// Must be shared by every process contending for the same devices.
    pub dir: PathBuf,

    /// Lock file name prefix, followed by the device serial
    pub prefix: String,

    /// Default acquisition timeout in seconds (fractions allowed)
    pub timeout_secs: f64,
}

impl LockConfig {
    /// Acquisition timeout as a `Duration`
    pub fn timeout(&self) -> Duration {
        secs_to_duration(self.timeout_secs)
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/tmp"),
            prefix: "device-lock-".to_string(),
            timeout_secs: 3600.0,
        }
    }
}

/// Binary cache merge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Key whose value must agree across every merged cache
    pub platform_info_key: String,

    /// Per-run subdirectory that pulled caches land in
    pub binary_subdir: String,

    /// File name of the compiled program cache written on the device
    pub compiled_program_file: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            platform_info_key: "mace_opencl_precompiled_platform_info_key".to_string(),
            binary_subdir: "opencl_bin".to_string(),
            compiled_program_file: "mace_cl_compiled_program.bin".to_string(),
        }
    }
}

/// Device bridge and on-device run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Device bridge executable
    pub bridge: String,

    /// Directory on the device that binaries are staged into
    pub bin_dir: String,

    /// Directory on the device where runs write their compiled caches
    pub compiled_cache_dir: String,

    /// Prefix of the runtime environment flags passed to device binaries
    pub env_prefix: String,

    /// Minimum verbose log level for device binaries
    pub vlog_level: u32,

    /// Enable OpenCL profiling in device binaries
    pub opencl_profiling: bool,

    /// Enable out-of-range checks in device binaries
    pub out_of_range_check: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            bridge: "adb".to_string(),
            bin_dir: "/data/local/tmp/mace".to_string(),
            compiled_cache_dir: "/data/local/tmp/mace_run/interior".to_string(),
            env_prefix: "MACE".to_string(),
            vlog_level: 0,
            opencl_profiling: true,
            out_of_range_check: true,
        }
    }
}

/// Reject timeouts that cannot be waited for: negative, NaN or infinite
pub fn check_timeout_secs(secs: f64) -> Result<f64, String> {
    if !secs.is_finite() {
        return Err(format!("timeout must be a finite number of seconds, got {}", secs));
    }
    if secs < 0.0 {
        return Err(format!("timeout must not be negative, got {}", secs));
    }
    Ok(secs)
}

/// Convert fractional seconds into a `Duration`.
///
/// Values too large for a `Duration` saturate to `Duration::MAX`, so a long
/// wait never turns into a single attempt. Negative and NaN map to zero;
/// callers reject those with [`check_timeout_secs`] first.
pub fn secs_to_duration(secs: f64) -> Duration {
    match Duration::try_from_secs_f64(secs) {
        Ok(duration) => duration,
        Err(_) if secs > 0.0 => Duration::MAX,
        Err(_) => Duration::ZERO,
    }
}
