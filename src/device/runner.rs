//! Running binaries on attached devices
//!
//! A run stages a host binary into the device bin dir, executes it with the
//! runtime flags from config and checks its output. Everything that touches
//! the device happens while holding that device's lock.

use crate::config::{CacheConfig, Config, DeviceConfig};
use crate::device::bridge::DeviceBridge;
use crate::error::{DevfarmError, DevfarmResult};
use crate::lock::{DeviceLock, DeviceLockManager};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Output markers that mark a device run as failed
const FAILURE_MARKERS: [&str; 3] = ["Aborted", "FAILED", "Segmentation fault"];

/// Whether a device run's output shows it completed
pub fn stdout_success(output: &str) -> bool {
    !FAILURE_MARKERS.iter().any(|marker| output.contains(marker))
}

fn binary_file_name(host_binary: &Path) -> DevfarmResult<String> {
    host_binary
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| DevfarmError::User(format!("not a binary path: {}", host_binary.display())))
}

/// Result of a successful run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutput {
    pub serial: String,
    /// Combined stdout and stderr of the binary
    pub output: String,
}

/// Drives binaries on devices through a bridge, under the device locks
pub struct DeviceRunner<'a> {
    bridge: &'a dyn DeviceBridge,
    locks: &'a DeviceLockManager,
    device: DeviceConfig,
    cache: CacheConfig,
    lock_timeout: Duration,
}

impl<'a> DeviceRunner<'a> {
    pub fn new(bridge: &'a dyn DeviceBridge, locks: &'a DeviceLockManager, config: &Config) -> Self {
        Self {
            bridge,
            locks,
            device: config.device.clone(),
            cache: config.cache.clone(),
            lock_timeout: config.lock.timeout(),
        }
    }

    /// Override how long to wait for a busy device
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Environment assignments prefixed to every device command
    pub fn runtime_env(&self) -> Vec<String> {
        let prefix = &self.device.env_prefix;
        vec![
            format!(
                "{}_OUT_OF_RANGE_CHECK={}",
                prefix,
                u8::from(self.device.out_of_range_check)
            ),
            format!(
                "{}_OPENCL_PROFILING={}",
                prefix,
                u8::from(self.device.opencl_profiling)
            ),
            format!("{}_CPP_MIN_VLOG_LEVEL={}", prefix, self.device.vlog_level),
        ]
    }

    /// Push `host_binary` to the device and run it with `args`.
    ///
    /// Each output line is passed to `on_output` as it arrives. Fails with
    /// [`DevfarmError::RunFailed`] when the output carries a failure marker.
    pub async fn run(
        &self,
        serial: &str,
        host_binary: &Path,
        args: &[String],
        on_output: &(dyn Fn(String) + Send + Sync),
    ) -> DevfarmResult<RunOutput> {
        let binary_name = binary_file_name(host_binary)?;
        let _lock = self.lock_device(serial).await?;
        self.run_locked(serial, host_binary, &binary_name, args, on_output)
            .await
    }

    /// Run like [`DeviceRunner::run`], then collect the compiled cache the
    /// run produced, all under a single hold of the device lock.
    ///
    /// No other run can touch the device between the two steps, so the
    /// collected file is always the one this run wrote.
    pub async fn run_and_collect(
        &self,
        serial: &str,
        host_binary: &Path,
        args: &[String],
        on_output: &(dyn Fn(String) + Send + Sync),
        file_name: &str,
        dest_dir: &Path,
    ) -> DevfarmResult<(RunOutput, PathBuf)> {
        let binary_name = binary_file_name(host_binary)?;
        let _lock = self.lock_device(serial).await?;
        let output = self
            .run_locked(serial, host_binary, &binary_name, args, on_output)
            .await?;
        let local = self.collect_locked(serial, file_name, dest_dir).await?;
        Ok((output, local))
    }

    /// Pull the compiled cache a run left on the device into
    /// `<dest_dir>/<binary_subdir>/`, replacing what was there.
    ///
    /// Returns the local path of the pulled file.
    pub async fn collect_compiled_cache(
        &self,
        serial: &str,
        file_name: &str,
        dest_dir: &Path,
    ) -> DevfarmResult<PathBuf> {
        let _lock = self.lock_device(serial).await?;
        self.collect_locked(serial, file_name, dest_dir).await
    }

    // Callers must hold the device lock.
    async fn run_locked(
        &self,
        serial: &str,
        host_binary: &Path,
        binary_name: &str,
        args: &[String],
        on_output: &(dyn Fn(String) + Send + Sync),
    ) -> DevfarmResult<RunOutput> {
        let props = self.bridge.getprop(serial).await?;
        info!(
            "Running {} on {} (soc: {}, model: {})",
            binary_name,
            serial,
            props.soc().unwrap_or("unknown"),
            props.model().unwrap_or("unknown")
        );

        let bin_dir = self.device.bin_dir.trim_end_matches('/');
        self.shell(serial, &["rm", "-rf", bin_dir]).await?;
        self.shell(serial, &["mkdir", "-p", bin_dir]).await?;

        let device_binary = format!("{}/{}", bin_dir, binary_name);
        self.bridge.push(serial, host_binary, &device_binary).await?;

        let mut command = self.runtime_env();
        command.push(device_binary);
        command.extend(args.iter().cloned());

        let output = self
            .bridge
            .shell_streaming(serial, &command, on_output)
            .await?;

        if !stdout_success(&output) {
            let marker = FAILURE_MARKERS
                .iter()
                .find(|m| output.contains(*m))
                .copied()
                .unwrap_or("failure marker");
            return Err(DevfarmError::RunFailed {
                device: serial.to_string(),
                reason: format!("{} found in output of {}", marker, binary_name),
            });
        }

        debug!("Run of {} on {} succeeded", binary_name, serial);
        Ok(RunOutput {
            serial: serial.to_string(),
            output,
        })
    }

    // Callers must hold the device lock.
    async fn collect_locked(
        &self,
        serial: &str,
        file_name: &str,
        dest_dir: &Path,
    ) -> DevfarmResult<PathBuf> {
        let local_dir = dest_dir.join(&self.cache.binary_subdir);
        match tokio::fs::remove_dir_all(&local_dir).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                return Err(DevfarmError::io(
                    format!("removing {}", local_dir.display()),
                    e,
                ))
            }
            _ => {}
        }
        tokio::fs::create_dir_all(&local_dir)
            .await
            .map_err(|e| DevfarmError::io(format!("creating {}", local_dir.display()), e))?;

        let remote = format!(
            "{}/{}",
            self.device.compiled_cache_dir.trim_end_matches('/'),
            file_name
        );
        self.bridge.pull(serial, &remote, &local_dir).await?;

        let local = local_dir.join(file_name);
        info!("Collected compiled cache from {} into {}", serial, local.display());
        Ok(local)
    }

    /// Take the device lock after checking the device is attached
    async fn lock_device(&self, serial: &str) -> DevfarmResult<DeviceLock> {
        let attached = self.bridge.devices().await?;
        if !attached.iter().any(|s| s == serial) {
            return Err(DevfarmError::DeviceNotFound(serial.to_string()));
        }
        self.locks.acquire_async(serial, self.lock_timeout).await
    }

    async fn shell(&self, serial: &str, command: &[&str]) -> DevfarmResult<String> {
        let command: Vec<String> = command.iter().map(|s| s.to_string()).collect();
        self.bridge.shell(serial, &command).await
    }
}
