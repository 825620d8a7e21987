//! Device bridge abstraction
//!
//! Provides a trait over the tool that talks to attached devices, so the
//! runner can be driven by `adb` in production and by a fake in tests.

use crate::error::DevfarmResult;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;

/// Abstract device bridge interface
#[async_trait]
pub trait DeviceBridge: Send + Sync {
    /// Check if the bridge tool can be executed
    async fn is_available(&self) -> bool;

    /// Serials of attached devices that are ready for use
    async fn devices(&self) -> DevfarmResult<Vec<String>>;

    /// System properties of a device
    async fn getprop(&self, serial: &str) -> DevfarmResult<DeviceProps>;

    /// Run a shell command on the device and return its combined output
    async fn shell(&self, serial: &str, command: &[String]) -> DevfarmResult<String>;

    /// Run a shell command on the device, passing each output line to
    /// `on_output` as it arrives. Returns the combined output.
    async fn shell_streaming(
        &self,
        serial: &str,
        command: &[String],
        on_output: &(dyn Fn(String) + Send + Sync),
    ) -> DevfarmResult<String>;

    /// Copy a host file onto the device
    async fn push(&self, serial: &str, src: &Path, dst: &str) -> DevfarmResult<()>;

    /// Copy a device file into a host directory
    async fn pull(&self, serial: &str, src: &str, dst: &Path) -> DevfarmResult<()>;

    /// Get the human-readable bridge name for display
    fn bridge_name(&self) -> &'static str;
}

/// Device system properties (`getprop` listing)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceProps(BTreeMap<String, String>);

impl DeviceProps {
    /// Parse `[key]: [value]` lines. Other lines are skipped.
    pub fn parse(output: &str) -> Self {
        let props = output
            .lines()
            .filter_map(|line| {
                let rest = line.trim().strip_prefix('[')?;
                let (key, rest) = rest.split_once("]: [")?;
                let value = rest.strip_suffix(']')?;
                if key.is_empty() || value.is_empty() {
                    return None;
                }
                Some((key.to_string(), value.to_string()))
            })
            .collect();
        Self(props)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// SoC / board platform, e.g. `msm8998`
    pub fn soc(&self) -> Option<&str> {
        self.get("ro.board.platform")
    }

    /// Product model as reported by the device
    pub fn model(&self) -> Option<&str> {
        self.get("ro.product.model")
    }

    /// Supported ABIs in preference order
    pub fn abis(&self) -> Vec<String> {
        self.get("ro.product.cpu.abilist")
            .map(|list| {
                list.split(',')
                    .map(|abi| abi.trim().to_string())
                    .filter(|abi| !abi.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// An attached device with the properties read from it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachedDevice {
    pub serial: String,
    pub props: DeviceProps,
}

/// Group attached devices by SoC, each group sorted by serial. Devices
/// without a platform property are listed under `unknown`.
pub async fn group_by_soc(
    bridge: &dyn DeviceBridge,
) -> DevfarmResult<BTreeMap<String, Vec<AttachedDevice>>> {
    let mut groups: BTreeMap<String, Vec<AttachedDevice>> = BTreeMap::new();
    for serial in bridge.devices().await? {
        let props = bridge.getprop(&serial).await?;
        let soc = props.soc().unwrap_or("unknown").to_string();
        groups
            .entry(soc)
            .or_default()
            .push(AttachedDevice { serial, props });
    }
    for devices in groups.values_mut() {
        devices.sort_by(|a, b| a.serial.cmp(&b.serial));
    }
    Ok(groups)
}
