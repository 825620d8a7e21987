//! Attached device access
//!
//! The bridge trait abstracts the tool that talks to devices; the runner
//! stages and runs binaries on them under the device locks.

pub mod adb;
pub mod bridge;
pub mod runner;

pub use adb::AdbBridge;
pub use bridge::{group_by_soc, AttachedDevice, DeviceBridge, DeviceProps};
pub use runner::{stdout_success, DeviceRunner, RunOutput};
