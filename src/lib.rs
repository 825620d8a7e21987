//! devfarm - device farm glue for on-device model builds
//!
//! Serializes access to attached devices across processes with per-device
//! file locks, and merges the compiled binary caches that device runs
//! leave behind into one shippable file.

pub mod cache;
pub mod cli;
pub mod config;
pub mod device;
pub mod error;
pub mod lock;
pub mod ui;

pub use error::{DevfarmError, DevfarmResult};
