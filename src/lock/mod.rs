//! Cross-process device locking
//!
//! Serializes access to shared physical devices across concurrent
//! invocations. Locks live in the filesystem, not in process memory, so
//! they hold across independent processes and die with their holder.

mod flock;
pub mod manager;

pub use manager::{DeviceLock, DeviceLockManager, LockHolder, LockStatus};
