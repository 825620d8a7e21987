//! Per-device exclusive locks shared across processes
//!
//! Every process that drives a physical device takes the device's lock
//! first. The lock is an OS advisory lock on `<dir>/<prefix><serial>`, so
//! independent invocations on the same machine see each other, and a
//! killed holder releases it implicitly.

use super::flock;
use crate::config::LockConfig;
use crate::error::{DevfarmError, DevfarmResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Interval between acquisition attempts while a device is contended
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Diagnostic record written into the lock file while it is held
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
    /// Process ID of the holder
    pub pid: u32,
    /// When the lock was taken
    pub acquired_at: DateTime<Utc>,
    /// What the holder is doing with the device
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
}

/// Observed state of a device lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockStatus {
    /// Nobody holds the lock
    Free,
    /// Held by another descriptor; the holder record if it could be read
    Locked(Option<LockHolder>),
}

impl LockStatus {
    /// Whether the lock is currently held
    pub fn is_locked(&self) -> bool {
        matches!(self, Self::Locked(_))
    }
}

/// Hands out device locks rooted at one lock directory
#[derive(Debug, Clone)]
pub struct DeviceLockManager {
    lock_dir: PathBuf,
    prefix: String,
    purpose: Option<String>,
}

impl DeviceLockManager {
    /// Create a manager placing lock files at `<lock_dir>/<prefix><device>`
    pub fn new(lock_dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            lock_dir: lock_dir.into(),
            prefix: prefix.into(),
            purpose: None,
        }
    }

    /// Create a manager from the `[lock]` config section
    pub fn from_config(config: &LockConfig) -> Self {
        Self::new(config.dir.clone(), config.prefix.clone())
    }

    /// Record `purpose` in the holder record of every lock taken
    pub fn with_purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = Some(purpose.into());
        self
    }

    /// Directory holding the lock files
    pub fn lock_dir(&self) -> &Path {
        &self.lock_dir
    }

    /// Lock file path for a device. The id is used verbatim.
    pub fn lock_path(&self, device_id: &str) -> PathBuf {
        self.lock_dir.join(format!("{}{}", self.prefix, device_id))
    }

    /// Acquire the device lock, blocking the calling thread up to `timeout`.
    ///
    /// A zero timeout makes exactly one attempt. Fails with
    /// [`DevfarmError::LockTimeout`] if the lock is still held when the
    /// timeout elapses; the caller decides whether to retry.
    pub fn acquire(&self, device_id: &str, timeout: Duration) -> DevfarmResult<DeviceLock> {
        let start = Instant::now();
        let mut waiting = false;

        loop {
            if let Some(lock) = self.try_acquire(device_id)? {
                self.log_acquired(device_id, start, waiting);
                return Ok(lock);
            }
            let pause = self.next_pause(device_id, start, timeout, &mut waiting)?;
            std::thread::sleep(pause);
        }
    }

    /// Acquire the device lock on the async runtime, waiting up to `timeout`.
    ///
    /// Same contract as [`acquire`](Self::acquire). Dropping the returned
    /// future while it waits abandons the attempt with nothing held.
    pub async fn acquire_async(
        &self,
        device_id: &str,
        timeout: Duration,
    ) -> DevfarmResult<DeviceLock> {
        let start = Instant::now();
        let mut waiting = false;

        loop {
            if let Some(lock) = self.try_acquire(device_id)? {
                self.log_acquired(device_id, start, waiting);
                return Ok(lock);
            }
            let pause = self.next_pause(device_id, start, timeout, &mut waiting)?;
            tokio::time::sleep(pause).await;
        }
    }

    /// Make a single attempt at the device lock
    pub fn try_acquire(&self, device_id: &str) -> DevfarmResult<Option<DeviceLock>> {
        let lock_path = self.lock_path(device_id);
        let Some(lock_file) = self.try_lock_file(&lock_path)? else {
            return Ok(None);
        };

        let mut lock = DeviceLock {
            device_id: device_id.to_string(),
            lock_path,
            acquired_at: Utc::now(),
            lock_file,
        };
        if let Err(e) = lock.record_holder(self.purpose.clone()) {
            warn!(
                "Could not write holder record to {}: {}",
                lock.lock_path.display(),
                e
            );
        }
        Ok(Some(lock))
    }

    /// Check whether someone holds the device lock, without blocking.
    ///
    /// The probe's own transient lock is released before returning.
    pub fn is_locked(&self, device_id: &str) -> DevfarmResult<bool> {
        let lock_path = self.lock_path(device_id);
        match self.try_lock_file(&lock_path)? {
            Some(file) => {
                flock::unlock(&file);
                Ok(false)
            }
            None => Ok(true),
        }
    }

    /// Probe the lock and, when held, read the holder record
    pub fn status(&self, device_id: &str) -> DevfarmResult<LockStatus> {
        if !self.is_locked(device_id)? {
            return Ok(LockStatus::Free);
        }

        let lock_path = self.lock_path(device_id);
        let holder = match fs::read_to_string(&lock_path) {
            Ok(content) => serde_json::from_str(content.trim()).ok(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                return Err(DevfarmError::io(
                    format!("reading lock file {}", lock_path.display()),
                    e,
                ))
            }
        };
        Ok(LockStatus::Locked(holder))
    }

    fn try_lock_file(&self, lock_path: &Path) -> DevfarmResult<Option<File>> {
        fs::create_dir_all(&self.lock_dir).map_err(|e| {
            DevfarmError::io(
                format!("creating lock directory {}", self.lock_dir.display()),
                e,
            )
        })?;

        match flock::try_lock_exclusive(lock_path) {
            Ok(file) => Ok(Some(file)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(DevfarmError::io(
                format!("locking {}", lock_path.display()),
                e,
            )),
        }
    }

    /// How long to sleep before the next attempt, or the timeout error
    fn next_pause(
        &self,
        device_id: &str,
        start: Instant,
        timeout: Duration,
        waiting: &mut bool,
    ) -> DevfarmResult<Duration> {
        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(DevfarmError::LockTimeout {
                device_id: device_id.to_string(),
                timeout,
            });
        }

        if !*waiting {
            info!(
                "Device {} is locked by another job, waiting up to {:.1}s",
                device_id,
                timeout.as_secs_f64()
            );
            *waiting = true;
        }
        Ok(POLL_INTERVAL.min(timeout - elapsed))
    }

    fn log_acquired(&self, device_id: &str, start: Instant, waited: bool) {
        if waited {
            info!(
                "Locked device {} after {:.1}s",
                device_id,
                start.elapsed().as_secs_f64()
            );
        } else {
            debug!("Locked device {}", device_id);
        }
    }
}

/// Exclusive hold on one device. Released when dropped.
#[derive(Debug)]
pub struct DeviceLock {
    device_id: String,
    lock_path: PathBuf,
    acquired_at: DateTime<Utc>,
    lock_file: File,
}

impl DeviceLock {
    /// Device this lock is held for
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Lock file path
    pub fn path(&self) -> &Path {
        &self.lock_path
    }

    /// When the lock was taken
    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }

    fn record_holder(&mut self, purpose: Option<String>) -> io::Result<()> {
        let holder = LockHolder {
            pid: std::process::id(),
            acquired_at: self.acquired_at,
            purpose,
        };
        let json = serde_json::to_string(&holder).map_err(io::Error::other)?;

        self.lock_file.set_len(0)?;
        self.lock_file.seek(SeekFrom::Start(0))?;
        self.lock_file.write_all(json.as_bytes())?;
        self.lock_file.flush()
    }
}

impl Drop for DeviceLock {
    fn drop(&mut self) {
        let _ = self.lock_file.set_len(0);
        flock::unlock(&self.lock_file);
        debug!("Released device {}", self.device_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use tempfile::TempDir;

    fn manager(dir: &TempDir) -> DeviceLockManager {
        DeviceLockManager::new(dir.path(), "device-lock-")
    }

    #[test]
    fn lock_path_uses_prefix_and_serial() {
        let config = LockConfig::default();
        let locks = DeviceLockManager::from_config(&config);
        assert_eq!(
            locks.lock_path("0123456789ABCDEF"),
            PathBuf::from("/tmp/device-lock-0123456789ABCDEF")
        );
    }

    #[test]
    fn acquire_creates_lock_dir() {
        let dir = TempDir::new().unwrap();
        let locks = DeviceLockManager::new(dir.path().join("nested/locks"), "device-lock-");

        let lock = locks.acquire("serial1", Duration::from_secs(1)).unwrap();

        assert!(lock.path().exists());
        assert_eq!(lock.device_id(), "serial1");
    }

    #[test]
    fn is_locked_tracks_holder_lifetime() {
        let dir = TempDir::new().unwrap();
        let locks = manager(&dir);

        assert!(!locks.is_locked("serial1").unwrap());
        let lock = locks.acquire("serial1", Duration::from_secs(1)).unwrap();
        assert!(locks.is_locked("serial1").unwrap());

        drop(lock);
        assert!(!locks.is_locked("serial1").unwrap());
    }

    #[test]
    fn probe_does_not_hold_the_lock() {
        let dir = TempDir::new().unwrap();
        let locks = manager(&dir);

        assert!(!locks.is_locked("serial1").unwrap());
        assert!(locks.try_acquire("serial1").unwrap().is_some());
    }

    #[test]
    fn distinct_devices_do_not_block() {
        let dir = TempDir::new().unwrap();
        let locks = manager(&dir);

        let _a = locks.acquire("serial-a", Duration::ZERO).unwrap();
        let _b = locks.acquire("serial-b", Duration::ZERO).unwrap();
        assert!(locks.is_locked("serial-a").unwrap());
        assert!(locks.is_locked("serial-b").unwrap());
    }

    #[test]
    fn contention_times_out_with_device_and_timeout() {
        let dir = TempDir::new().unwrap();
        let locks = manager(&dir);
        let _held = locks.acquire("serial1", Duration::ZERO).unwrap();

        let timeout = Duration::from_millis(150);
        let start = Instant::now();
        let err = locks.acquire("serial1", timeout).unwrap_err();

        assert!(start.elapsed() >= timeout);
        match err {
            DevfarmError::LockTimeout {
                device_id,
                timeout: t,
            } => {
                assert_eq!(device_id, "serial1");
                assert_eq!(t, timeout);
            }
            other => panic!("expected LockTimeout, got {other:?}"),
        }
    }

    #[test]
    fn zero_timeout_fails_immediately_when_held() {
        let dir = TempDir::new().unwrap();
        let locks = manager(&dir);
        let _held = locks.acquire("serial1", Duration::ZERO).unwrap();

        let start = Instant::now();
        assert!(locks.acquire("serial1", Duration::ZERO).is_err());
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn waiter_succeeds_after_release() {
        let dir = TempDir::new().unwrap();
        let locks = manager(&dir);
        let held = locks.acquire("serial1", Duration::ZERO).unwrap();

        let (tx, rx) = mpsc::channel();
        let waiter_locks = locks.clone();
        let handle = thread::spawn(move || {
            tx.send(()).unwrap();
            waiter_locks
                .acquire("serial1", Duration::from_secs(10))
                .map(|lock| lock.device_id().to_string())
        });

        rx.recv().unwrap();
        thread::sleep(Duration::from_millis(100));
        drop(held);

        let acquired = handle.join().unwrap().unwrap();
        assert_eq!(acquired, "serial1");
    }

    #[test]
    fn status_reports_holder_record() {
        let dir = TempDir::new().unwrap();
        let locks = manager(&dir).with_purpose("tuning run");

        assert_eq!(locks.status("serial1").unwrap(), LockStatus::Free);

        let lock = locks.acquire("serial1", Duration::ZERO).unwrap();
        match locks.status("serial1").unwrap() {
            LockStatus::Locked(Some(holder)) => {
                assert_eq!(holder.pid, std::process::id());
                assert_eq!(holder.acquired_at, lock.acquired_at());
                assert_eq!(holder.purpose.as_deref(), Some("tuning run"));
            }
            other => panic!("expected holder record, got {other:?}"),
        }

        drop(lock);
        assert_eq!(locks.status("serial1").unwrap(), LockStatus::Free);
    }

    #[tokio::test]
    async fn async_acquire_times_out() {
        let dir = TempDir::new().unwrap();
        let locks = manager(&dir);
        let _held = locks.acquire("serial1", Duration::ZERO).unwrap();

        let err = locks
            .acquire_async("serial1", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, DevfarmError::LockTimeout { .. }));
    }

    #[tokio::test]
    async fn cancelled_wait_leaves_device_free() {
        let dir = TempDir::new().unwrap();
        let locks = manager(&dir);
        let held = locks.acquire("serial1", Duration::ZERO).unwrap();

        let cancelled = tokio::time::timeout(
            Duration::from_millis(100),
            locks.acquire_async("serial1", Duration::from_secs(30)),
        )
        .await;
        assert!(cancelled.is_err());

        drop(held);
        assert!(!locks.is_locked("serial1").unwrap());
    }
}
