//! Advisory exclusive file locks
//!
//! Backed by `fs2`: `flock(2)` on Unix, `LockFileEx` on Windows. The OS
//! drops the lock when the last handle to the open file closes, so a
//! crashed holder never leaves the lock set.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

/// Open the lock file and take a non-blocking exclusive lock on it.
///
/// Returns an error of kind `WouldBlock` when another handle holds the
/// lock. The file is never truncated here so a holder's diagnostic record
/// survives contenders opening it.
pub(crate) fn try_lock_exclusive(lock_path: &Path) -> io::Result<File> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path)?;

    match FileExt::try_lock_exclusive(&file) {
        Ok(()) => Ok(file),
        Err(e) if is_contended(&e) => Err(io::Error::new(io::ErrorKind::WouldBlock, "lock held")),
        Err(e) => Err(e),
    }
}

/// Release a lock taken with [`try_lock_exclusive`]
pub(crate) fn unlock(file: &File) {
    let _ = FileExt::unlock(file);
}

fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}
