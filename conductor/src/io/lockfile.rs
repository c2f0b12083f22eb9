//! Cross-process mutual exclusion via advisory file locks.
//!
//! The id-allocation counter and the LRU cache file are the only shared
//! read-modify-write structures in the system. Both go through this module,
//! which never hands out raw lock file handles: callers pass a closure and
//! the lock is held for exactly that critical section.

use std::fs::{self, OpenOptions};
use std::path::Path;

use anyhow::{Context, Result};
use fs2::FileExt;
use tracing::debug;

/// Run `f` while holding an exclusive advisory lock on `lock_path`.
///
/// Blocks until the lock is available. The lock file is created on demand and
/// left in place afterwards; the lock itself is released when the handle is
/// dropped, even if `f` errors.
pub fn with_exclusive_lock<T>(lock_path: &Path, f: impl FnOnce() -> Result<T>) -> Result<T> {
    if let Some(parent) = lock_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create lock directory {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(lock_path)
        .with_context(|| format!("open lock file {}", lock_path.display()))?;
    file.lock_exclusive()
        .with_context(|| format!("acquire lock {}", lock_path.display()))?;
    debug!(lock = %lock_path.display(), "acquired exclusive lock");
    let result = f();
    let _ = FileExt::unlock(&file);
    result
}
