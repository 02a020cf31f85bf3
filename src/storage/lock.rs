//! Run-lock: non-blocking advisory file lock over the state directory
//!
//! A scheduled run holds the lock for its whole duration. Administrative
//! config writes take it briefly and fail fast when it is already held,
//! so an edit is never raced with an in-progress run.
//!
//! The lock is an exclusive `flock` on `<state_dir>/.run.lock`. Locks belong
//! to open file descriptions, so two acquisitions from the same process
//! contend exactly like two processes do.
//!
//! # Example
//!
//! ```no_run
//! use feedwarden::storage::lock::{LockError, RunLock};
//!
//! let lock = RunLock::new("/var/lib/feedwarden/.run.lock");
//! match lock.try_acquire("run") {
//!     Ok(_guard) => { /* released when the guard drops */ }
//!     Err(LockError::Busy { .. }) => eprintln!("a run is already in progress"),
//!     Err(e) => eprintln!("lock failed: {e}"),
//! }
//! ```

use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use thiserror::Error;

/// Errors returned by [`RunLock`]
#[derive(Debug, Error)]
pub enum LockError {
    /// Another holder owns the lock
    #[error("run is in progress: lock held at {}", path.display())]
    Busy { path: PathBuf },

    /// The lock file could not be opened, locked or written
    #[error("lock {} failed: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl LockError {
    /// Whether this error reports contention rather than a failure
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy { .. })
    }

    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Named, process-external mutual exclusion over a lock file
#[derive(Debug, Clone)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Create a handle for the lock at `path`. Nothing is touched on disk.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Try to take the lock without waiting.
    ///
    /// On success the owner metadata (`pid=<pid>` and `owner=<owner>`) is
    /// written into the lock file and a guard is returned. Contention is
    /// reported as [`LockError::Busy`] immediately; callers decide what to do
    /// with it, nothing is retried here.
    pub fn try_acquire(&self, owner: &str) -> Result<LockGuard, LockError> {
        let file = open_lock_file(&self.path).map_err(|e| LockError::io(&self.path, e))?;

        if let Err(err) = file.try_lock_exclusive() {
            if is_contended(&err) {
                tracing::debug!(path = %self.path.display(), owner, "Run lock is busy");
                return Err(LockError::Busy {
                    path: self.path.clone(),
                });
            }
            return Err(LockError::io(&self.path, err));
        }

        let mut guard = LockGuard {
            file: Some(file),
            path: self.path.clone(),
        };

        let payload = format!("pid={}\nowner={owner}\n", std::process::id());
        if let Err(err) = guard.write_payload(&payload) {
            let _ = guard.release();
            return Err(LockError::io(&self.path, err));
        }

        tracing::debug!(path = %self.path.display(), owner, "Run lock acquired");
        Ok(guard)
    }

    /// Report whether somebody currently holds the lock.
    ///
    /// This is a point-in-time probe; use [`RunLock::try_acquire`] when the
    /// answer has to stay true for a critical section.
    pub fn is_locked(&self) -> bool {
        let Ok(file) = open_lock_file(&self.path) else {
            return false;
        };
        match file.try_lock_exclusive() {
            Ok(()) => {
                let _ = FileExt::unlock(&file);
                false
            }
            Err(err) => is_contended(&err),
        }
    }
}

/// Scoped ownership of the run-lock
///
/// Dropping the guard releases the lock, so every exit path of a locked
/// section (early return, `?`, panic unwinding) gives it back.
#[derive(Debug)]
pub struct LockGuard {
    file: Option<File>,
    path: PathBuf,
}

impl LockGuard {
    /// Path of the held lock file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the guard still holds the lock
    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    /// Release the lock. Calling it again is a no-op.
    ///
    /// The owner metadata is cleared; the file itself stays in place because
    /// unlinking a flock'd path races with the next opener.
    pub fn release(&mut self) -> Result<(), LockError> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };

        let cleared = file.set_len(0);
        let unlocked = FileExt::unlock(&file);
        drop(file);

        unlocked.map_err(|e| LockError::io(&self.path, e))?;
        cleared.map_err(|e| LockError::io(&self.path, e))?;

        tracing::debug!(path = %self.path.display(), "Run lock released");
        Ok(())
    }

    fn write_payload(&mut self, payload: &str) -> io::Result<()> {
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(payload.as_bytes())?;
        file.flush()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            tracing::warn!(error = %err, "Failed to release run lock");
        }
    }
}

fn open_lock_file(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}
