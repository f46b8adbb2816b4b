//! Single-instance daemon lock.
//!
//! An advisory exclusive lock on `~/.tandem/daemon/daemon.lock`, held for the
//! whole time a daemon serves. The OS drops the lock if the process dies; on
//! some platforms that release can lag a crash slightly, so a caller seeing
//! [`DaemonError::AlreadyRunning`] right after a crash may retry.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::{io_err, DaemonError};
use crate::paths::{daemon_dir, lock_path};

/// Guard for the held daemon lock. Dropping it releases the lock.
#[derive(Debug)]
pub struct DaemonLock {
    file: File,
    path: PathBuf,
}

impl DaemonLock {
    /// Take the lock or fail with [`DaemonError::AlreadyRunning`].
    pub fn acquire(home: &Path) -> Result<Self, DaemonError> {
        let path = lock_path(home);
        let mut file = open_lock_file(home, &path)?;

        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {}
            Err(err) if is_contended(&err) => {
                return Err(DaemonError::AlreadyRunning { path });
            }
            Err(err) => return Err(io_err(&path, err)),
        }

        // The pid is informational only; the lock itself is the truth.
        file.set_len(0).map_err(|e| io_err(&path, e))?;
        writeln!(file, "{}", std::process::id()).map_err(|e| io_err(&path, e))?;

        tracing::debug!(path = %path.display(), "daemon lock acquired");
        Ok(Self { file, path })
    }

    /// Whether some process currently holds the lock.
    pub fn is_held(home: &Path) -> Result<bool, DaemonError> {
        let path = lock_path(home);
        if !path.exists() {
            return Ok(false);
        }
        let file = open_lock_file(home, &path)?;
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {
                FileExt::unlock(&file).map_err(|e| io_err(&path, e))?;
                Ok(false)
            }
            Err(err) if is_contended(&err) => Ok(true),
            Err(err) => Err(io_err(&path, err)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DaemonLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), error = %err, "failed to release daemon lock");
        } else {
            tracing::debug!(path = %self.path.display(), "daemon lock released");
        }
    }
}

fn open_lock_file(home: &Path, path: &Path) -> Result<File, DaemonError> {
    let dir = daemon_dir(home);
    if !dir.exists() {
        fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
    }
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| io_err(path, e))
}

fn is_contended(err: &std::io::Error) -> bool {
    err.kind() == ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}
