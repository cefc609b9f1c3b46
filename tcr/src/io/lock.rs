//! Advisory single-writer lock for one project tree.
//!
//! Every mutating command holds this lock around its whole
//! read-modify-write sequence on the state file.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fd_lock::RwLock;
use tracing::{debug, warn};

use crate::error::TcrError;

/// Exclusive lock on the project lock file, released on drop.
pub struct ProjectLock {
    path: PathBuf,
    /// Second handle on the locked file, used to record the holder PID.
    holder: File,
    /// The lock lives as long as this descriptor stays open.
    _lock: RwLock<File>,
}

impl ProjectLock {
    /// Acquire the lock without blocking.
    ///
    /// Fails with [`TcrError::LockHeld`] if another process holds it; the
    /// holder PID is read back from the file when available.
    pub fn acquire(path: &Path) -> Result<Self, TcrError> {
        let lock_err = |source: io::Error| TcrError::LockIo {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(lock_err)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(lock_err)?;
        let mut holder = file.try_clone().map_err(lock_err)?;
        let mut lock = RwLock::new(file);

        match lock.try_write() {
            // Unlocking is left to closing the descriptor when `_lock` drops.
            Ok(guard) => std::mem::forget(guard),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                let pid = read_holder(&mut holder);
                warn!(path = %path.display(), holder = ?pid, "project lock held");
                return Err(TcrError::LockHeld {
                    path: path.to_path_buf(),
                    holder: pid,
                });
            }
            Err(err) => return Err(lock_err(err)),
        }

        holder.set_len(0).map_err(lock_err)?;
        holder.seek(SeekFrom::Start(0)).map_err(lock_err)?;
        writeln!(holder, "{}", std::process::id()).map_err(lock_err)?;
        holder.flush().map_err(lock_err)?;
        debug!(path = %path.display(), "project lock acquired");
        Ok(Self {
            path: path.to_path_buf(),
            holder,
            _lock: lock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Debug for ProjectLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectLock")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl Drop for ProjectLock {
    fn drop(&mut self) {
        // Clear the PID while the lock is still held so a later reader never
        // reports a stale holder.
        if let Err(err) = self.holder.set_len(0) {
            warn!(path = %self.path.display(), err = %err, "failed to clear lock holder");
        }
        debug!(path = %self.path.display(), "project lock released");
    }
}

fn read_holder(file: &mut File) -> Option<u32> {
    let mut contents = String::new();
    file.seek(SeekFrom::Start(0)).ok()?;
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}
