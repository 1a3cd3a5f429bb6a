//! Exclusive run lock: one signing operation at a time per machine.
//!
//! Exclusion comes from an advisory `flock` on the lock file, so a holder that
//! dies (even by SIGKILL) releases it with its file descriptor. The pid written
//! inside is informational only.

use std::fs::{File, OpenOptions, TryLockError};
use std::io::{Seek, SeekFrom, Write};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::error::PipelineError;

/// Attempts before giving up when the lock file keeps being replaced under us.
const ACQUIRE_ATTEMPTS: usize = 3;

/// Held for the duration of a run; removes the lock file when dropped.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    file: File,
}

// The lock belongs to the inode at `path` only while the path still names it.
// A holder unlinks the file before unlocking, so a waiter that locked the old
// inode must start over.
fn still_linked(file: &File, path: &Path) -> std::io::Result<bool> {
    let held = file.metadata()?;
    match std::fs::metadata(path) {
        Ok(current) => Ok(current.dev() == held.dev() && current.ino() == held.ino()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

impl RunLock {
    /// Take the lock at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Locked`] if another process holds the lock, or
    /// [`PipelineError::Io`] if the lock file cannot be opened.
    pub fn acquire(path: &Path) -> Result<Self, PipelineError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        for _ in 0..ACQUIRE_ATTEMPTS {
            let mut file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(path)?;
            match file.try_lock() {
                Ok(()) => {}
                Err(TryLockError::WouldBlock) => {
                    let holder = std::fs::read_to_string(path)
                        .unwrap_or_default()
                        .trim()
                        .to_owned();
                    return Err(PipelineError::Locked {
                        path: path.to_path_buf(),
                        holder,
                    });
                }
                Err(TryLockError::Error(e)) => return Err(e.into()),
            }
            if !still_linked(&file, path)? {
                debug!("{} was replaced while locking; retrying", path.display());
                continue;
            }
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
            writeln!(file, "{}", std::process::id())?;
            debug!("acquired {}", path.display());
            return Ok(Self {
                path: path.to_path_buf(),
                file,
            });
        }
        Err(PipelineError::Locked {
            path: path.to_path_buf(),
            holder: "unknown".to_owned(),
        })
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        // Unlink while still holding the lock; closing `file` then releases it.
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("could not remove lock {}: {e}", self.path.display());
        }
        if let Err(e) = self.file.unlock() {
            debug!("unlock {}: {e}", self.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn second_acquire_fails_while_held() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bootsig.lock");
        let _held = RunLock::acquire(&path).unwrap();
        let err = RunLock::acquire(&path).unwrap_err();
        assert!(matches!(err, PipelineError::Locked { holder, .. } if holder == std::process::id().to_string()));
    }

    #[test]
    fn lock_is_released_on_drop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bootsig.lock");
        drop(RunLock::acquire(&path).unwrap());
        assert!(!path.exists());
        assert!(RunLock::acquire(&path).is_ok());
    }

    #[test]
    fn leftover_file_without_holder_is_reused() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bootsig.lock");
        std::fs::write(&path, "999999999\n").unwrap();
        let lock = RunLock::acquire(&path).unwrap();
        let holder = std::fs::read_to_string(&path).unwrap();
        assert_eq!(holder.trim(), std::process::id().to_string());
        drop(lock);
    }

    #[test]
    fn dead_pid_in_file_does_not_displace_live_holder() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bootsig.lock");
        let _held = RunLock::acquire(&path).unwrap();
        std::fs::write(&path, "999999999\n").unwrap();

        for _ in 0..2 {
            assert!(matches!(RunLock::acquire(&path), Err(PipelineError::Locked { .. })));
        }
        assert!(path.exists());
    }

    #[test]
    fn lock_on_an_unlinked_file_is_not_honoured() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bootsig.lock");
        let orphan = OpenOptions::new().write(true).create(true).truncate(false).open(&path).unwrap();
        orphan.try_lock().unwrap();
        std::fs::remove_file(&path).unwrap();

        let lock = RunLock::acquire(&path).unwrap();
        assert!(still_linked(&lock.file, &path).unwrap());
        assert!(!still_linked(&orphan, &path).unwrap());
    }
}
