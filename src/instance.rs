//! Single-instance guard
//!
//! The primary instance holds an exclusive advisory lock on the profile's
//! lock file for its whole lifetime. The lock belongs to the open file
//! description, so the kernel drops it when the process exits for any reason.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("cannot open lock file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot lock {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Outcome of a lock attempt
#[derive(Debug)]
pub enum Acquisition {
    /// This process owns the lock; keep the guard alive
    Primary(InstanceLock),
    /// Another process already holds it
    Contended,
}

impl Acquisition {
    pub fn is_primary(&self) -> bool {
        matches!(self, Acquisition::Primary(_))
    }
}

/// Held lock. Dropping it closes the handle and releases the lock.
#[derive(Debug)]
pub struct InstanceLock {
    #[allow(dead_code)]
    file: File,
    path: PathBuf,
}

impl InstanceLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Try to become the primary instance without waiting
pub fn acquire(path: &Path) -> Result<Acquisition, LockError> {
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)
        .map_err(|source| LockError::Open {
            path: path.to_path_buf(),
            source,
        })?;

    match file.try_lock_exclusive() {
        Ok(()) => {
            tracing::info!("Acquired instance lock {}", path.display());
            Ok(Acquisition::Primary(InstanceLock {
                file,
                path: path.to_path_buf(),
            }))
        }
        Err(e) if is_contended(&e) => {
            tracing::info!("Instance lock {} is held by another process", path.display());
            Ok(Acquisition::Contended)
        }
        Err(source) => Err(LockError::Lock {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_is_contended() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frontend.lock");

        let first = acquire(&path).unwrap();
        let second = acquire(&path).unwrap();

        assert!(first.is_primary());
        assert!(matches!(second, Acquisition::Contended));
    }

    #[test]
    fn test_lock_released_when_holder_goes_away() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frontend.lock");

        let first = acquire(&path).unwrap();
        assert!(first.is_primary());
        drop(first);

        assert!(acquire(&path).unwrap().is_primary());
    }

    #[test]
    fn test_contended_attempt_does_not_disturb_holder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frontend.lock");

        let holder = acquire(&path).unwrap();
        for _ in 0..3 {
            assert!(!acquire(&path).unwrap().is_primary());
        }
        assert!(holder.is_primary());
        assert!(!acquire(&path).unwrap().is_primary());
    }

    #[test]
    fn test_existing_file_content_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frontend.lock");
        std::fs::write(&path, b"stale").unwrap();

        let lock = acquire(&path).unwrap();
        assert!(lock.is_primary());
        assert_eq!(std::fs::read(&path).unwrap(), b"stale");
    }

    #[test]
    fn test_missing_parent_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("frontend.lock");

        assert!(matches!(acquire(&path), Err(LockError::Open { .. })));
    }
}
