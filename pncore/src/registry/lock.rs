//! Append handle and advisory lock on the registry file.
//!
//! A [`RegistryFile`] owns one open file description in append mode. Writers
//! call [`RegistryFile::lock`] around each append; the returned
//! [`RegistryLock`] holds an exclusive whole-file `flock(2)` lock that other
//! handles (in this or any other process) block on. The wait has no timeout.
//! The lock is released when the guard is released or dropped, and the
//! descriptor is closed when the `RegistryFile` is dropped.
use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use log::{trace, warn};

use crate::utils::error::{PnError, PnResult};

/// Check that `path` is either absent or a regular file (symlinks are
/// followed). Returns whether the file exists.
pub fn ensure_regular_or_absent(path: &Path) -> PnResult<bool> {
    match std::fs::metadata(path) {
        Ok(metadata) if metadata.is_file() => Ok(true),
        Ok(_) => Err(PnError::NotRegularFile {
            path: path.to_path_buf(),
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(PnError::PathIoError {
            source: e,
            path: path.to_path_buf(),
        }),
    }
}

#[cfg(unix)]
fn flock(file: &File, operation: libc::c_int) -> io::Result<()> {
    use std::os::fd::AsRawFd;

    loop {
        // SAFETY: the descriptor is owned by `file` and stays open for the call.
        let ret = unsafe { libc::flock(file.as_raw_fd(), operation) };
        if ret == 0 {
            return Ok(());
        }

        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

#[cfg(unix)]
fn lock_exclusive(file: &File) -> io::Result<()> {
    flock(file, libc::LOCK_EX)
}

#[cfg(unix)]
fn unlock(file: &File) -> io::Result<()> {
    flock(file, libc::LOCK_UN)
}

#[cfg(not(unix))]
fn lock_exclusive(_file: &File) -> io::Result<()> {
    static WARNED: std::sync::Once = std::sync::Once::new();
    WARNED.call_once(|| {
        warn!("Advisory file locking is unavailable on this platform, registry appends are unlocked")
    });
    Ok(())
}

#[cfg(not(unix))]
fn unlock(_file: &File) -> io::Result<()> {
    Ok(())
}

/// Append-mode handle on the registry file.
#[derive(Debug)]
pub struct RegistryFile {
    file: File,
    path: PathBuf,
}

impl RegistryFile {
    /// Open `path` for appending, creating it if needed. Refuses paths that
    /// exist but are not regular files.
    pub fn open_append(path: &Path) -> PnResult<Self> {
        ensure_regular_or_absent(path)?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| PnError::PathIoError {
                source: e,
                path: path.to_path_buf(),
            })?;

        trace!("Opened registry file '{}' for appending", path.display());
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Block until the exclusive lock is granted.
    pub fn lock(&mut self) -> PnResult<RegistryLock<'_>> {
        lock_exclusive(&self.file).map_err(|e| PnError::LockError {
            action: "lock",
            source: e,
            path: self.path.clone(),
        })?;

        Ok(RegistryLock {
            handle: self,
            released: false,
        })
    }
}

impl Drop for RegistryFile {
    fn drop(&mut self) {
        trace!("Closing registry file '{}'", self.path.display());
    }
}

/// Exclusive lock on a [`RegistryFile`].
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct RegistryLock<'a> {
    handle: &'a mut RegistryFile,
    released: bool,
}

impl RegistryLock<'_> {
    /// Append `line` followed by a newline with a single write.
    pub fn append_line(&mut self, line: &str) -> PnResult<()> {
        let mut buf = String::with_capacity(line.len() + 1);
        buf.push_str(line);
        buf.push('\n');

        self.handle
            .file
            .write_all(buf.as_bytes())
            .and_then(|_| self.handle.file.flush())
            .map_err(|e| PnError::PathIoError {
                source: e,
                path: self.handle.path.clone(),
            })
    }

    /// Release the lock, reporting a failure to do so.
    pub fn release(mut self) -> PnResult<()> {
        self.released = true;
        unlock(&self.handle.file).map_err(|e| PnError::LockError {
            action: "unlock",
            source: e,
            path: self.handle.path.clone(),
        })
    }
}

impl Drop for RegistryLock<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        if let Err(e) = unlock(&self.handle.file) {
            warn!(
                "Unable to unlock registry file '{}': {}",
                self.handle.path.display(),
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn appends_lines_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("order.list");
        {
            let mut file = RegistryFile::open_append(&path).unwrap();
            for name in ["a", "b"] {
                let mut lock = file.lock().unwrap();
                lock.append_line(name).unwrap();
                lock.release().unwrap();
            }
        }
        {
            let mut file = RegistryFile::open_append(&path).unwrap();
            let mut lock = file.lock().unwrap();
            lock.append_line("c").unwrap();
        }

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a\nb\nc\n");
    }

    #[test]
    fn refuses_directories() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            RegistryFile::open_append(dir.path()),
            Err(PnError::NotRegularFile { .. })
        ));
        assert!(matches!(
            ensure_regular_or_absent(dir.path()),
            Err(PnError::NotRegularFile { .. })
        ));
    }

    #[test]
    fn absent_path_is_accepted() {
        let dir = tempdir().unwrap();
        assert!(!ensure_regular_or_absent(&dir.path().join("absent.list")).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn dropped_guard_lets_another_handle_lock() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reacquire.list");
        let mut first = RegistryFile::open_append(&path).unwrap();
        let mut second = RegistryFile::open_append(&path).unwrap();

        drop(first.lock().unwrap());
        // flock is tied to the open file description, a second handle would
        // block forever if the first guard had leaked its lock.
        let guard = second.lock().unwrap();
        guard.release().unwrap();

        drop(first);
        drop(second);
    }
}
