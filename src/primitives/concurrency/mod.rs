#![allow(unsafe_code)]
//! Exclusive advisory lock on a database directory's `.lock` file.

use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::debug;

use crate::types::{Result, VersoError};

/// Length of the locked byte range.
const LOCK_LEN: u64 = 1;

/// Lock files held by this process, keyed by canonical path.
static HELD: Mutex<BTreeSet<PathBuf>> = parking_lot::const_mutex(BTreeSet::new());

/// Holds an exclusive, non-blocking advisory lock for as long as it lives.
///
/// On unix the lock is an `fcntl` record lock, which never conflicts
/// within one process, so a process-wide registry of held paths backs it.
#[derive(Debug)]
pub struct DatabaseLock {
    file: File,
    path: PathBuf,
    key: PathBuf,
}

impl DatabaseLock {
    /// Opens (creating if needed) and locks `path`.
    ///
    /// Fails with `Invalid` when this process or another one already holds
    /// the lock.
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let key = registry_key(path)?;
        // Claimed before opening: closing any descriptor of the file would
        // drop the record lock the current holder owns.
        if !HELD.lock().insert(key.clone()) {
            return Err(VersoError::Invalid(
                "database is already open in this process",
            ));
        }
        match Self::lock_file(path) {
            Ok(file) => {
                debug!(path = %path.display(), "lock.acquired");
                Ok(Self {
                    file,
                    path: path.to_path_buf(),
                    key,
                })
            }
            Err(err) => {
                HELD.lock().remove(&key);
                Err(err)
            }
        }
    }

    fn lock_file(path: &Path) -> Result<File> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        if !platform::lock(&file, LOCK_LEN)? {
            return Err(VersoError::Invalid(
                "database is locked by another process",
            ));
        }
        Ok(file)
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DatabaseLock {
    fn drop(&mut self) {
        if let Err(err) = platform::unlock(&self.file, LOCK_LEN) {
            debug!(error = %err, "lock.release_failed");
        }
        HELD.lock().remove(&self.key);
    }
}

/// Canonical form of `path`; its parent directory must exist.
fn registry_key(path: &Path) -> Result<PathBuf> {
    let name = path
        .file_name()
        .ok_or(VersoError::Invalid("lock path has no file name"))?;
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    Ok(parent.canonicalize()?.join(name))
}

#[cfg(unix)]
mod platform {
    use super::*;
    use std::os::unix::io::AsRawFd;

    fn region(kind: libc::c_short, len: u64) -> libc::flock {
        // SAFETY: `flock` is a plain C struct; all-zero is a valid value.
        let mut region: libc::flock = unsafe { std::mem::zeroed() };
        region.l_type = kind;
        region.l_whence = libc::SEEK_SET as _;
        region.l_start = 0;
        region.l_len = len as libc::off_t;
        region
    }

    pub fn lock(file: &File, len: u64) -> io::Result<bool> {
        let mut flock = region(libc::F_WRLCK as libc::c_short, len);
        loop {
            // SAFETY: the descriptor is owned by `file` and `flock` outlives the call.
            let res = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_SETLK, &mut flock) };
            if res == 0 {
                return Ok(true);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::EAGAIN) | Some(libc::EACCES) => return Ok(false),
                _ => return Err(err),
            }
        }
    }

    pub fn unlock(file: &File, len: u64) -> io::Result<()> {
        let mut flock = region(libc::F_UNLCK as libc::c_short, len);
        // SAFETY: as in `lock`.
        let res = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_SETLK, &mut flock) };
        if res == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

#[cfg(windows)]
mod platform {
    use super::*;
    use std::mem::zeroed;
    use std::os::windows::io::AsRawHandle;
    use windows_sys::Win32::Foundation::ERROR_LOCK_VIOLATION;
    use windows_sys::Win32::Storage::FileSystem::{
        LockFileEx, UnlockFileEx, LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY,
    };
    use windows_sys::Win32::System::IO::OVERLAPPED;

    pub fn lock(file: &File, len: u64) -> io::Result<bool> {
        // SAFETY: the handle is owned by `file`; OVERLAPPED is zero-initialised.
        unsafe {
            let mut overlapped: OVERLAPPED = zeroed();
            let flags = LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY;
            let res = LockFileEx(
                file.as_raw_handle() as isize,
                flags,
                0,
                len as u32,
                (len >> 32) as u32,
                &mut overlapped,
            );
            if res != 0 {
                return Ok(true);
            }
        }
        let err = io::Error::last_os_error();
        if matches!(err.raw_os_error(), Some(code) if code == ERROR_LOCK_VIOLATION as i32) {
            Ok(false)
        } else {
            Err(err)
        }
    }

    pub fn unlock(file: &File, len: u64) -> io::Result<()> {
        // SAFETY: as in `lock`.
        let res = unsafe {
            let mut overlapped: OVERLAPPED = zeroed();
            UnlockFileEx(
                file.as_raw_handle() as isize,
                0,
                len as u32,
                (len >> 32) as u32,
                &mut overlapped,
            )
        };
        if res != 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}
