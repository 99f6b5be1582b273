//! Exclusive lock on a snapshot directory.
//!
//! Only one process may write a snapshot directory at a time. The lock is a
//! non-blocking exclusive lock on `dir/.lock`, released when the [`FileLock`]
//! is dropped (closing the file releases it).

use std::fs::{File, OpenOptions};
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::path::{Path, PathBuf};

use crate::error::PersistenceError;

/// Name of the lock file inside a snapshot directory.
pub const LOCK_FILE_NAME: &str = ".lock";

/// Exclusive lock held for the lifetime of this value.
#[derive(Debug)]
pub struct FileLock {
    _file: File,
    path: PathBuf,
}

impl FileLock {
    /// Attempt to acquire the lock on `dir`.
    ///
    /// # Errors
    /// - `Locked` if another process holds the lock
    /// - `Io` if the lock file cannot be created
    pub fn acquire(dir: &Path) -> Result<Self, PersistenceError> {
        let lock_path = dir.join(LOCK_FILE_NAME);

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| PersistenceError::io(&lock_path, e))?;

        match Self::try_lock(&file) {
            Ok(()) => Ok(Self {
                _file: file,
                path: lock_path,
            }),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Err(PersistenceError::Locked {
                path: dir.to_path_buf(),
            }),
            Err(e) => Err(PersistenceError::io(&lock_path, e)),
        }
    }

    /// Returns the path to the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(unix)]
    #[allow(unsafe_code)]
    fn try_lock(file: &File) -> IoResult<()> {
        use std::os::unix::io::AsRawFd;

        let fd = file.as_raw_fd();
        // SAFETY: `fd` is a valid open descriptor owned by `file`.
        let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };

        if result != 0 {
            let errno = IoError::last_os_error();
            if errno.raw_os_error() == Some(libc::EWOULDBLOCK) {
                return Err(IoError::new(
                    ErrorKind::WouldBlock,
                    "snapshot directory is locked by another process",
                ));
            }
            return Err(errno);
        }
        Ok(())
    }

    #[cfg(windows)]
    #[allow(unsafe_code)]
    fn try_lock(file: &File) -> IoResult<()> {
        use std::os::windows::io::AsRawHandle;
        use windows_sys::Win32::Foundation::HANDLE;
        use windows_sys::Win32::Storage::FileSystem::{
            LockFileEx, LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY,
        };

        let handle = file.as_raw_handle() as HANDLE;
        // SAFETY: `handle` is owned by `file`; OVERLAPPED is plain data.
        let result = unsafe {
            let mut overlapped = std::mem::zeroed::<windows_sys::Win32::System::IO::OVERLAPPED>();
            LockFileEx(
                handle,
                LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY,
                0,
                1,
                0,
                &mut overlapped,
            )
        };

        if result == 0 {
            let err = IoError::last_os_error();
            return Err(IoError::new(
                ErrorKind::WouldBlock,
                format!("snapshot directory is locked by another process: {err}"),
            ));
        }
        Ok(())
    }

    #[cfg(not(any(unix, windows)))]
    fn try_lock(_file: &File) -> IoResult<()> {
        Err(IoError::new(
            ErrorKind::Unsupported,
            "file locking not supported on this platform",
        ))
    }
}
