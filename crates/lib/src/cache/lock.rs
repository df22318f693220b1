//! Exclusive lock guarding a cache store.
//!
//! One pipeline per store: the lock is an advisory, non-blocking, exclusive
//! lock on `<store>.lock`, released when the [`CacheLock`] is dropped. The
//! holder records its PID and command in the lock file so a blocked run can
//! report who it is waiting on.

use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// The run currently holding a cache lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
  pub pid: u32,
  pub command: String,
  pub acquired_at_unix: u64,
}

impl LockHolder {
  fn current(command: &str) -> Self {
    Self {
      pid: std::process::id(),
      command: command.to_string(),
      acquired_at_unix: unix_now(),
    }
  }

  /// Time since the lock was taken, zero if the clock went backwards.
  pub fn held_for(&self) -> Duration {
    Duration::from_secs(unix_now().saturating_sub(self.acquired_at_unix))
  }
}

impl std::fmt::Display for LockHolder {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(
      f,
      "`{}` (PID {}, running for {})",
      self.command,
      self.pid,
      humantime::format_duration(self.held_for())
    )
  }
}

#[derive(Debug, Error)]
pub enum CacheLockError {
  #[error(
    "cache store {store} is in use by {}\nIf no fnpack run is active, remove {lock_path}",
    holder_label(.holder)
  )]
  Held {
    store: PathBuf,
    lock_path: PathBuf,
    holder: Option<LockHolder>,
  },

  #[error("failed to {action} cache lock {path}: {source}")]
  Io {
    action: &'static str,
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

fn holder_label(holder: &Option<LockHolder>) -> String {
  holder
    .as_ref()
    .map_or_else(|| "another process".to_string(), LockHolder::to_string)
}

/// Held for as long as the value lives.
#[derive(Debug)]
pub struct CacheLock {
  _file: File,
}

impl CacheLock {
  /// Lock file path for a cache store.
  pub fn path_for(store: &Path) -> PathBuf {
    let mut name = store.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".lock");
    store.with_file_name(name)
  }

  pub fn acquire(store: &Path, command: &str) -> Result<Self, CacheLockError> {
    let lock_path = Self::path_for(store);

    if let Some(dir) = lock_path.parent()
      && !dir.as_os_str().is_empty()
    {
      std::fs::create_dir_all(dir).map_err(io_error("create directory for", &lock_path))?;
    }

    let mut file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(&lock_path)
      .map_err(io_error("open", &lock_path))?;

    match try_lock(&file) {
      Ok(()) => {}
      Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
        let holder = read_holder(&lock_path);
        return Err(CacheLockError::Held {
          store: store.to_path_buf(),
          lock_path,
          holder,
        });
      }
      Err(e) => return Err(io_error("acquire", &lock_path)(e)),
    }

    let holder = LockHolder::current(command);
    write_holder(&mut file, &holder).map_err(io_error("write", &lock_path))?;
    debug!(lock = %lock_path.display(), pid = holder.pid, "cache lock acquired");

    Ok(Self { _file: file })
  }
}

fn io_error<'a>(action: &'static str, path: &'a Path) -> impl FnOnce(io::Error) -> CacheLockError + 'a {
  move |source| CacheLockError::Io {
    action,
    path: path.to_path_buf(),
    source,
  }
}

fn write_holder(file: &mut File, holder: &LockHolder) -> io::Result<()> {
  file.set_len(0)?;
  file.seek(SeekFrom::Start(0))?;
  serde_json::to_writer(&mut *file, holder).map_err(io::Error::other)?;
  file.flush()
}

/// Best effort; a lock file that cannot be read (e.g. locked on Windows)
/// yields no holder.
fn read_holder(lock_path: &Path) -> Option<LockHolder> {
  let contents = std::fs::read_to_string(lock_path).ok()?;
  serde_json::from_str(&contents).ok()
}

fn unix_now() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_secs())
    .unwrap_or_default()
}

#[cfg(unix)]
fn try_lock(file: &File) -> io::Result<()> {
  use rustix::fs::{FlockOperation, flock};
  use std::os::unix::io::AsFd;

  flock(file.as_fd(), FlockOperation::NonBlockingLockExclusive)
    .map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
}

#[cfg(windows)]
fn try_lock(file: &File) -> io::Result<()> {
  use std::os::windows::io::AsRawHandle;
  use windows_sys::Win32::Foundation::{ERROR_LOCK_VIOLATION, HANDLE};
  use windows_sys::Win32::Storage::FileSystem::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, LockFileEx};

  let handle = file.as_raw_handle() as HANDLE;

  // SAFETY: OVERLAPPED is a plain data struct that is valid when zero-initialized.
  // LockFileEx is safe to call with a valid file handle and zeroed OVERLAPPED.
  let result = unsafe {
    let mut overlapped = std::mem::zeroed();
    LockFileEx(
      handle,
      LOCKFILE_FAIL_IMMEDIATELY | LOCKFILE_EXCLUSIVE_LOCK,
      0,
      1,
      0,
      &mut overlapped,
    )
  };

  if result != 0 {
    return Ok(());
  }
  let err = io::Error::last_os_error();
  if err.raw_os_error() == Some(ERROR_LOCK_VIOLATION as i32) {
    return Err(io::ErrorKind::WouldBlock.into());
  }
  Err(err)
}
