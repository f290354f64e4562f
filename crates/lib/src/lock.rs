//! File-based per-application locking for mutual exclusion.
//!
//! The original design left concurrent reconciliations of the same
//! application unguarded; here every mutating operation takes an exclusive
//! `flock` on a `.lock` file inside the application's state directory. The
//! lock file carries JSON metadata about the holder so a contention error can
//! name the competing command.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::LOCK_FILENAME;

#[derive(Debug, Serialize, Deserialize)]
pub struct LockMetadata {
  pub version: u32,
  pub pid: u32,
  pub started_at_unix: u64,
  pub command: String,
  pub app: String,
}

#[derive(Debug, Error)]
pub enum AppLockError {
  #[error(
    "application '{app}' is locked by another process: {command} (PID {pid})\n\
     If you're sure no appbox process is running, remove the lock file:\n  {lock_path}"
  )]
  Contention {
    app: String,
    command: String,
    pid: u32,
    lock_path: PathBuf,
  },

  #[error(
    "application '{app}' is locked (could not read lock metadata)\n\
     If you're sure no appbox process is running, remove the lock file:\n  {lock_path}"
  )]
  ContentionUnknown { app: String, lock_path: PathBuf },

  #[error("failed to create state directory: {0}")]
  CreateDir(#[source] io::Error),

  #[error("failed to open lock file: {0}")]
  OpenFile(#[source] io::Error),

  #[error("failed to write lock metadata: {0}")]
  WriteMetadata(#[source] io::Error),

  #[error("failed to acquire lock: {0}")]
  LockFailed(#[source] io::Error),
}

/// An exclusive lock on one application's state directory.
///
/// Released on drop.
pub struct AppLock {
  _file: File,
  lock_path: PathBuf,
}

impl AppLock {
  /// Acquire the lock for `app` inside `state_dir`, recording `command` as
  /// the holder. Fails immediately (no blocking) on contention.
  pub fn acquire(state_dir: &Path, app: &str, command: &str) -> Result<Self, AppLockError> {
    let lock_path = state_dir.join(LOCK_FILENAME);

    if !state_dir.exists() {
      std::fs::create_dir_all(state_dir).map_err(AppLockError::CreateDir)?;
    }

    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(&lock_path)
      .map_err(AppLockError::OpenFile)?;

    if let Err(err) = try_lock(&file) {
      if err.kind() == io::ErrorKind::WouldBlock {
        return Err(Self::read_contention_error(app, &lock_path));
      }
      return Err(AppLockError::LockFailed(err));
    }

    Self::write_metadata(&file, app, command)?;

    Ok(AppLock { _file: file, lock_path })
  }

  /// Reads the lock metadata from the held file handle.
  pub fn read_metadata(&self) -> io::Result<LockMetadata> {
    use std::io::{Seek, SeekFrom};

    let mut file = &self._file;
    file.seek(SeekFrom::Start(0))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    serde_json::from_str(&contents).map_err(io::Error::other)
  }

  pub fn lock_path(&self) -> &Path {
    &self.lock_path
  }

  fn write_metadata(file: &File, app: &str, command: &str) -> Result<(), AppLockError> {
    let metadata = LockMetadata {
      version: 1,
      pid: std::process::id(),
      started_at_unix: SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs(),
      command: command.to_string(),
      app: app.to_string(),
    };

    file.set_len(0).map_err(AppLockError::WriteMetadata)?;
    let mut writer = io::BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, &metadata)
      .map_err(|e| AppLockError::WriteMetadata(io::Error::other(e)))?;
    writer.flush().map_err(AppLockError::WriteMetadata)?;

    Ok(())
  }

  fn read_contention_error(app: &str, lock_path: &Path) -> AppLockError {
    if let Ok(mut file) = File::open(lock_path) {
      let mut contents = String::new();
      if file.read_to_string(&mut contents).is_ok()
        && let Ok(metadata) = serde_json::from_str::<LockMetadata>(&contents)
      {
        return AppLockError::Contention {
          app: app.to_string(),
          command: metadata.command,
          pid: metadata.pid,
          lock_path: lock_path.to_path_buf(),
        };
      }
    }

    AppLockError::ContentionUnknown {
      app: app.to_string(),
      lock_path: lock_path.to_path_buf(),
    }
  }
}

#[cfg(unix)]
fn try_lock(file: &File) -> io::Result<()> {
  use rustix::fs::{FlockOperation, flock};
  use std::os::unix::io::AsFd;

  flock(file.as_fd(), FlockOperation::NonBlockingLockExclusive)
    .map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
}

#[cfg(not(unix))]
fn try_lock(_file: &File) -> io::Result<()> {
  // Advisory locking is only implemented for the Unix targets podman runs on.
  Ok(())
}
