//! Durable per-application state.
//!
//! Each application owns one directory (keyed by `container_name`) holding:
//!
//! ```text
//! <config_dir>/apps/<container_name>/
//! ├── config.yml         # desired-state document as last provided
//! ├── last_applied.json  # PersistedAppState: digests + registry digest
//! ├── status             # INSTALLED | NOT_INSTALLED
//! ├── .needs_apply       # presence = unreconciled config drift
//! └── Containerfile      # materialized build input (for inspection)
//! ```
//!
//! `last_applied.json` is only rewritten after a reconciliation completes in
//! full, so a partial failure never corrupts the last-known-good record.
//! Reads fall back to safe defaults: a missing state file is a first install,
//! and a corrupt one is logged and treated as empty (everything changed).

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::consts::{CONFIG_FILENAME, CONTAINERFILE_NAME, FLAG_FILENAME, STATE_FILENAME, STATUS_FILENAME};
use crate::digest::SectionDigestSet;
use crate::paths;

#[derive(Debug, Error)]
pub enum StateError {
  #[error("failed to create state directory {path}: {source}")]
  CreateDir {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to write {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to remove {path}: {source}")]
  Remove {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// Whether the application is currently materialized (container + image).
///
/// Tracked separately from the digest record: an application can be
/// `NotInstalled` while still carrying a `registry_digest` from a previous
/// installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallationStatus {
  NotInstalled,
  Installed,
}

impl InstallationStatus {
  fn as_str(&self) -> &'static str {
    match self {
      Self::NotInstalled => "NOT_INSTALLED",
      Self::Installed => "INSTALLED",
    }
  }

  fn parse(s: &str) -> Option<Self> {
    match s.trim() {
      "INSTALLED" => Some(Self::Installed),
      "NOT_INSTALLED" => Some(Self::NotInstalled),
      _ => None,
    }
  }
}

/// The last-applied record.
///
/// `registry_digest` identifies the most recently backed-up image and is
/// carried forward unchanged by any reconciliation that does not rebuild.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedAppState {
  #[serde(default)]
  pub digests: SectionDigestSet,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub registry_digest: Option<String>,
}

/// Handle to one application's state directory.
#[derive(Debug, Clone)]
pub struct AppStateDir {
  dir: PathBuf,
}

impl AppStateDir {
  pub fn new(dir: PathBuf) -> Self {
    Self { dir }
  }

  /// State directory for `container_name` at the default location.
  pub fn for_app(container_name: &str) -> Self {
    Self::new(paths::app_state_dir(container_name))
  }

  pub fn dir(&self) -> &PathBuf {
    &self.dir
  }

  pub fn exists(&self) -> bool {
    self.dir.is_dir()
  }

  pub fn config_path(&self) -> PathBuf {
    self.dir.join(CONFIG_FILENAME)
  }

  pub fn containerfile_path(&self) -> PathBuf {
    self.dir.join(CONTAINERFILE_NAME)
  }

  fn state_path(&self) -> PathBuf {
    self.dir.join(STATE_FILENAME)
  }

  fn status_path(&self) -> PathBuf {
    self.dir.join(STATUS_FILENAME)
  }

  fn flag_path(&self) -> PathBuf {
    self.dir.join(FLAG_FILENAME)
  }

  /// Create the directory if needed.
  pub fn ensure(&self) -> Result<(), StateError> {
    fs::create_dir_all(&self.dir).map_err(|source| StateError::CreateDir {
      path: self.dir.clone(),
      source,
    })
  }

  /// Load the last-applied record.
  ///
  /// A missing file means first install and returns the default (empty)
  /// record. A corrupt or unreadable file is logged as a warning and also
  /// returns the default: the safe assumption is that everything changed.
  pub fn load_state(&self) -> PersistedAppState {
    let path = self.state_path();

    let content = match fs::read_to_string(&path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        debug!(path = %path.display(), "no last-applied state, treating as first install");
        return PersistedAppState::default();
      }
      Err(e) => {
        warn!(path = %path.display(), error = %e, "could not read state file, assuming everything changed");
        return PersistedAppState::default();
      }
    };

    match serde_json::from_str(&content) {
      Ok(state) => state,
      Err(e) => {
        warn!(path = %path.display(), error = %e, "corrupt state file, assuming everything changed");
        PersistedAppState::default()
      }
    }
  }

  /// Write the last-applied record (write to temp, then rename).
  pub fn save_state(&self, state: &PersistedAppState) -> Result<(), StateError> {
    self.ensure()?;

    let path = self.state_path();
    let temp_path = self.dir.join(format!("{STATE_FILENAME}.tmp"));
    let content = serde_json::to_string_pretty(state).expect("PersistedAppState serializes");

    fs::write(&temp_path, &content).map_err(|source| StateError::Write {
      path: path.clone(),
      source,
    })?;
    fs::rename(&temp_path, &path).map_err(|source| StateError::Write { path, source })?;

    Ok(())
  }

  /// Clear the section digests but keep the registry digest.
  ///
  /// Used by remove-without-purge: the next install computes a full plan,
  /// while the backed-up image stays addressable.
  pub fn clear_digests(&self) -> Result<(), StateError> {
    let mut state = self.load_state();
    state.digests = SectionDigestSet(BTreeMap::new());
    self.save_state(&state)
  }

  pub fn load_status(&self) -> InstallationStatus {
    match fs::read_to_string(self.status_path()) {
      Ok(content) => InstallationStatus::parse(&content).unwrap_or_else(|| {
        warn!(path = %self.status_path().display(), "unrecognized status marker, treating as not installed");
        InstallationStatus::NotInstalled
      }),
      Err(_) => InstallationStatus::NotInstalled,
    }
  }

  pub fn set_status(&self, status: InstallationStatus) -> Result<(), StateError> {
    self.ensure()?;
    let path = self.status_path();
    fs::write(&path, format!("{}\n", status.as_str())).map_err(|source| StateError::Write { path, source })
  }

  /// True when the live config has drifted from the last-applied state.
  pub fn needs_apply(&self) -> bool {
    self.flag_path().is_file()
  }

  /// Create the needs-apply flag (content does not matter, only presence).
  pub fn mark_needs_apply(&self) -> Result<(), StateError> {
    self.ensure()?;
    let path = self.flag_path();
    fs::write(&path, b"").map_err(|source| StateError::Write { path, source })
  }

  /// Remove the needs-apply flag if present.
  pub fn clear_needs_apply(&self) -> Result<(), StateError> {
    let path = self.flag_path();
    match fs::remove_file(&path) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
      Err(source) => Err(StateError::Remove { path, source }),
    }
  }

  /// Delete the whole state directory (purge).
  pub fn delete_all(&self) -> Result<(), StateError> {
    match fs::remove_dir_all(&self.dir) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
      Err(source) => Err(StateError::Remove {
        path: self.dir.clone(),
        source,
      }),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn temp_state() -> (TempDir, AppStateDir) {
    let temp = TempDir::new().unwrap();
    let state = AppStateDir::new(temp.path().join("box-editor"));
    (temp, state)
  }

  fn digests(pairs: &[(&str, &str)]) -> SectionDigestSet {
    SectionDigestSet(
      pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect(),
    )
  }

  #[test]
  fn load_state_missing_file_is_empty() {
    let (_temp, state) = temp_state();
    let loaded = state.load_state();
    assert!(loaded.digests.is_empty());
    assert!(loaded.registry_digest.is_none());
  }

  #[test]
  fn save_and_load_roundtrip() {
    let (_temp, state) = temp_state();
    let record = PersistedAppState {
      digests: digests(&[("image", "abc"), ("storage", "def")]),
      registry_digest: Some("sha256:123".to_string()),
    };

    state.save_state(&record).unwrap();
    assert_eq!(state.load_state(), record);
  }

  #[test]
  fn load_state_corrupt_file_falls_back_to_empty() {
    let (_temp, state) = temp_state();
    state.ensure().unwrap();
    fs::write(state.dir().join(STATE_FILENAME), "not json {{{").unwrap();

    let loaded = state.load_state();
    assert!(loaded.digests.is_empty());
  }

  #[test]
  fn clear_digests_keeps_registry_digest() {
    let (_temp, state) = temp_state();
    state
      .save_state(&PersistedAppState {
        digests: digests(&[("image", "abc")]),
        registry_digest: Some("sha256:123".to_string()),
      })
      .unwrap();

    state.clear_digests().unwrap();

    let loaded = state.load_state();
    assert!(loaded.digests.is_empty());
    assert_eq!(loaded.registry_digest.as_deref(), Some("sha256:123"));
  }

  #[test]
  fn status_defaults_to_not_installed() {
    let (_temp, state) = temp_state();
    assert_eq!(state.load_status(), InstallationStatus::NotInstalled);
  }

  #[test]
  fn status_roundtrip() {
    let (_temp, state) = temp_state();
    state.set_status(InstallationStatus::Installed).unwrap();
    assert_eq!(state.load_status(), InstallationStatus::Installed);

    state.set_status(InstallationStatus::NotInstalled).unwrap();
    assert_eq!(state.load_status(), InstallationStatus::NotInstalled);
  }

  #[test]
  fn unrecognized_status_is_not_installed() {
    let (_temp, state) = temp_state();
    state.ensure().unwrap();
    fs::write(state.dir().join(STATUS_FILENAME), "HALFWAY\n").unwrap();
    assert_eq!(state.load_status(), InstallationStatus::NotInstalled);
  }

  #[test]
  fn needs_apply_flag_lifecycle() {
    let (_temp, state) = temp_state();
    assert!(!state.needs_apply());

    state.mark_needs_apply().unwrap();
    assert!(state.needs_apply());

    // Marking twice is fine
    state.mark_needs_apply().unwrap();
    assert!(state.needs_apply());

    state.clear_needs_apply().unwrap();
    assert!(!state.needs_apply());

    // Clearing an absent flag is fine
    state.clear_needs_apply().unwrap();
  }

  #[test]
  fn delete_all_removes_directory() {
    let (_temp, state) = temp_state();
    state.mark_needs_apply().unwrap();
    assert!(state.exists());

    state.delete_all().unwrap();
    assert!(!state.exists());

    // Deleting again is fine
    state.delete_all().unwrap();
  }
}
