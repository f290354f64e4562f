//! XDG-style path resolution for appbox state directories.

use std::path::PathBuf;

use crate::consts::APP_NAME;

/// Returns the user's home directory.
pub fn home_dir() -> PathBuf {
  let home = std::env::var("HOME").expect("HOME not set");
  PathBuf::from(home)
}

/// Returns the directory for configuration files for the application.
pub fn config_dir() -> PathBuf {
  let config_home = std::env::var("XDG_CONFIG_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".config"));
  config_home.join(APP_NAME)
}

/// Returns the directory for data files for the application.
pub fn data_dir() -> PathBuf {
  let data_home = std::env::var("XDG_DATA_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".local").join("share"));
  data_home.join(APP_NAME)
}

/// Directory holding one state directory per managed application.
pub fn apps_dir() -> PathBuf {
  config_dir().join("apps")
}

/// State directory for a single application, keyed by container name.
pub fn app_state_dir(container_name: &str) -> PathBuf {
  apps_dir().join(container_name)
}

/// Isolated home directory for a single application.
pub fn app_home_dir(container_name: &str) -> PathBuf {
  data_dir().join("homes").join(container_name)
}

/// Host directory where exported `.desktop` files are written.
pub fn desktop_files_dir() -> PathBuf {
  std::env::var("XDG_DATA_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".local").join("share"))
    .join("applications")
}

/// Host directory for exported icons.
pub fn icons_dir() -> PathBuf {
  std::env::var("XDG_DATA_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".local").join("share"))
    .join("icons")
}

/// Host directory for exported pixmap-style icons.
pub fn pixmaps_dir() -> PathBuf {
  std::env::var("XDG_DATA_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".local").join("share"))
    .join("pixmaps")
}

/// Host directory for generated alias scripts.
pub fn local_bin_dir() -> PathBuf {
  home_dir().join(".local").join("bin")
}
