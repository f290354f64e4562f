//! Shared constants for on-disk layout and naming.

/// Application name, used for config/data directory paths.
pub const APP_NAME: &str = "appbox";

/// Desired-state document inside an application's state directory.
pub const CONFIG_FILENAME: &str = "config.yml";

/// Last-applied digest record inside an application's state directory.
pub const STATE_FILENAME: &str = "last_applied.json";

/// Installation status marker file.
pub const STATUS_FILENAME: &str = "status";

/// Needs-apply flag file. Presence means the live config has diverged
/// from the last-applied state.
pub const FLAG_FILENAME: &str = ".needs_apply";

/// Per-application lock file.
pub const LOCK_FILENAME: &str = ".lock";

/// Materialized build input, kept in the state directory for inspection.
pub const CONTAINERFILE_NAME: &str = "Containerfile";

/// Label stamped on every image and container this tool builds. `prune`
/// keeps anything carrying it.
pub const MANAGED_LABEL: &str = "appbox.managed=true";

/// Local image reference for an application's container name.
pub fn image_ref(container_name: &str) -> String {
  format!("localhost/{container_name}:latest")
}
