//! Container-creation flag generation.
//!
//! Translates the `permissions`, `integration`, and `storage` sections into
//! `podman create` flags. Host probing (which sockets and devices actually
//! exist) is captured in [`HostEnv`] so flag generation itself is a pure
//! function of config + environment snapshot.

use std::path::PathBuf;

use tracing::{debug, warn};

use crate::config::{AppConfig, get_bool, get_str_list};
use crate::paths;

/// Environment variables forwarded into the container when desktop
/// integration is enabled.
const SESSION_ENV_VARS: [&str; 6] = [
  "DISPLAY",
  "WAYLAND_DISPLAY",
  "XDG_RUNTIME_DIR",
  "DBUS_SESSION_BUS_ADDRESS",
  "PULSE_SERVER",
  "XDG_SESSION_TYPE",
];

/// Snapshot of the host facilities flag generation depends on.
#[derive(Debug, Clone, Default)]
pub struct HostEnv {
  pub host_home: PathBuf,
  pub app_home: PathBuf,
  pub xdg_runtime_dir: Option<String>,
  /// Session env vars (from [`SESSION_ENV_VARS`]) that are actually set.
  pub session_env: Vec<String>,
  pub system_dbus_socket: Option<PathBuf>,
  pub cups_socket: Option<PathBuf>,
  pub has_dri: bool,
  pub video_devices: Vec<PathBuf>,
}

impl HostEnv {
  /// Probe the host for an application's flag generation.
  pub fn detect(container_name: &str) -> Self {
    let system_dbus_socket = ["/var/run/dbus/system_bus_socket", "/run/dbus/system_bus_socket"]
      .iter()
      .map(PathBuf::from)
      .find(|p| p.exists());

    let video_devices = std::fs::read_dir("/dev")
      .map(|entries| {
        let mut devices: Vec<PathBuf> = entries
          .filter_map(Result::ok)
          .map(|e| e.path())
          .filter(|p| {
            p.file_name()
              .and_then(|n| n.to_str())
              .is_some_and(|n| n.starts_with("video"))
          })
          .collect();
        devices.sort();
        devices
      })
      .unwrap_or_default();

    Self {
      host_home: paths::home_dir(),
      app_home: paths::app_home_dir(container_name),
      xdg_runtime_dir: std::env::var("XDG_RUNTIME_DIR").ok(),
      session_env: SESSION_ENV_VARS
        .iter()
        .filter(|var| std::env::var(var).is_ok())
        .map(|var| var.to_string())
        .collect(),
      system_dbus_socket,
      cups_socket: Some(PathBuf::from("/run/cups/cups.sock")).filter(|p| p.exists()),
      has_dri: PathBuf::from("/dev/dri").exists(),
      video_devices,
    }
  }
}

/// Generate the `podman create` flags for an application.
pub fn create_flags(config: &AppConfig, host: &HostEnv) -> Vec<String> {
  let mut flags: Vec<String> = Vec::new();
  let permissions = &config.permissions;
  let integration = &config.integration;

  // Labels identify managed containers for `list` and pruning
  flags.push("--label".into());
  flags.push("appbox.managed=true".into());
  flags.push("--label".into());
  flags.push(format!("appbox.app.name={}", config.app_name));
  flags.push("--label".into());
  flags.push(format!("appbox.container.name={}", config.container_name));

  // Keep the host UID inside the container; required for session sockets
  // and the isolated home volume
  flags.push("--userns=keep-id".into());

  if !get_bool(permissions, "network", true) {
    flags.push("--network=none".into());
    debug!("network disabled");
  }

  if get_bool(permissions, "system_dbus", true) {
    if let Some(socket) = &host.system_dbus_socket {
      flags.push("-v".into());
      flags.push(format!("{0}:{0}:ro", socket.display()));
    } else {
      warn!("system D-Bus requested but no socket found on host");
    }
  }

  if get_bool(permissions, "printers", false) {
    if let Some(socket) = &host.cups_socket {
      flags.push("-v".into());
      flags.push(format!("{0}:{0}:rw", socket.display()));
    } else {
      warn!("printer access requested but CUPS socket not found");
    }
  }

  if get_bool(permissions, "webcam", false) {
    if host.video_devices.is_empty() {
      warn!("webcam access requested but no video devices found");
    }
    for device in &host.video_devices {
      flags.push("--device".into());
      flags.push(device.display().to_string());
    }
  }

  for device in get_str_list(permissions, "devices") {
    flags.push("--device".into());
    flags.push(device);
  }

  if get_bool(integration, "desktop_integration", true) {
    match &host.xdg_runtime_dir {
      Some(dir) => {
        // The runtime dir carries the Wayland, session D-Bus, and
        // Pipewire sockets
        flags.push("-v".into());
        flags.push(format!("{dir}:{dir}:rw"));
      }
      None => warn!("XDG_RUNTIME_DIR not set, GUI applications may not work"),
    }

    for var in &host.session_env {
      flags.push("-e".into());
      flags.push(var.clone());
    }

    if get_bool(permissions, "gpu", true) && host.has_dri {
      flags.push("--device=/dev/dri".into());
    }
  }

  // Isolated home, always mounted over the container user's home
  flags.push("-v".into());
  flags.push(format!("{}:{}:Z", host.app_home.display(), host.host_home.display()));

  for volume in get_str_list(&config.storage, "volumes") {
    match volume.split_once(':') {
      Some((host_path, container_path)) => {
        let expanded = expand_home(host_path, &host.host_home);
        flags.push("-v".into());
        flags.push(format!("{expanded}:{container_path}:Z"));
      }
      None => warn!(volume, "invalid volume format, expected 'host:container', skipping"),
    }
  }

  flags
}

fn expand_home(path: &str, home: &std::path::Path) -> String {
  if let Some(rest) = path.strip_prefix("~/") {
    return format!("{}/{}", home.display(), rest);
  }
  if path == "~" {
    return home.display().to_string();
  }
  path.to_string()
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn test_host() -> HostEnv {
    HostEnv {
      host_home: PathBuf::from("/home/tester"),
      app_home: PathBuf::from("/home/tester/.local/share/appbox/homes/box-editor"),
      xdg_runtime_dir: Some("/run/user/1000".to_string()),
      session_env: vec!["DISPLAY".to_string(), "XDG_RUNTIME_DIR".to_string()],
      system_dbus_socket: Some(PathBuf::from("/run/dbus/system_bus_socket")),
      cups_socket: None,
      has_dri: true,
      video_devices: vec![],
    }
  }

  fn config(doc: serde_json::Value) -> AppConfig {
    let mut full = json!({
      "app_name": "Editor",
      "container_name": "box-editor",
      "image": { "base": "debian:bookworm" },
    });
    full.as_object_mut().unwrap().extend(doc.as_object().unwrap().clone());
    AppConfig::from_value(full).unwrap()
  }

  fn has_flag(flags: &[String], flag: &str) -> bool {
    flags.iter().any(|f| f == flag)
  }

  fn has_pair(flags: &[String], key: &str, value: &str) -> bool {
    flags.windows(2).any(|w| w[0] == key && w[1] == value)
  }

  #[test]
  fn defaults_include_labels_userns_and_home() {
    let flags = create_flags(&config(json!({})), &test_host());

    assert!(has_pair(&flags, "--label", "appbox.managed=true"));
    assert!(has_flag(&flags, "--userns=keep-id"));
    assert!(has_pair(
      &flags,
      "-v",
      "/home/tester/.local/share/appbox/homes/box-editor:/home/tester:Z"
    ));
    assert!(!has_flag(&flags, "--network=none"));
  }

  #[test]
  fn network_deny_adds_none() {
    let flags = create_flags(&config(json!({ "permissions": { "network": false } })), &test_host());
    assert!(has_flag(&flags, "--network=none"));
  }

  #[test]
  fn desktop_integration_mounts_runtime_dir_and_env() {
    let flags = create_flags(&config(json!({})), &test_host());
    assert!(has_pair(&flags, "-v", "/run/user/1000:/run/user/1000:rw"));
    assert!(has_pair(&flags, "-e", "DISPLAY"));
    assert!(has_flag(&flags, "--device=/dev/dri"));
  }

  #[test]
  fn disabled_integration_skips_session_flags_and_gpu() {
    let flags = create_flags(
      &config(json!({ "integration": { "desktop_integration": false } })),
      &test_host(),
    );
    assert!(!has_pair(&flags, "-v", "/run/user/1000:/run/user/1000:rw"));
    assert!(!has_pair(&flags, "-e", "DISPLAY"));
    assert!(!has_flag(&flags, "--device=/dev/dri"));
  }

  #[test]
  fn gpu_denied_even_with_dri_present() {
    let flags = create_flags(&config(json!({ "permissions": { "gpu": false } })), &test_host());
    assert!(!has_flag(&flags, "--device=/dev/dri"));
  }

  #[test]
  fn system_dbus_socket_mounted_read_only() {
    let flags = create_flags(&config(json!({})), &test_host());
    assert!(has_pair(&flags, "-v", "/run/dbus/system_bus_socket:/run/dbus/system_bus_socket:ro"));
  }

  #[test]
  fn explicit_devices_are_passed_through() {
    let flags = create_flags(
      &config(json!({ "permissions": { "devices": ["/dev/ttyUSB0"] } })),
      &test_host(),
    );
    assert!(has_pair(&flags, "--device", "/dev/ttyUSB0"));
  }

  #[test]
  fn extra_volumes_expand_tilde() {
    let flags = create_flags(
      &config(json!({ "storage": { "volumes": ["~/Music:/music", "/data:/data"] } })),
      &test_host(),
    );
    assert!(has_pair(&flags, "-v", "/home/tester/Music:/music:Z"));
    assert!(has_pair(&flags, "-v", "/data:/data:Z"));
  }

  #[test]
  fn malformed_volume_is_skipped() {
    let flags = create_flags(&config(json!({ "storage": { "volumes": ["nocolon"] } })), &test_host());
    assert!(!flags.iter().any(|f| f.contains("nocolon")));
  }
}
