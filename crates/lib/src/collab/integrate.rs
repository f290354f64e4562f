//! [`DesktopIntegrator`] implementation working against the host session.
//!
//! Exports `.desktop` files and icons found inside the container to the
//! host's XDG data directories and writes alias scripts into `~/.local/bin`.
//! Exported artifacts are namespaced with a `<container_name>_` prefix so
//! removal can find them again without any extra bookkeeping.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::process::Command;

use serde_json::Value;
use tracing::{debug, info, warn};

use super::podman::Podman;
use super::{CollaboratorError, DesktopIntegrator};
use crate::config::{AppConfig, get_bool, get_str_list};
use crate::paths;

/// Container directories searched for `.desktop` files.
const DESKTOP_DIRS: [&str; 2] = ["/usr/share/applications/", "/usr/local/share/applications/"];

/// Container directories searched for icons.
const ICON_DIRS: [&str; 2] = ["/usr/share/icons/", "/usr/share/pixmaps/"];

/// A `.desktop` file rewritten for the host.
#[derive(Debug, PartialEq)]
struct IntegratedEntry {
  content: String,
  /// Original icon names referenced, for export.
  icons: Vec<String>,
  /// Base commands from `Exec` lines, for alias scripts.
  commands: Vec<String>,
}

/// Rewrite a container `.desktop` entry for export to the host.
///
/// Returns `None` for entries that should not be exported: hidden
/// (`NoDisplay=true`), matching a skipped category, or without any `Exec`
/// line. `Exec` base commands are replaced with their alias names, icon
/// names get the container prefix, and the display name is suffixed with
/// the container name.
fn integrate_entry(
  content: &str,
  container_name: &str,
  aliases: &BTreeMap<String, String>,
  skip_categories: &[String],
) -> Option<IntegratedEntry> {
  let mut in_main_section = false;
  let mut saw_main_section = false;
  let mut has_exec = false;

  // First pass: decide whether to export at all
  for line in content.lines() {
    let trimmed = line.trim();
    if trimmed.starts_with('[') {
      in_main_section = trimmed == "[Desktop Entry]";
      saw_main_section |= in_main_section;
      continue;
    }

    if let Some((key, value)) = trimmed.split_once('=') {
      if key == "Exec" && !value.trim().is_empty() {
        has_exec = true;
      }
      if in_main_section && key == "NoDisplay" && value.trim().eq_ignore_ascii_case("true") {
        return None;
      }
      if in_main_section && key == "Categories" {
        let categories: Vec<&str> = value.split(';').map(str::trim).filter(|c| !c.is_empty()).collect();
        if categories.iter().any(|c| skip_categories.iter().any(|s| s == c)) {
          return None;
        }
      }
    }
  }

  if !saw_main_section || !has_exec {
    return None;
  }

  let mut icons = Vec::new();
  let mut commands = Vec::new();
  let mut out = Vec::new();
  in_main_section = false;
  let mut renamed = false;

  for line in content.lines() {
    let trimmed = line.trim();
    if trimmed.starts_with('[') {
      in_main_section = trimmed == "[Desktop Entry]";
      out.push(line.to_string());
      continue;
    }

    let Some((key, value)) = trimmed.split_once('=') else {
      out.push(line.to_string());
      continue;
    };

    match key {
      "Exec" => {
        let mut parts = value.split_whitespace();
        match parts.next() {
          Some(base) => {
            let command_name = Path::new(base)
              .file_name()
              .and_then(|n| n.to_str())
              .unwrap_or(base)
              .to_string();
            let alias = aliases.get(&command_name).cloned().unwrap_or_else(|| command_name.clone());

            let rest: Vec<&str> = parts.collect();
            if rest.is_empty() {
              out.push(format!("Exec={alias}"));
            } else {
              out.push(format!("Exec={alias} {}", rest.join(" ")));
            }
            if !commands.contains(&base.to_string()) {
              commands.push(base.to_string());
            }
          }
          None => out.push(line.to_string()),
        }
      }
      "Icon" => {
        let icon = value.trim().to_string();
        out.push(format!("Icon={container_name}_{icon}"));
        if !icons.contains(&icon) {
          icons.push(icon);
        }
      }
      "Name" if in_main_section && !renamed => {
        out.push(format!("Name={} ({container_name})", value.trim()));
        renamed = true;
      }
      _ => out.push(line.to_string()),
    }
  }

  Some(IntegratedEntry {
    content: out.join("\n") + "\n",
    icons,
    commands,
  })
}

/// The alias name (first `Exec` token) from an exported `.desktop` file.
fn exported_alias(content: &str) -> Option<String> {
  content
    .lines()
    .map(str::trim)
    .find_map(|line| line.strip_prefix("Exec="))
    .and_then(|exec| exec.split_whitespace().next())
    .map(str::to_string)
}

fn alias_map(integration: &Value) -> BTreeMap<String, String> {
  integration
    .get("aliases")
    .and_then(Value::as_object)
    .map(|map| {
      map
        .iter()
        .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
        .collect()
    })
    .unwrap_or_default()
}

/// Delete files under `dir` (recursively) whose name starts with `prefix`.
fn remove_prefixed(dir: &Path, prefix: &str) -> usize {
  let Ok(entries) = fs::read_dir(dir) else {
    return 0;
  };

  let mut removed = 0;
  for entry in entries.filter_map(Result::ok) {
    let path = entry.path();
    if path.is_dir() {
      removed += remove_prefixed(&path, prefix);
      continue;
    }
    let matches = path
      .file_name()
      .and_then(|n| n.to_str())
      .is_some_and(|n| n.starts_with(prefix));
    if matches {
      match fs::remove_file(&path) {
        Ok(()) => removed += 1,
        Err(e) => warn!(path = %path.display(), error = %e, "could not remove exported file"),
      }
    }
  }
  removed
}

/// Run a host command, logging failures instead of propagating them.
fn refresh_cache(program: &str, args: &[&str]) {
  match Command::new(program).args(args).output() {
    Ok(output) if output.status.success() => {}
    Ok(output) => {
      let stderr = String::from_utf8_lossy(&output.stderr);
      debug!(program, stderr = %stderr.trim(), "cache refresh failed");
    }
    Err(e) => debug!(program, error = %e, "cache refresh tool not available"),
  }
}

/// Integrates container applications into the host desktop session.
#[derive(Debug, Default)]
pub struct HostIntegrator {
  podman: Podman,
}

impl HostIntegrator {
  pub fn new() -> Self {
    Self::default()
  }

  fn export_entries(&self, config: &AppConfig) -> Result<(), CollaboratorError> {
    let name = config.container_name.as_str();
    let aliases = alias_map(&config.integration);
    let skip_categories = get_str_list(&config.integration, "skip_categories");

    let mut find_args = vec!["exec", name, "find"];
    find_args.extend(DESKTOP_DIRS);
    find_args.extend(["-type", "f", "-name", "*.desktop"]);

    let found = match self.podman.output(&find_args) {
      Ok(output) => output,
      Err(e) => {
        warn!(app = %name, error = %e, "could not search container for desktop files");
        return Ok(());
      }
    };

    if found.is_empty() {
      warn!(app = %name, "no desktop files found in container");
      return Ok(());
    }

    let desktop_dir = paths::desktop_files_dir();
    fs::create_dir_all(&desktop_dir)?;

    let mut all_icons: Vec<String> = Vec::new();
    let mut all_commands: Vec<String> = Vec::new();
    let mut exported = 0;

    for container_path in found.lines().map(str::trim).filter(|l| !l.is_empty()) {
      let content = match self.podman.output(&["exec", name, "cat", container_path]) {
        Ok(content) => content,
        Err(e) => {
          warn!(path = container_path, error = %e, "could not read desktop file");
          continue;
        }
      };

      let Some(entry) = integrate_entry(&content, name, &aliases, &skip_categories) else {
        debug!(path = container_path, "desktop file skipped");
        continue;
      };

      let filename = Path::new(container_path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("app.desktop");
      let host_path = desktop_dir.join(format!("{name}_{filename}"));
      fs::write(&host_path, &entry.content)?;
      debug!(path = %host_path.display(), "desktop file exported");
      exported += 1;

      for icon in entry.icons {
        if !all_icons.contains(&icon) {
          all_icons.push(icon);
        }
      }
      for command in entry.commands {
        if !all_commands.contains(&command) {
          all_commands.push(command);
        }
      }
    }

    if exported == 0 {
      warn!(app = %name, "no exportable desktop files in container");
      return Ok(());
    }

    let icons_copied = self.export_icons(name, &all_icons);
    self.write_alias_scripts(name, &all_commands, &aliases)?;

    refresh_cache("update-desktop-database", &[&desktop_dir.display().to_string()]);
    if icons_copied > 0 {
      refresh_cache(
        "gtk-update-icon-cache",
        &["-f", "-t", &paths::icons_dir().display().to_string()],
      );
    }

    info!(app = %name, exported, "desktop integration applied");
    Ok(())
  }

  /// Copy icons matching the collected names out of the container. Failures
  /// are logged; an application without icons still works.
  fn export_icons(&self, name: &str, icon_names: &[String]) -> usize {
    let mut copied = 0;

    for icon in icon_names.iter().filter(|i| !i.is_empty()) {
      let pattern = format!("{icon}.*");
      let mut find_args = vec!["exec", name, "find"];
      find_args.extend(ICON_DIRS);
      find_args.extend(["-name", pattern.as_str()]);

      let found = match self.podman.output(&find_args) {
        Ok(output) => output,
        Err(e) => {
          debug!(icon, error = %e, "icon search failed");
          continue;
        }
      };

      for container_path in found.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let source = Path::new(container_path);
        let extension = source
          .extension()
          .and_then(|e| e.to_str())
          .map(|e| format!(".{}", e.to_lowercase()))
          .unwrap_or_default();

        // Themed icons keep their relative theme path; pixmaps go flat
        let dest_dir = match source.strip_prefix("/usr/share/icons") {
          Ok(relative) => match relative.parent() {
            Some(parent) => paths::icons_dir().join(parent),
            None => paths::icons_dir(),
          },
          Err(_) => paths::pixmaps_dir(),
        };

        if let Err(e) = fs::create_dir_all(&dest_dir) {
          warn!(path = %dest_dir.display(), error = %e, "could not create icon directory");
          continue;
        }

        let dest = dest_dir.join(format!("{name}_{icon}{extension}")).display().to_string();
        let cp_source = format!("{name}:{container_path}");
        match self.podman.output(&["cp", cp_source.as_str(), dest.as_str()]) {
          Ok(_) => copied += 1,
          Err(e) => warn!(icon = container_path, error = %e, "could not copy icon"),
        }
      }
    }

    copied
  }

  /// Write a launcher script per base command into `~/.local/bin`.
  fn write_alias_scripts(
    &self,
    name: &str,
    commands: &[String],
    aliases: &BTreeMap<String, String>,
  ) -> Result<(), CollaboratorError> {
    if commands.is_empty() {
      return Ok(());
    }

    let bin_dir = paths::local_bin_dir();
    fs::create_dir_all(&bin_dir)?;

    for base_command in commands {
      let command_name = Path::new(base_command)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(base_command);
      let alias = aliases.get(command_name).map(String::as_str).unwrap_or(command_name);

      let script = format!(
        "#!/bin/sh\n# Generated by appbox for container '{name}'\nexec appbox run {name} -- {base_command} \"$@\"\n"
      );
      let script_path = bin_dir.join(alias);
      fs::write(&script_path, script)?;
      make_executable(&script_path)?;
      debug!(alias, command = base_command, "alias script written");
    }

    Ok(())
  }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> std::io::Result<()> {
  use std::os::unix::fs::PermissionsExt;
  fs::set_permissions(path, fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> std::io::Result<()> {
  Ok(())
}

impl DesktopIntegrator for HostIntegrator {
  fn add_integration(&self, config: &AppConfig) -> Result<(), CollaboratorError> {
    if !get_bool(&config.integration, "desktop_integration", true) {
      debug!(app = %config.container_name, "desktop integration disabled");
      return Ok(());
    }

    let name = config.container_name.as_str();

    // The container must be up so files can be read out of it
    self.podman.output(&["start", name])?;
    let result = self.export_entries(config);
    let stop = self.podman.output(&["stop", "--ignore", "--time=2", name]);

    result?;
    stop?;
    Ok(())
  }

  fn remove_integration(&self, container_name: &str, _config: &AppConfig) -> Result<(), CollaboratorError> {
    let prefix = format!("{container_name}_");
    let desktop_dir = paths::desktop_files_dir();

    // Collect alias names from the exported files before deleting them
    let mut alias_names: Vec<String> = Vec::new();
    if let Ok(entries) = fs::read_dir(&desktop_dir) {
      for entry in entries.filter_map(Result::ok) {
        let path = entry.path();
        let is_ours = path
          .file_name()
          .and_then(|n| n.to_str())
          .is_some_and(|n| n.starts_with(&prefix) && n.ends_with(".desktop"));
        if !is_ours {
          continue;
        }

        if let Ok(content) = fs::read_to_string(&path)
          && let Some(alias) = exported_alias(&content)
          && !alias_names.contains(&alias)
        {
          alias_names.push(alias);
        }
      }
    }

    let desktop_removed = remove_prefixed(&desktop_dir, &prefix);
    let icons_removed = remove_prefixed(&paths::icons_dir(), &prefix) + remove_prefixed(&paths::pixmaps_dir(), &prefix);

    let bin_dir = paths::local_bin_dir();
    for alias in &alias_names {
      let path = bin_dir.join(alias);
      if path.is_file()
        && let Err(e) = fs::remove_file(&path)
      {
        warn!(path = %path.display(), error = %e, "could not remove alias script");
      }
    }

    if desktop_removed > 0 {
      refresh_cache("update-desktop-database", &[&desktop_dir.display().to_string()]);
    }
    if icons_removed > 0 {
      refresh_cache(
        "gtk-update-icon-cache",
        &["-f", "-t", &paths::icons_dir().display().to_string()],
      );
    }

    debug!(
      app = container_name,
      desktop_removed, icons_removed, "desktop integration removed"
    );
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const ENTRY: &str = "\
[Desktop Entry]
Name=Editor
Exec=/usr/bin/editor %F
Icon=editor-icon
Categories=Utility;TextEditor;
Type=Application
";

  fn no_aliases() -> BTreeMap<String, String> {
    BTreeMap::new()
  }

  #[test]
  fn entry_is_rewritten_for_host() {
    let entry = integrate_entry(ENTRY, "box-editor", &no_aliases(), &[]).unwrap();

    assert!(entry.content.contains("Name=Editor (box-editor)"));
    assert!(entry.content.contains("Exec=editor %F"));
    assert!(entry.content.contains("Icon=box-editor_editor-icon"));
    assert_eq!(entry.icons, vec!["editor-icon".to_string()]);
    assert_eq!(entry.commands, vec!["/usr/bin/editor".to_string()]);
  }

  #[test]
  fn alias_map_renames_exec() {
    let aliases: BTreeMap<String, String> = [("editor".to_string(), "ed".to_string())].into_iter().collect();
    let entry = integrate_entry(ENTRY, "box-editor", &aliases, &[]).unwrap();
    assert!(entry.content.contains("Exec=ed %F"));
  }

  #[test]
  fn hidden_entry_is_skipped() {
    let content = format!("{ENTRY}NoDisplay=true\n");
    assert!(integrate_entry(&content, "box-editor", &no_aliases(), &[]).is_none());
  }

  #[test]
  fn skipped_category_is_skipped() {
    let skip = vec!["TextEditor".to_string()];
    assert!(integrate_entry(ENTRY, "box-editor", &no_aliases(), &skip).is_none());
  }

  #[test]
  fn entry_without_exec_is_skipped() {
    let content = "[Desktop Entry]\nName=Broken\nType=Link\n";
    assert!(integrate_entry(content, "box-editor", &no_aliases(), &[]).is_none());
  }

  #[test]
  fn entry_without_main_section_is_skipped() {
    let content = "[Desktop Action new]\nExec=editor --new\n";
    assert!(integrate_entry(content, "box-editor", &no_aliases(), &[]).is_none());
  }

  #[test]
  fn action_sections_keep_their_name() {
    let content = format!("{ENTRY}\n[Desktop Action new-window]\nName=New Window\nExec=/usr/bin/editor --new\n");
    let entry = integrate_entry(&content, "box-editor", &no_aliases(), &[]).unwrap();

    // Only the main Name gets the suffix
    assert!(entry.content.contains("Name=New Window\n"));
    assert!(entry.content.contains("Exec=editor --new"));
  }

  #[test]
  fn exported_alias_reads_first_exec_token() {
    let entry = integrate_entry(ENTRY, "box-editor", &no_aliases(), &[]).unwrap();
    assert_eq!(exported_alias(&entry.content).as_deref(), Some("editor"));
  }

  #[test]
  fn remove_prefixed_walks_subdirectories() {
    let temp = tempfile::TempDir::new().unwrap();
    let nested = temp.path().join("hicolor/48x48/apps");
    fs::create_dir_all(&nested).unwrap();
    fs::write(nested.join("box-editor_icon.png"), b"png").unwrap();
    fs::write(nested.join("other_icon.png"), b"png").unwrap();
    fs::write(temp.path().join("box-editor_top.png"), b"png").unwrap();

    let removed = remove_prefixed(temp.path(), "box-editor_");
    assert_eq!(removed, 2);
    assert!(nested.join("other_icon.png").exists());
  }

  #[test]
  fn alias_map_ignores_non_string_values() {
    let integration = serde_json::json!({ "aliases": { "code": "code-oss", "bad": 7 } });
    let map = alias_map(&integration);
    assert_eq!(map.len(), 1);
    assert_eq!(map.get("code").map(String::as_str), Some("code-oss"));
  }
}
