//! The per-application desired-state document.
//!
//! An application is described by a YAML document with three required
//! top-level fields (`app_name`, `container_name`, `image`) and a set of
//! optional sections (`storage`, `runtime`, `permissions`, `integration`,
//! `export`). Section contents are arbitrary nested key/value
//! structures; the engine never interprets them beyond the accessors below,
//! so user configs can carry fields this version does not know about.

pub mod edit;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Sections tracked by the change detector, in a fixed order.
pub const HASHED_SECTIONS: [&str; 5] = ["image", "storage", "runtime", "permissions", "integration"];

/// Integration fields that affect container-creation flags. Changing one of
/// these forces a container recreate, not just a desktop-file refresh.
pub const CRITICAL_INTEGRATION_FIELDS: [&str; 1] = ["desktop_integration"];

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("configuration file not found: {0}")]
  NotFound(PathBuf),

  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_yaml::Error,
  },

  #[error("missing required field '{0}' in configuration")]
  MissingField(&'static str),

  #[error("field '{field}' must be {expected}")]
  InvalidField { field: String, expected: &'static str },

  #[error("failed to write {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// A validated desired-state document.
///
/// `container_name` is the unique, immutable key used to locate all
/// per-application state on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
  pub app_name: String,
  pub container_name: String,
  pub image: Value,

  #[serde(default, skip_serializing_if = "Value::is_null")]
  pub storage: Value,

  #[serde(default, skip_serializing_if = "Value::is_null")]
  pub runtime: Value,

  #[serde(default, skip_serializing_if = "Value::is_null")]
  pub permissions: Value,

  #[serde(default, skip_serializing_if = "Value::is_null")]
  pub integration: Value,

  #[serde(default, skip_serializing_if = "Value::is_null")]
  pub export: Value,
}

impl AppConfig {
  /// Load and validate a desired-state document from disk.
  ///
  /// Validation of the required fields happens here, before any side effect
  /// of the calling operation.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    if !path.is_file() {
      return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;

    let doc: Value = serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })?;

    let config = Self::from_value(doc)?;
    debug!(app = %config.container_name, path = %path.display(), "configuration loaded");
    Ok(config)
  }

  /// Validate a parsed document and convert it into an [`AppConfig`].
  pub fn from_value(doc: Value) -> Result<Self, ConfigError> {
    let map = doc.as_object().ok_or(ConfigError::InvalidField {
      field: "<document>".to_string(),
      expected: "a mapping",
    })?;

    for field in ["app_name", "container_name", "image"] {
      if !map.contains_key(field) {
        return Err(match field {
          "app_name" => ConfigError::MissingField("app_name"),
          "container_name" => ConfigError::MissingField("container_name"),
          _ => ConfigError::MissingField("image"),
        });
      }
    }

    let app_name = map
      .get("app_name")
      .and_then(Value::as_str)
      .ok_or(ConfigError::InvalidField {
        field: "app_name".to_string(),
        expected: "a string",
      })?
      .to_string();

    let container_name = map
      .get("container_name")
      .and_then(Value::as_str)
      .ok_or(ConfigError::InvalidField {
        field: "container_name".to_string(),
        expected: "a string",
      })?
      .to_string();

    if container_name.is_empty() {
      return Err(ConfigError::InvalidField {
        field: "container_name".to_string(),
        expected: "a non-empty string",
      });
    }

    if !map.get("image").is_some_and(Value::is_object) {
      return Err(ConfigError::InvalidField {
        field: "image".to_string(),
        expected: "a mapping with at least a 'base' key",
      });
    }

    let section = |name: &str| map.get(name).cloned().unwrap_or(Value::Null);

    Ok(Self {
      app_name,
      container_name,
      image: section("image"),
      storage: section("storage"),
      runtime: section("runtime"),
      permissions: section("permissions"),
      integration: section("integration"),
      export: section("export"),
    })
  }

  /// Save the document to disk as YAML (write to temp, then rename).
  pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
    let content = serde_yaml::to_string(self).expect("AppConfig serializes to YAML");
    let temp_path = path.with_extension("yml.tmp");

    fs::write(&temp_path, &content).map_err(|source| ConfigError::Write {
      path: path.to_path_buf(),
      source,
    })?;
    fs::rename(&temp_path, path).map_err(|source| ConfigError::Write {
      path: path.to_path_buf(),
      source,
    })?;

    Ok(())
  }

  /// Access a hashed section by name. Unknown names return `Null`.
  pub fn section(&self, name: &str) -> &Value {
    const NULL: &Value = &Value::Null;
    match name {
      "image" => &self.image,
      "storage" => &self.storage,
      "runtime" => &self.runtime,
      "permissions" => &self.permissions,
      "integration" => &self.integration,
      "export" => &self.export,
      _ => NULL,
    }
  }

  /// Mutable access to a section by name, for the configure operation.
  pub fn section_mut(&mut self, name: &str) -> Option<&mut Value> {
    match name {
      "image" => Some(&mut self.image),
      "storage" => Some(&mut self.storage),
      "runtime" => Some(&mut self.runtime),
      "permissions" => Some(&mut self.permissions),
      "integration" => Some(&mut self.integration),
      "export" => Some(&mut self.export),
      _ => None,
    }
  }
}

/// Read a boolean key from a section, with a default for missing values.
pub fn get_bool(section: &Value, key: &str, default: bool) -> bool {
  section.get(key).and_then(Value::as_bool).unwrap_or(default)
}

/// Read a string key from a section.
pub fn get_str<'a>(section: &'a Value, key: &str) -> Option<&'a str> {
  section.get(key).and_then(Value::as_str)
}

/// Read a list of strings from a section. Non-string entries are skipped.
pub fn get_str_list(section: &Value, key: &str) -> Vec<String> {
  section
    .get(key)
    .and_then(Value::as_array)
    .map(|items| {
      items
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect()
    })
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::tempdir;

  const MINIMAL: &str = "\
app_name: Editor
container_name: box-editor
image:
  base: debian:bookworm
";

  #[test]
  fn load_minimal_config() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("config.yml");
    fs::write(&path, MINIMAL).unwrap();

    let config = AppConfig::load(&path).unwrap();
    assert_eq!(config.app_name, "Editor");
    assert_eq!(config.container_name, "box-editor");
    assert_eq!(get_str(&config.image, "base"), Some("debian:bookworm"));
    assert!(config.storage.is_null());
  }

  #[test]
  fn load_missing_file() {
    let temp = tempdir().unwrap();
    let result = AppConfig::load(&temp.path().join("nope.yml"));
    assert!(matches!(result, Err(ConfigError::NotFound(_))));
  }

  #[test]
  fn missing_required_field_is_rejected() {
    let doc: Value = serde_yaml::from_str("app_name: X\nimage:\n  base: debian\n").unwrap();
    let result = AppConfig::from_value(doc);
    assert!(matches!(result, Err(ConfigError::MissingField("container_name"))));
  }

  #[test]
  fn image_must_be_a_mapping() {
    let doc: Value = serde_yaml::from_str("app_name: X\ncontainer_name: x\nimage: debian\n").unwrap();
    let result = AppConfig::from_value(doc);
    assert!(matches!(result, Err(ConfigError::InvalidField { .. })));
  }

  #[test]
  fn empty_container_name_is_rejected() {
    let doc: Value = serde_yaml::from_str("app_name: X\ncontainer_name: ''\nimage:\n  base: debian\n").unwrap();
    let result = AppConfig::from_value(doc);
    assert!(matches!(result, Err(ConfigError::InvalidField { .. })));
  }

  #[test]
  fn save_and_reload_roundtrip() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("config.yml");
    fs::write(&path, MINIMAL).unwrap();

    let mut config = AppConfig::load(&path).unwrap();
    config.permissions = serde_json::json!({ "network": false });
    config.save(&path).unwrap();

    let reloaded = AppConfig::load(&path).unwrap();
    assert_eq!(config, reloaded);
    assert!(!get_bool(&reloaded.permissions, "network", true));
  }

  #[test]
  fn section_accessors() {
    let doc: Value = serde_yaml::from_str(
      "app_name: X\ncontainer_name: x\nimage:\n  base: debian\nstorage:\n  volumes:\n    - ~/Downloads:/downloads\n",
    )
    .unwrap();
    let config = AppConfig::from_value(doc).unwrap();

    assert_eq!(
      get_str_list(config.section("storage"), "volumes"),
      vec!["~/Downloads:/downloads".to_string()]
    );
    assert!(config.section("unknown").is_null());
  }
}
