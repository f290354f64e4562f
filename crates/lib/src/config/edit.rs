//! Typed dotted-path mutation of the desired-state document.
//!
//! The `configure` operation accepts updates of the form `path:value` or
//! `path:action:value` (e.g. `permissions.network:false`,
//! `image.packages:add:firefox`, `integration.aliases:map:code=code-oss`).
//! Each known path has a declared kind, and the path/action/value combination
//! is validated in one place before the document is touched.

use serde_json::{Map, Value};
use thiserror::Error;

use super::AppConfig;

/// What a configure update does to the addressed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditAction {
  /// Replace a scalar value.
  Set,
  /// Append an entry to a list.
  Add,
  /// Remove an entry from a list.
  Remove,
  /// Insert or replace a `key=value` entry in a map.
  Map,
  /// Remove a key from a map.
  Unmap,
}

impl EditAction {
  fn parse(s: &str) -> Option<Self> {
    match s {
      "set" => Some(Self::Set),
      "add" => Some(Self::Add),
      "remove" => Some(Self::Remove),
      "map" => Some(Self::Map),
      "unmap" => Some(Self::Unmap),
      _ => None,
    }
  }

  fn as_str(&self) -> &'static str {
    match self {
      Self::Set => "set",
      Self::Add => "add",
      Self::Remove => "remove",
      Self::Map => "map",
      Self::Unmap => "unmap",
    }
  }
}

/// Declared shape of a configurable key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
  Bool,
  Str,
  List,
  Map,
}

/// Every dotted path the configure operation accepts, with its kind.
const KNOWN_KEYS: &[(&str, KeyKind)] = &[
  ("image.base", KeyKind::Str),
  ("image.packages", KeyKind::List),
  ("image.repositories", KeyKind::List),
  ("storage.volumes", KeyKind::List),
  ("runtime.default_exec", KeyKind::Str),
  ("runtime.prepend_exec_args", KeyKind::List),
  ("runtime.environment", KeyKind::Map),
  ("integration.desktop_integration", KeyKind::Bool),
  ("integration.skip_categories", KeyKind::List),
  ("integration.aliases", KeyKind::Map),
  ("permissions.network", KeyKind::Bool),
  ("permissions.bluetooth", KeyKind::Bool),
  ("permissions.gpu", KeyKind::Bool),
  ("permissions.sound", KeyKind::Bool),
  ("permissions.webcam", KeyKind::Bool),
  ("permissions.microphone", KeyKind::Bool),
  ("permissions.printers", KeyKind::Bool),
  ("permissions.system_dbus", KeyKind::Bool),
  ("permissions.devices", KeyKind::List),
  ("export.binary", KeyKind::Str),
  ("export.icon", KeyKind::Str),
];

#[derive(Debug, Error)]
pub enum EditError {
  #[error("invalid update format '{0}': expected 'path:value' or 'path:action:value'")]
  InvalidFormat(String),

  #[error("unknown configuration key '{0}'")]
  UnknownKey(String),

  #[error("action '{action}' is not valid for '{key}' ({kind})")]
  InvalidAction {
    key: String,
    action: &'static str,
    kind: &'static str,
  },

  #[error("invalid value '{value}' for '{key}': expected {expected}")]
  InvalidValue {
    key: String,
    value: String,
    expected: &'static str,
  },

  #[error("'{value}' is not present in '{key}'")]
  NotPresent { key: String, value: String },
}

/// One parsed configure update, ready to apply.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigEdit {
  pub path: String,
  pub action: EditAction,
  pub value: String,
}

impl ConfigEdit {
  /// Parse an update string. Two-part form implies `set`.
  pub fn parse(update: &str) -> Result<Self, EditError> {
    let parts: Vec<&str> = update.splitn(3, ':').collect();

    let (path, action, value) = match parts.as_slice() {
      [path, value] => (*path, EditAction::Set, *value),
      [path, action, value] => {
        let action = EditAction::parse(&action.to_lowercase())
          .ok_or_else(|| EditError::InvalidFormat(update.to_string()))?;
        (*path, action, *value)
      }
      _ => return Err(EditError::InvalidFormat(update.to_string())),
    };

    if path.is_empty() || value.is_empty() {
      return Err(EditError::InvalidFormat(update.to_string()));
    }

    Ok(Self {
      path: path.to_string(),
      action,
      value: value.to_string(),
    })
  }

  /// Apply the update to a loaded document.
  pub fn apply(&self, config: &mut AppConfig) -> Result<(), EditError> {
    let kind = key_kind(&self.path)?;
    validate_action(&self.path, kind, self.action)?;

    let (section_name, key) = self
      .path
      .split_once('.')
      .expect("known keys are always section.key");

    let section = config
      .section_mut(section_name)
      .ok_or_else(|| EditError::UnknownKey(self.path.clone()))?;

    if !section.is_object() {
      *section = Value::Object(Map::new());
    }
    let map = section.as_object_mut().expect("just ensured object");

    match (kind, self.action) {
      (KeyKind::Bool, EditAction::Set) => {
        let parsed = match self.value.to_lowercase().as_str() {
          "true" | "yes" | "1" => true,
          "false" | "no" | "0" => false,
          _ => {
            return Err(EditError::InvalidValue {
              key: self.path.clone(),
              value: self.value.clone(),
              expected: "'true' or 'false'",
            });
          }
        };
        map.insert(key.to_string(), Value::Bool(parsed));
      }

      (KeyKind::Str, EditAction::Set) => {
        map.insert(key.to_string(), Value::String(self.value.clone()));
      }

      (KeyKind::List, EditAction::Add) => {
        let list = map.entry(key.to_string()).or_insert_with(|| Value::Array(vec![]));
        if !list.is_array() {
          *list = Value::Array(vec![]);
        }
        let items = list.as_array_mut().expect("just ensured array");
        if !items.iter().any(|v| v.as_str() == Some(&self.value)) {
          items.push(Value::String(self.value.clone()));
        }
      }

      (KeyKind::List, EditAction::Remove) => {
        let items = map
          .get_mut(key)
          .and_then(Value::as_array_mut)
          .ok_or_else(|| EditError::NotPresent {
            key: self.path.clone(),
            value: self.value.clone(),
          })?;
        let before = items.len();
        items.retain(|v| v.as_str() != Some(self.value.as_str()));
        if items.len() == before {
          return Err(EditError::NotPresent {
            key: self.path.clone(),
            value: self.value.clone(),
          });
        }
      }

      (KeyKind::Map, EditAction::Map) => {
        let (name, target) = self.value.split_once('=').ok_or_else(|| EditError::InvalidValue {
          key: self.path.clone(),
          value: self.value.clone(),
          expected: "'name=value'",
        })?;
        let entry = map.entry(key.to_string()).or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
          *entry = Value::Object(Map::new());
        }
        entry
          .as_object_mut()
          .expect("just ensured object")
          .insert(name.to_string(), Value::String(target.to_string()));
      }

      (KeyKind::Map, EditAction::Unmap) => {
        let removed = map
          .get_mut(key)
          .and_then(Value::as_object_mut)
          .and_then(|m| m.remove(&self.value));
        if removed.is_none() {
          return Err(EditError::NotPresent {
            key: self.path.clone(),
            value: self.value.clone(),
          });
        }
      }

      _ => unreachable!("validate_action rejects other combinations"),
    }

    Ok(())
  }
}

fn key_kind(path: &str) -> Result<KeyKind, EditError> {
  KNOWN_KEYS
    .iter()
    .find(|(key, _)| *key == path)
    .map(|(_, kind)| *kind)
    .ok_or_else(|| EditError::UnknownKey(path.to_string()))
}

fn validate_action(path: &str, kind: KeyKind, action: EditAction) -> Result<(), EditError> {
  let ok = matches!(
    (kind, action),
    (KeyKind::Bool | KeyKind::Str, EditAction::Set)
      | (KeyKind::List, EditAction::Add | EditAction::Remove)
      | (KeyKind::Map, EditAction::Map | EditAction::Unmap)
  );

  if ok {
    Ok(())
  } else {
    Err(EditError::InvalidAction {
      key: path.to_string(),
      action: action.as_str(),
      kind: match kind {
        KeyKind::Bool => "boolean",
        KeyKind::Str => "string",
        KeyKind::List => "list",
        KeyKind::Map => "map",
      },
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn test_config() -> AppConfig {
    AppConfig::from_value(json!({
      "app_name": "Editor",
      "container_name": "box-editor",
      "image": { "base": "debian:bookworm", "packages": ["editor"] },
    }))
    .unwrap()
  }

  #[test]
  fn parse_two_part_form_is_set() {
    let edit = ConfigEdit::parse("permissions.network:false").unwrap();
    assert_eq!(edit.action, EditAction::Set);
    assert_eq!(edit.path, "permissions.network");
    assert_eq!(edit.value, "false");
  }

  #[test]
  fn parse_three_part_form() {
    let edit = ConfigEdit::parse("image.packages:add:firefox").unwrap();
    assert_eq!(edit.action, EditAction::Add);
  }

  #[test]
  fn parse_rejects_garbage() {
    assert!(matches!(ConfigEdit::parse("nocolon"), Err(EditError::InvalidFormat(_))));
    assert!(matches!(ConfigEdit::parse(":set:x"), Err(EditError::InvalidFormat(_))));
  }

  #[test]
  fn set_boolean_creates_missing_section() {
    let mut config = test_config();
    ConfigEdit::parse("permissions.network:false")
      .unwrap()
      .apply(&mut config)
      .unwrap();
    assert_eq!(config.permissions, json!({ "network": false }));
  }

  #[test]
  fn set_boolean_rejects_non_boolean_value() {
    let mut config = test_config();
    let result = ConfigEdit::parse("permissions.network:maybe").unwrap().apply(&mut config);
    assert!(matches!(result, Err(EditError::InvalidValue { .. })));
  }

  #[test]
  fn add_and_remove_list_entry() {
    let mut config = test_config();
    ConfigEdit::parse("image.packages:add:firefox")
      .unwrap()
      .apply(&mut config)
      .unwrap();
    assert_eq!(config.image["packages"], json!(["editor", "firefox"]));

    ConfigEdit::parse("image.packages:remove:editor")
      .unwrap()
      .apply(&mut config)
      .unwrap();
    assert_eq!(config.image["packages"], json!(["firefox"]));
  }

  #[test]
  fn add_is_idempotent() {
    let mut config = test_config();
    for _ in 0..2 {
      ConfigEdit::parse("image.packages:add:firefox")
        .unwrap()
        .apply(&mut config)
        .unwrap();
    }
    assert_eq!(config.image["packages"], json!(["editor", "firefox"]));
  }

  #[test]
  fn remove_missing_entry_fails() {
    let mut config = test_config();
    let result = ConfigEdit::parse("storage.volumes:remove:/tmp:/tmp")
      .unwrap()
      .apply(&mut config);
    assert!(matches!(result, Err(EditError::NotPresent { .. })));
  }

  #[test]
  fn map_and_unmap_alias() {
    let mut config = test_config();
    ConfigEdit::parse("integration.aliases:map:code=code-oss")
      .unwrap()
      .apply(&mut config)
      .unwrap();
    assert_eq!(config.integration["aliases"], json!({ "code": "code-oss" }));

    ConfigEdit::parse("integration.aliases:unmap:code")
      .unwrap()
      .apply(&mut config)
      .unwrap();
    assert_eq!(config.integration["aliases"], json!({}));
  }

  #[test]
  fn map_requires_name_value_pair() {
    let mut config = test_config();
    let result = ConfigEdit::parse("integration.aliases:map:justaname")
      .unwrap()
      .apply(&mut config);
    assert!(matches!(result, Err(EditError::InvalidValue { .. })));
  }

  #[test]
  fn unknown_key_is_rejected() {
    let mut config = test_config();
    let result = ConfigEdit::parse("permissions.timetravel:true").unwrap().apply(&mut config);
    assert!(matches!(result, Err(EditError::UnknownKey(_))));
  }

  #[test]
  fn action_kind_mismatch_is_rejected() {
    let mut config = test_config();
    let result = ConfigEdit::parse("permissions.network:add:x").unwrap().apply(&mut config);
    assert!(matches!(result, Err(EditError::InvalidAction { .. })));
  }
}
