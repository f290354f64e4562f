//! Per-section content digests for change detection.
//!
//! Each configuration section is canonicalized (recursively sorted map keys)
//! and hashed with SHA-256, so two semantically identical documents always
//! digest identically regardless of key order. A missing section hashes to
//! the fixed empty digest rather than being an error.
//!
//! The `integration` section contributes a second, narrower digest
//! (`integration_critical`) computed only over the fields that affect
//! container-creation flags; cosmetic fields like alias maps only move the
//! full `integration` digest.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::config::{AppConfig, CRITICAL_INTEGRATION_FIELDS, HASHED_SECTIONS};

/// Digest key for the synthetic critical-integration digest.
pub const INTEGRATION_CRITICAL_KEY: &str = "integration_critical";

/// SHA-256 of zero bytes, used for absent sections.
pub const EMPTY_DIGEST: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Mapping from section name to content digest.
///
/// Includes one entry per hashed section plus `integration_critical`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SectionDigestSet(pub BTreeMap<String, String>);

impl SectionDigestSet {
  pub fn get(&self, section: &str) -> Option<&str> {
    self.0.get(section).map(String::as_str)
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// True when `section` differs between `self` (current) and `saved`.
  ///
  /// A digest missing on the saved side counts as changed, which makes a
  /// fresh install (empty saved set) report every section as changed.
  pub fn changed_from(&self, saved: &SectionDigestSet, section: &str) -> bool {
    self.get(section) != saved.get(section)
  }
}

/// Compute the digest set for a desired-state document.
pub fn compute_digests(config: &AppConfig) -> SectionDigestSet {
  let mut digests = BTreeMap::new();

  for section in HASHED_SECTIONS {
    digests.insert(section.to_string(), section_digest(config.section(section)));
  }

  digests.insert(
    INTEGRATION_CRITICAL_KEY.to_string(),
    section_digest(&critical_integration_subset(config.section("integration"))),
  );

  SectionDigestSet(digests)
}

/// Digest of a single section value.
pub fn section_digest(section: &Value) -> String {
  if section.is_null() {
    return EMPTY_DIGEST.to_string();
  }
  hash_bytes(canonical_json(section).as_bytes())
}

/// The subset of the integration section that affects container creation.
///
/// Returns `Null` when no critical field is present, so "no integration
/// section" and "integration with only cosmetic fields" digest identically.
fn critical_integration_subset(integration: &Value) -> Value {
  let mut subset = Map::new();
  if let Some(map) = integration.as_object() {
    for field in CRITICAL_INTEGRATION_FIELDS {
      if let Some(value) = map.get(field) {
        subset.insert(field.to_string(), value.clone());
      }
    }
  }
  if subset.is_empty() { Value::Null } else { Value::Object(subset) }
}

/// Serialize a value to JSON with recursively sorted map keys.
///
/// `serde_json` already sorts when its map is a `BTreeMap`, but the digest
/// format must not depend on a crate feature flag, so the ordering is made
/// explicit here.
pub fn canonical_json(value: &Value) -> String {
  let mut out = String::new();
  write_canonical(value, &mut out);
  out
}

fn write_canonical(value: &Value, out: &mut String) {
  match value {
    Value::Object(map) => {
      let mut entries: Vec<(&String, &Value)> = map.iter().collect();
      entries.sort_by_key(|(key, _)| *key);

      out.push('{');
      for (i, (key, val)) in entries.iter().enumerate() {
        if i > 0 {
          out.push(',');
        }
        out.push_str(&serde_json::to_string(key).expect("string serializes"));
        out.push(':');
        write_canonical(val, out);
      }
      out.push('}');
    }
    Value::Array(items) => {
      out.push('[');
      for (i, item) in items.iter().enumerate() {
        if i > 0 {
          out.push(',');
        }
        write_canonical(item, out);
      }
      out.push(']');
    }
    scalar => out.push_str(&serde_json::to_string(scalar).expect("scalar serializes")),
  }
}

/// Hex-encoded SHA-256 of arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> String {
  let mut hasher = Sha256::new();
  hasher.update(data);
  hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn config_with_integration(integration: Value) -> AppConfig {
    AppConfig::from_value(json!({
      "app_name": "Editor",
      "container_name": "box-editor",
      "image": { "base": "debian:bookworm" },
      "integration": integration,
    }))
    .unwrap()
  }

  #[test]
  fn empty_digest_matches_sha256_of_nothing() {
    assert_eq!(hash_bytes(b""), EMPTY_DIGEST);
  }

  #[test]
  fn missing_section_hashes_to_empty_digest() {
    let config = config_with_integration(Value::Null);
    let digests = compute_digests(&config);
    assert_eq!(digests.get("storage"), Some(EMPTY_DIGEST));
    assert_eq!(digests.get("runtime"), Some(EMPTY_DIGEST));
  }

  #[test]
  fn digest_set_covers_all_sections_plus_critical() {
    let config = config_with_integration(Value::Null);
    let digests = compute_digests(&config);
    for section in HASHED_SECTIONS {
      assert!(digests.get(section).is_some(), "missing digest for {section}");
    }
    assert!(digests.get(INTEGRATION_CRITICAL_KEY).is_some());
  }

  #[test]
  fn canonical_json_is_key_order_invariant() {
    let a = json!({ "b": 2, "a": 1, "nested": { "y": [1, 2], "x": true } });
    let b = json!({ "nested": { "x": true, "y": [1, 2] }, "a": 1, "b": 2 });
    assert_eq!(canonical_json(&a), canonical_json(&b));
    assert_eq!(section_digest(&a), section_digest(&b));
  }

  #[test]
  fn canonical_json_preserves_array_order() {
    let a = json!(["one", "two"]);
    let b = json!(["two", "one"]);
    assert_ne!(canonical_json(&a), canonical_json(&b));
  }

  #[test]
  fn structurally_equal_configs_digest_identically() {
    let c1 = config_with_integration(json!({ "aliases": { "code": "code-oss" }, "desktop_integration": true }));
    let c2 = config_with_integration(json!({ "desktop_integration": true, "aliases": { "code": "code-oss" } }));
    assert_eq!(compute_digests(&c1), compute_digests(&c2));
  }

  #[test]
  fn alias_change_moves_full_digest_only() {
    let before = config_with_integration(json!({ "desktop_integration": true, "aliases": { "code": "code-oss" } }));
    let after = config_with_integration(json!({ "desktop_integration": true, "aliases": { "code": "vscodium" } }));

    let d1 = compute_digests(&before);
    let d2 = compute_digests(&after);

    assert_ne!(d1.get("integration"), d2.get("integration"));
    assert_eq!(d1.get(INTEGRATION_CRITICAL_KEY), d2.get(INTEGRATION_CRITICAL_KEY));
  }

  #[test]
  fn critical_field_change_moves_both_digests() {
    let before = config_with_integration(json!({ "desktop_integration": true }));
    let after = config_with_integration(json!({ "desktop_integration": false }));

    let d1 = compute_digests(&before);
    let d2 = compute_digests(&after);

    assert_ne!(d1.get("integration"), d2.get("integration"));
    assert_ne!(d1.get(INTEGRATION_CRITICAL_KEY), d2.get(INTEGRATION_CRITICAL_KEY));
  }

  #[test]
  fn cosmetic_only_integration_matches_absent_critical_subset() {
    let cosmetic = config_with_integration(json!({ "aliases": { "code": "code-oss" } }));
    let absent = config_with_integration(Value::Null);

    let d1 = compute_digests(&cosmetic);
    let d2 = compute_digests(&absent);
    assert_eq!(d1.get(INTEGRATION_CRITICAL_KEY), d2.get(INTEGRATION_CRITICAL_KEY));
    assert_eq!(d1.get(INTEGRATION_CRITICAL_KEY), Some(EMPTY_DIGEST));
  }

  #[test]
  fn changed_from_treats_missing_saved_as_changed() {
    let config = config_with_integration(Value::Null);
    let current = compute_digests(&config);
    let saved = SectionDigestSet::default();
    assert!(current.changed_from(&saved, "image"));
  }
}
