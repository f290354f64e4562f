//! Action planning from per-section digest deltas.
//!
//! The implication chain encodes a real dependency order: a container is
//! built from an image, so an image change forces a container recreate, and
//! desktop integration is tied to the container's identity, so a recreate
//! forces reintegration.

use crate::digest::{INTEGRATION_CRITICAL_KEY, SectionDigestSet};

/// Per-section change booleans between current and saved digests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionDelta {
  pub image: bool,
  pub storage: bool,
  pub runtime: bool,
  pub permissions: bool,
  /// Full integration digest, covering cosmetic fields like aliases.
  pub integration: bool,
  /// Narrow digest over fields that affect container-creation flags.
  pub integration_critical: bool,
}

impl SectionDelta {
  pub fn compute(current: &SectionDigestSet, saved: &SectionDigestSet) -> Self {
    Self {
      image: current.changed_from(saved, "image"),
      storage: current.changed_from(saved, "storage"),
      runtime: current.changed_from(saved, "runtime"),
      permissions: current.changed_from(saved, "permissions"),
      integration: current.changed_from(saved, "integration"),
      integration_critical: current.changed_from(saved, INTEGRATION_CRITICAL_KEY),
    }
  }
}

/// The ordered set of side-effecting actions a reconciliation will perform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActionPlan {
  pub rebuild: bool,
  pub recreate: bool,
  pub reintegrate: bool,
}

impl ActionPlan {
  /// Plan for a fresh install or forced rebuild: everything.
  pub fn full() -> Self {
    Self {
      rebuild: true,
      recreate: true,
      reintegrate: true,
    }
  }

  /// Plan for a repair: recreate the container from the existing image and
  /// refresh integration, without rebuilding.
  pub fn repair() -> Self {
    Self {
      rebuild: false,
      recreate: true,
      reintegrate: true,
    }
  }

  /// True when no collaborator needs to be invoked.
  pub fn is_noop(&self) -> bool {
    !self.rebuild && !self.recreate && !self.reintegrate
  }
}

impl std::fmt::Display for ActionPlan {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(
      f,
      "rebuild={} recreate={} reintegrate={}",
      self.rebuild, self.recreate, self.reintegrate
    )
  }
}

/// Convert a digest comparison into an action plan.
///
/// The implication chain is fixed:
///
/// ```text
/// rebuild     = image_changed
/// recreate    = rebuild || storage || runtime || permissions || integration_critical
/// reintegrate = recreate || integration
/// ```
pub fn compute_plan(current: &SectionDigestSet, saved: &SectionDigestSet) -> ActionPlan {
  let delta = SectionDelta::compute(current, saved);

  let rebuild = delta.image;
  let recreate = rebuild || delta.storage || delta.runtime || delta.permissions || delta.integration_critical;
  let reintegrate = recreate || delta.integration;

  ActionPlan {
    rebuild,
    recreate,
    reintegrate,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::AppConfig;
  use crate::digest::compute_digests;
  use serde_json::json;

  fn base_config() -> serde_json::Value {
    json!({
      "app_name": "Editor",
      "container_name": "box-editor",
      "image": { "base": "debian:bookworm", "packages": ["editor"] },
      "storage": { "volumes": ["~/Projects:/projects"] },
      "runtime": { "default_exec": "editor" },
      "permissions": { "network": true },
      "integration": { "desktop_integration": true, "aliases": { "ed": "editor" } },
    })
  }

  fn digests_for(doc: serde_json::Value) -> SectionDigestSet {
    compute_digests(&AppConfig::from_value(doc).unwrap())
  }

  fn mutated(mutate: impl FnOnce(&mut serde_json::Value)) -> SectionDigestSet {
    let mut doc = base_config();
    mutate(&mut doc);
    digests_for(doc)
  }

  #[test]
  fn unchanged_config_is_noop() {
    let saved = digests_for(base_config());
    let current = digests_for(base_config());
    assert!(compute_plan(&current, &saved).is_noop());
  }

  #[test]
  fn fresh_install_plans_everything() {
    let current = digests_for(base_config());
    let plan = compute_plan(&current, &SectionDigestSet::default());
    assert_eq!(plan, ActionPlan::full());
  }

  #[test]
  fn image_change_escalates_fully() {
    let saved = digests_for(base_config());
    let current = mutated(|doc| doc["image"]["packages"] = json!(["editor", "firefox"]));
    assert_eq!(compute_plan(&current, &saved), ActionPlan::full());
  }

  #[test]
  fn storage_change_recreates_without_rebuild() {
    let saved = digests_for(base_config());
    let current = mutated(|doc| doc["storage"]["volumes"] = json!(["~/Music:/music"]));
    assert_eq!(
      compute_plan(&current, &saved),
      ActionPlan {
        rebuild: false,
        recreate: true,
        reintegrate: true
      }
    );
  }

  #[test]
  fn runtime_change_recreates_without_rebuild() {
    let saved = digests_for(base_config());
    let current = mutated(|doc| doc["runtime"]["default_exec"] = json!("editor --safe-mode"));
    assert_eq!(compute_plan(&current, &saved), ActionPlan::repair());
  }

  #[test]
  fn permissions_change_recreates_without_rebuild() {
    let saved = digests_for(base_config());
    let current = mutated(|doc| doc["permissions"]["network"] = json!(false));
    assert_eq!(
      compute_plan(&current, &saved),
      ActionPlan {
        rebuild: false,
        recreate: true,
        reintegrate: true
      }
    );
  }

  #[test]
  fn critical_integration_change_recreates() {
    let saved = digests_for(base_config());
    let current = mutated(|doc| doc["integration"]["desktop_integration"] = json!(false));
    assert_eq!(
      compute_plan(&current, &saved),
      ActionPlan {
        rebuild: false,
        recreate: true,
        reintegrate: true
      }
    );
  }

  #[test]
  fn alias_change_only_reintegrates() {
    let saved = digests_for(base_config());
    let current = mutated(|doc| doc["integration"]["aliases"]["ed"] = json!("editor --new-window"));
    assert_eq!(
      compute_plan(&current, &saved),
      ActionPlan {
        rebuild: false,
        recreate: false,
        reintegrate: true
      }
    );
  }

  #[test]
  fn export_change_is_not_tracked() {
    // The export section only shapes desktop-file generation during
    // reintegration and is not part of the digest set.
    let saved = digests_for(base_config());
    let current = mutated(|doc| doc["export"] = json!({ "binary": "editor" }));
    assert!(compute_plan(&current, &saved).is_noop());
  }
}
