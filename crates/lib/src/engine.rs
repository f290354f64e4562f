//! The execution orchestrator.
//!
//! Converts an [`ActionPlan`] into ordered collaborator calls. The order is
//! load-bearing: integration teardown may query the running instance, so it
//! runs before the container is destroyed; the container is created from the
//! image, so the build runs before creation; and finalize is the only step
//! that mutates persisted state, so an interrupted run leaves the
//! last-known-good record untouched and the next invocation recomputes the
//! same plan and retries the remaining work. There is no rollback.

use std::fmt;

use thiserror::Error;
use tracing::{info, warn};

use crate::buildfile::{self, HostIdentity};
use crate::collab::{CollaboratorError, Collaborators, ImageBuildRequest};
use crate::config::{AppConfig, ConfigError};
use crate::consts::image_ref;
use crate::digest::compute_digests;
use crate::flags::{self, HostEnv};
use crate::plan::ActionPlan;
use crate::state::{AppStateDir, InstallationStatus, PersistedAppState, StateError};

/// The orchestrator step in which a failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
  Rebuild,
  Recreate,
  Reintegrate,
  Finalize,
}

impl fmt::Display for Phase {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      Phase::Rebuild => "rebuild",
      Phase::Recreate => "recreate",
      Phase::Reintegrate => "reintegrate",
      Phase::Finalize => "finalize",
    };
    write!(f, "{s}")
  }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error(transparent)]
  State(#[from] StateError),

  #[error("{phase} failed for '{app}': {source}")]
  Collaborator {
    app: String,
    phase: Phase,
    #[source]
    source: CollaboratorError,
  },

  #[error("finalize failed for '{app}': {source}")]
  Finalize {
    app: String,
    #[source]
    source: StateError,
  },

  #[error(
    "application '{name}' is already installed with a different configuration; \
     use 'configure' and 'apply' to change a running application"
  )]
  NameConflict { name: String },

  #[error("application '{name}' is not installed")]
  NotInstalled { name: String },

  #[error("image '{image}' for '{name}' not found; run 'reinstall {name}' to rebuild it from configuration")]
  ImageMissing { name: String, image: String },

  #[error("'runtime.default_exec' is not defined in the configuration for '{name}'")]
  NoDefaultExec { name: String },
}

impl ReconcileError {
  /// The failing phase, when the error came from an execution step.
  pub fn phase(&self) -> Option<Phase> {
    match self {
      Self::Collaborator { phase, .. } => Some(*phase),
      Self::Finalize { .. } => Some(Phase::Finalize),
      _ => None,
    }
  }
}

/// Executes action plans against the external collaborators.
pub struct Reconciler<'a> {
  collab: Collaborators<'a>,
}

impl<'a> Reconciler<'a> {
  pub fn new(collab: Collaborators<'a>) -> Self {
    Self { collab }
  }

  /// Execute `plan` for `config`, updating persisted state on success.
  ///
  /// A no-op plan invokes no collaborator and only clears the needs-apply
  /// flag. On any execution failure the flag is (re)created so the
  /// application stays marked dirty, and the last-applied record is left
  /// untouched.
  pub fn execute(
    &self,
    plan: ActionPlan,
    config: &AppConfig,
    state_dir: &AppStateDir,
  ) -> Result<PersistedAppState, ReconcileError> {
    if plan.is_noop() {
      info!(app = %config.container_name, "configuration already up to date");
      state_dir.clear_needs_apply()?;
      return Ok(state_dir.load_state());
    }

    info!(app = %config.container_name, %plan, "applying changes");

    match self.run_steps(plan, config, state_dir) {
      Ok(state) => Ok(state),
      Err(err) => {
        if let Err(flag_err) = state_dir.mark_needs_apply() {
          warn!(app = %config.container_name, error = %flag_err, "could not mark application as needing apply");
        }
        Err(err)
      }
    }
  }

  fn run_steps(
    &self,
    plan: ActionPlan,
    config: &AppConfig,
    state_dir: &AppStateDir,
  ) -> Result<PersistedAppState, ReconcileError> {
    let name = &config.container_name;
    let image = image_ref(name);
    let mut pushed_digest: Option<String> = None;

    let collaborator = |phase: Phase, source: CollaboratorError| ReconcileError::Collaborator {
      app: name.clone(),
      phase,
      source,
    };

    // 1. Integration teardown runs while the old container still exists
    if plan.reintegrate {
      info!(phase = "reintegrate", "removing desktop integration");
      self
        .collab
        .integrator
        .remove_integration(name, config)
        .map_err(|e| collaborator(Phase::Reintegrate, e))?;
    }

    // 2. Remove the old container instance
    if plan.recreate {
      info!(phase = "recreate", "removing container instance");
      self
        .collab
        .engine
        .remove_instance(name)
        .map_err(|e| collaborator(Phase::Recreate, e))?;
    }

    // 3. Rebuild: old image out, build inputs materialized, new image built
    //    and backed up to the registry
    if plan.rebuild {
      info!(phase = "rebuild", image = %image, "rebuilding container image");
      self
        .collab
        .engine
        .remove_image(&image)
        .map_err(|e| collaborator(Phase::Rebuild, e))?;

      let host = HostIdentity::detect();
      let containerfile = buildfile::generate(config, &host);
      state_dir.ensure()?;
      std::fs::write(state_dir.containerfile_path(), &containerfile)
        .map_err(|e| collaborator(Phase::Rebuild, CollaboratorError::Io(e)))?;

      let request = ImageBuildRequest {
        containerfile: &containerfile,
        tag: &image,
        context_dir: state_dir.dir(),
        build_args: host.build_args(),
        labels: vec![("appbox.managed".to_string(), "true".to_string())],
      };
      self
        .collab
        .engine
        .build_image(&request)
        .map_err(|e| collaborator(Phase::Rebuild, e))?;

      let digest = self
        .collab
        .registry
        .push(&image)
        .map_err(|e| collaborator(Phase::Rebuild, e))?;
      info!(phase = "rebuild", %digest, "image backed up to registry");
      pushed_digest = Some(digest);
    }

    // 4. Create the new container from the (possibly unchanged) image
    if plan.recreate {
      info!(phase = "recreate", "creating container instance");
      let host_env = HostEnv::detect(name);
      let create_flags = flags::create_flags(config, &host_env);
      self
        .collab
        .engine
        .create_instance(name, &image, &create_flags)
        .map_err(|e| collaborator(Phase::Recreate, e))?;
    }

    // 5. Fresh desktop integration from the current configuration
    if plan.reintegrate {
      info!(phase = "reintegrate", "applying desktop integration");
      self
        .collab
        .integrator
        .add_integration(config)
        .map_err(|e| collaborator(Phase::Reintegrate, e))?;
    }

    // 6. Finalize: the only state-mutating step
    let finalize = |source: StateError| ReconcileError::Finalize {
      app: name.clone(),
      source,
    };

    let previous = state_dir.load_state();
    let new_state = PersistedAppState {
      digests: compute_digests(config),
      // The registry digest survives every run that does not rebuild
      registry_digest: pushed_digest.or(previous.registry_digest),
    };

    state_dir.save_state(&new_state).map_err(finalize)?;
    state_dir.set_status(InstallationStatus::Installed).map_err(finalize)?;
    state_dir.clear_needs_apply().map_err(finalize)?;

    info!(app = %name, "reconciliation complete");
    Ok(new_state)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::collab::{ContainerEngine, DesktopIntegrator, InstanceStatus, RegistryBackup};
  use crate::digest::SectionDigestSet;
  use serde_json::json;
  use std::cell::RefCell;
  use tempfile::TempDir;

  /// One struct implements all three collaborator traits, recording every
  /// call and optionally failing on a named one.
  #[derive(Default)]
  struct Mock {
    calls: RefCell<Vec<String>>,
    fail_on: Option<&'static str>,
  }

  impl Mock {
    fn failing_on(call: &'static str) -> Self {
      Self {
        fail_on: Some(call),
        ..Self::default()
      }
    }

    fn record(&self, call: &str) -> Result<(), CollaboratorError> {
      self.calls.borrow_mut().push(call.to_string());
      if self.fail_on == Some(call) {
        return Err(CollaboratorError::Engine(format!("{call} exploded")));
      }
      Ok(())
    }

    fn calls(&self) -> Vec<String> {
      self.calls.borrow().clone()
    }
  }

  impl ContainerEngine for Mock {
    fn build_image(&self, _request: &ImageBuildRequest<'_>) -> Result<(), CollaboratorError> {
      self.record("build_image")
    }

    fn create_instance(&self, _name: &str, _image: &str, _flags: &[String]) -> Result<(), CollaboratorError> {
      self.record("create_instance")
    }

    fn remove_instance(&self, _name: &str) -> Result<(), CollaboratorError> {
      self.record("remove_instance")
    }

    fn remove_image(&self, _image: &str) -> Result<(), CollaboratorError> {
      self.record("remove_image")
    }

    fn image_exists(&self, _image: &str) -> Result<bool, CollaboratorError> {
      Ok(true)
    }

    fn query_status(&self, _name: &str) -> Result<InstanceStatus, CollaboratorError> {
      Ok(InstanceStatus::Exited)
    }

    fn start(&self, _name: &str) -> Result<(), CollaboratorError> {
      self.record("start")
    }

    fn stop(&self, _name: &str) -> Result<(), CollaboratorError> {
      self.record("stop")
    }

    fn exec_interactive(&self, _name: &str, _command: &[String]) -> Result<i32, CollaboratorError> {
      self.record("exec")?;
      Ok(0)
    }

    fn exec_as_root(&self, _name: &str, _command: &[&str]) -> Result<(), CollaboratorError> {
      self.record("exec_root")
    }

    fn commit_instance(&self, _name: &str, _image: &str) -> Result<(), CollaboratorError> {
      self.record("commit")
    }

    fn prune_system(&self, _keep_label: &str) -> Result<String, CollaboratorError> {
      self.record("prune_system")?;
      Ok(String::new())
    }
  }

  impl DesktopIntegrator for Mock {
    fn add_integration(&self, _config: &AppConfig) -> Result<(), CollaboratorError> {
      self.record("add_integration")
    }

    fn remove_integration(&self, _name: &str, _config: &AppConfig) -> Result<(), CollaboratorError> {
      self.record("remove_integration")
    }
  }

  impl RegistryBackup for Mock {
    fn push(&self, _image: &str) -> Result<String, CollaboratorError> {
      self.record("push")?;
      Ok("sha256:feedface".to_string())
    }

    fn pull(&self, _name: &str, _tag: &str) -> Result<(), CollaboratorError> {
      self.record("pull")
    }

    fn delete_manifest(&self, _name: &str, _digest: &str) -> Result<(), CollaboratorError> {
      self.record("delete_manifest")
    }

    fn garbage_collect(&self, _dry_run: bool) -> Result<String, CollaboratorError> {
      self.record("garbage_collect")?;
      Ok(String::new())
    }

    fn catalog(&self) -> Result<Vec<String>, CollaboratorError> {
      Ok(vec![])
    }
  }

  fn test_config() -> AppConfig {
    AppConfig::from_value(json!({
      "app_name": "Editor",
      "container_name": "box-editor",
      "image": { "base": "debian:bookworm" },
      "integration": { "desktop_integration": true },
    }))
    .unwrap()
  }

  fn setup() -> (TempDir, AppStateDir) {
    let temp = TempDir::new().unwrap();
    let state_dir = AppStateDir::new(temp.path().join("box-editor"));
    state_dir.ensure().unwrap();
    (temp, state_dir)
  }

  fn execute(mock: &Mock, plan: ActionPlan, state_dir: &AppStateDir) -> Result<PersistedAppState, ReconcileError> {
    let collab = Collaborators {
      engine: mock,
      integrator: mock,
      registry: mock,
    };
    Reconciler::new(collab).execute(plan, &test_config(), state_dir)
  }

  #[test]
  fn full_plan_runs_steps_in_dependency_order() {
    let (_temp, state_dir) = setup();
    let mock = Mock::default();

    let state = execute(&mock, ActionPlan::full(), &state_dir).unwrap();

    assert_eq!(
      mock.calls(),
      vec![
        "remove_integration",
        "remove_instance",
        "remove_image",
        "build_image",
        "push",
        "create_instance",
        "add_integration",
      ]
    );
    assert_eq!(state.registry_digest.as_deref(), Some("sha256:feedface"));
    assert_eq!(state_dir.load_status(), InstallationStatus::Installed);
    assert!(!state_dir.needs_apply());
    assert_eq!(state_dir.load_state(), state);
    // Build inputs were materialized into the state directory
    assert!(state_dir.containerfile_path().is_file());
  }

  #[test]
  fn noop_plan_touches_no_collaborator() {
    let (_temp, state_dir) = setup();
    let before = PersistedAppState {
      digests: SectionDigestSet([("image".to_string(), "abc".to_string())].into_iter().collect()),
      registry_digest: Some("sha256:old".to_string()),
    };
    state_dir.save_state(&before).unwrap();
    state_dir.mark_needs_apply().unwrap();

    let mock = Mock::default();
    let state = execute(&mock, ActionPlan::default(), &state_dir).unwrap();

    assert!(mock.calls().is_empty());
    assert!(!state_dir.needs_apply());
    // Persisted record is untouched, including the registry digest
    assert_eq!(state, before);
    assert_eq!(state_dir.load_state(), before);
  }

  #[test]
  fn recreate_only_run_carries_registry_digest_forward() {
    let (_temp, state_dir) = setup();
    state_dir
      .save_state(&PersistedAppState {
        digests: SectionDigestSet::default(),
        registry_digest: Some("sha256:old".to_string()),
      })
      .unwrap();

    let mock = Mock::default();
    let state = execute(&mock, ActionPlan::repair(), &state_dir).unwrap();

    assert_eq!(
      mock.calls(),
      vec!["remove_integration", "remove_instance", "create_instance", "add_integration"]
    );
    assert_eq!(state.registry_digest.as_deref(), Some("sha256:old"));
  }

  #[test]
  fn reintegrate_only_plan_skips_container_and_image() {
    let (_temp, state_dir) = setup();
    let mock = Mock::default();

    let plan = ActionPlan {
      rebuild: false,
      recreate: false,
      reintegrate: true,
    };
    execute(&mock, plan, &state_dir).unwrap();

    assert_eq!(mock.calls(), vec!["remove_integration", "add_integration"]);
  }

  #[test]
  fn failed_build_preserves_saved_state_and_marks_dirty() {
    let (_temp, state_dir) = setup();
    let before = PersistedAppState {
      digests: SectionDigestSet([("image".to_string(), "abc".to_string())].into_iter().collect()),
      registry_digest: Some("sha256:old".to_string()),
    };
    state_dir.save_state(&before).unwrap();

    let mock = Mock::failing_on("build_image");
    let err = execute(&mock, ActionPlan::full(), &state_dir).unwrap_err();

    assert_eq!(err.phase(), Some(Phase::Rebuild));
    assert!(matches!(err, ReconcileError::Collaborator { .. }));

    // No step after the failure ran
    assert_eq!(
      mock.calls(),
      vec!["remove_integration", "remove_instance", "remove_image", "build_image"]
    );

    // Last-known-good record untouched, application marked dirty
    assert_eq!(state_dir.load_state(), before);
    assert!(state_dir.needs_apply());
    assert_eq!(state_dir.load_status(), InstallationStatus::NotInstalled);
  }

  #[test]
  fn failed_create_reports_recreate_phase() {
    let (_temp, state_dir) = setup();
    let mock = Mock::failing_on("create_instance");

    let err = execute(&mock, ActionPlan::repair(), &state_dir).unwrap_err();
    assert_eq!(err.phase(), Some(Phase::Recreate));
    assert!(state_dir.needs_apply());
  }

  #[test]
  fn failed_integration_teardown_stops_before_container_removal() {
    let (_temp, state_dir) = setup();
    let mock = Mock::failing_on("remove_integration");

    let err = execute(&mock, ActionPlan::full(), &state_dir).unwrap_err();
    assert_eq!(err.phase(), Some(Phase::Reintegrate));
    assert_eq!(mock.calls(), vec!["remove_integration"]);
  }

  #[test]
  fn rerun_after_failure_computes_identical_remaining_work() {
    let (_temp, state_dir) = setup();

    // First run fails at push; saved digests stay empty
    let failing = Mock::failing_on("push");
    execute(&failing, ActionPlan::full(), &state_dir).unwrap_err();

    // Second run over the same saved/current comparison retries everything
    let mock = Mock::default();
    let state = execute(&mock, ActionPlan::full(), &state_dir).unwrap();

    assert_eq!(state.registry_digest.as_deref(), Some("sha256:feedface"));
    assert!(!state_dir.needs_apply());
    assert_eq!(state_dir.load_status(), InstallationStatus::Installed);
  }
}
