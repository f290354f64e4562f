//! User-facing operations.
//!
//! Each operation locks the target application, validates inputs before any
//! side effect, and delegates plan execution to the [`Reconciler`]. This is
//! the layer the CLI calls into; nothing here prints, it only returns
//! outcomes for the caller to render.

use std::fs;
use std::path::Path;

use thiserror::Error;
use tracing::{info, warn};

use crate::collab::{CollaboratorError, Collaborators, InstanceStatus};
use crate::config::edit::{ConfigEdit, EditError};
use crate::config::{AppConfig, ConfigError, get_str, get_str_list};
use crate::consts::{MANAGED_LABEL, image_ref};
use crate::digest::compute_digests;
use crate::engine::{ReconcileError, Reconciler};
use crate::lock::{AppLock, AppLockError};
use crate::paths;
use crate::plan::{ActionPlan, compute_plan};
use crate::state::{AppStateDir, InstallationStatus, StateError};

#[derive(Debug, Error)]
pub enum OpsError {
  #[error(transparent)]
  Reconcile(#[from] ReconcileError),

  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error(transparent)]
  Edit(#[from] EditError),

  #[error(transparent)]
  State(#[from] StateError),

  #[error(transparent)]
  Lock(#[from] AppLockError),

  #[error("{context} failed for '{app}': {source}")]
  Collaborator {
    app: String,
    context: &'static str,
    #[source]
    source: CollaboratorError,
  },

  #[error("failed to create home directory {path}: {source}")]
  HomeDir {
    path: std::path::PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// Result of an install.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
  /// Fresh install executed.
  Installed,
  /// Identical configuration was already installed; nothing done.
  AlreadyInstalled,
}

/// Result of a network toggle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkOutcome {
  /// Setting changed and the plan was executed.
  Applied(ActionPlan),
  /// Setting already had the requested value.
  Unchanged,
}

/// One row of `list` output.
#[derive(Debug, Clone)]
pub struct AppSummary {
  pub app_name: String,
  pub container_name: String,
  pub base_image: String,
  pub status: InstallationStatus,
  /// Live container status, when the engine could be queried.
  pub instance: Option<InstanceStatus>,
  pub needs_apply: bool,
}

/// The operations façade the CLI drives.
pub struct Ops<'a> {
  collab: Collaborators<'a>,
}

impl<'a> Ops<'a> {
  pub fn new(collab: Collaborators<'a>) -> Self {
    Self { collab }
  }

  fn reconciler(&self) -> Reconciler<'a> {
    Reconciler::new(self.collab)
  }

  /// Install an application from a configuration file.
  ///
  /// Installing the exact configuration that is already installed is a
  /// no-op. Installing a different configuration under an installed
  /// container name is a conflict; the stored config must be changed via
  /// `configure` instead.
  pub fn install(&self, config_path: &Path) -> Result<InstallOutcome, OpsError> {
    let config = AppConfig::load(config_path)?;
    let name = config.container_name.clone();
    let state_dir = AppStateDir::for_app(&name);
    let _lock = AppLock::acquire(state_dir.dir(), &name, "install")?;

    if state_dir.load_status() == InstallationStatus::Installed {
      let saved = state_dir.load_state();
      if compute_digests(&config) == saved.digests {
        info!(app = %name, "already installed with identical configuration");
        return Ok(InstallOutcome::AlreadyInstalled);
      }
      return Err(ReconcileError::NameConflict { name }.into());
    }

    state_dir.ensure()?;
    config.save(&state_dir.config_path())?;

    let home = paths::app_home_dir(&name);
    fs::create_dir_all(&home).map_err(|source| OpsError::HomeDir { path: home, source })?;

    self.reconciler().execute(ActionPlan::full(), &config, &state_dir)?;
    Ok(InstallOutcome::Installed)
  }

  /// Reconcile an application with its stored configuration.
  ///
  /// Works against any application with a state directory, installed or
  /// not: after a `remove` without purge, the saved digests are empty, so
  /// the computed plan is a full rebuild and `apply` reinstalls. Returns
  /// the plan that was executed (possibly a no-op).
  pub fn apply(&self, name: &str) -> Result<ActionPlan, OpsError> {
    let state_dir = known(name)?;
    let _lock = AppLock::acquire(state_dir.dir(), name, "apply")?;

    let config = AppConfig::load(&state_dir.config_path())?;
    let current = compute_digests(&config);
    let saved = state_dir.load_state();
    let plan = compute_plan(&current, &saved.digests);

    self.reconciler().execute(plan, &config, &state_dir)?;
    Ok(plan)
  }

  /// Remove an application's integration, container, and local image.
  ///
  /// Without `purge`, the stored configuration, the isolated home, and the
  /// registry backup are kept, so a later `install` of the same config is a
  /// clean rebuild. With `purge`, everything goes, including the registry
  /// manifest when a digest is on record.
  pub fn remove(&self, name: &str, purge: bool) -> Result<(), OpsError> {
    let state_dir = known(name)?;
    let _lock = AppLock::acquire(state_dir.dir(), name, "remove")?;

    let config = AppConfig::load(&state_dir.config_path())?;
    let wrap = |source: CollaboratorError| OpsError::Collaborator {
      app: name.to_string(),
      context: "remove",
      source,
    };

    self.collab.integrator.remove_integration(name, &config).map_err(wrap)?;
    self.collab.engine.remove_instance(name).map_err(wrap)?;
    self.collab.engine.remove_image(&image_ref(name)).map_err(wrap)?;

    if purge {
      let saved = state_dir.load_state();
      if let Some(digest) = &saved.registry_digest
        && let Err(e) = self.collab.registry.delete_manifest(name, digest)
      {
        // The local application is gone either way
        warn!(app = %name, error = %e, "could not delete registry manifest");
      }

      let home = paths::app_home_dir(name);
      if let Err(e) = fs::remove_dir_all(&home)
        && e.kind() != std::io::ErrorKind::NotFound
      {
        warn!(path = %home.display(), error = %e, "could not remove home directory");
      }

      state_dir.delete_all()?;
      info!(app = %name, "application purged");
      return Ok(());
    }

    state_dir.clear_digests()?;
    state_dir.set_status(InstallationStatus::NotInstalled)?;
    info!(app = %name, "application removed, configuration and home kept");
    Ok(())
  }

  /// Rebuild everything, keeping the home directory.
  ///
  /// With `config_path`, the given document replaces the stored one first;
  /// it must describe the same container name.
  pub fn reinstall(&self, name: &str, config_path: Option<&Path>) -> Result<(), OpsError> {
    let state_dir = known(name)?;
    let _lock = AppLock::acquire(state_dir.dir(), name, "reinstall")?;

    let config = match config_path {
      Some(path) => {
        let config = AppConfig::load(path)?;
        if config.container_name != name {
          return Err(
            ConfigError::InvalidField {
              field: "container_name".to_string(),
              expected: "to match the application being reinstalled",
            }
            .into(),
          );
        }
        config.save(&state_dir.config_path())?;
        config
      }
      None => AppConfig::load(&state_dir.config_path())?,
    };

    self.reconciler().execute(ActionPlan::full(), &config, &state_dir)?;
    Ok(())
  }

  /// Recreate the container and integration from the existing image.
  ///
  /// For when the container was deleted or wedged outside of appbox. Fails
  /// if the image itself is gone; that calls for a `reinstall`.
  pub fn repair(&self, name: &str) -> Result<(), OpsError> {
    let state_dir = known(name)?;
    let _lock = AppLock::acquire(state_dir.dir(), name, "repair")?;

    let config = AppConfig::load(&state_dir.config_path())?;
    let image = image_ref(name);
    let present = self.collab.engine.image_exists(&image).map_err(|source| OpsError::Collaborator {
      app: name.to_string(),
      context: "repair",
      source,
    })?;
    if !present {
      return Err(
        ReconcileError::ImageMissing {
          name: name.to_string(),
          image,
        }
        .into(),
      );
    }

    self.reconciler().execute(ActionPlan::repair(), &config, &state_dir)?;
    Ok(())
  }

  /// Upgrade the distribution packages inside a container in place.
  ///
  /// Runs the package upgrade as root inside the (started) container,
  /// commits the result over the local image, and pushes the new image to
  /// the backup registry. The configuration is unchanged, so the section
  /// digests stay as they are; only the registry digest moves. The
  /// container is stopped afterwards so the next launch picks up a clean
  /// session.
  pub fn upgrade(&self, name: &str) -> Result<(), OpsError> {
    let state_dir = installed(name)?;
    let _lock = AppLock::acquire(state_dir.dir(), name, "upgrade")?;

    let wrap = |source: CollaboratorError| OpsError::Collaborator {
      app: name.to_string(),
      context: "upgrade",
      source,
    };

    if self.collab.engine.query_status(name).map_err(wrap)? != InstanceStatus::Running {
      self.collab.engine.start(name).map_err(wrap)?;
    }

    let image = image_ref(name);
    let upgraded = (|| {
      self
        .collab
        .engine
        .exec_as_root(name, &["apt-get", "update", "-y"])
        .map_err(wrap)?;
      self
        .collab
        .engine
        .exec_as_root(name, &["apt-get", "upgrade", "-y"])
        .map_err(wrap)?;
      self.collab.engine.commit_instance(name, &image).map_err(wrap)?;
      self.collab.registry.push(&image).map_err(wrap)
    })();

    if let Err(e) = self.collab.engine.stop(name) {
      warn!(app = %name, error = %e, "could not stop container after upgrade");
    }

    let digest = upgraded?;
    let mut state = state_dir.load_state();
    state.registry_digest = Some(digest);
    state_dir.save_state(&state)?;

    info!(app = %name, "packages upgraded, new image backed up");
    Ok(())
  }

  /// Bring an application back from its registry backup.
  ///
  /// Pulls the image out of the backup registry when it is missing from
  /// the local store, then recreates the container and integration from
  /// it. Nothing is rebuilt; the stored configuration must still exist.
  pub fn restore(&self, name: &str) -> Result<(), OpsError> {
    let state_dir = known(name)?;
    let _lock = AppLock::acquire(state_dir.dir(), name, "restore")?;

    let config = AppConfig::load(&state_dir.config_path())?;
    let wrap = |source: CollaboratorError| OpsError::Collaborator {
      app: name.to_string(),
      context: "restore",
      source,
    };

    let image = image_ref(name);
    if !self.collab.engine.image_exists(&image).map_err(wrap)? {
      self.collab.registry.pull(name, "latest").map_err(wrap)?;
    }

    self.reconciler().execute(ActionPlan::repair(), &config, &state_dir)?;
    Ok(())
  }

  /// Apply configuration updates to the stored document.
  ///
  /// All updates are parsed and validated before any is applied, so a bad
  /// update in the middle of the list leaves the document untouched. The
  /// container is not reconciled; the application is marked as needing an
  /// `apply`.
  pub fn configure(&self, name: &str, updates: &[String]) -> Result<Vec<ConfigEdit>, OpsError> {
    let state_dir = known(name)?;
    let _lock = AppLock::acquire(state_dir.dir(), name, "configure")?;

    let edits = updates
      .iter()
      .map(|u| ConfigEdit::parse(u))
      .collect::<Result<Vec<_>, _>>()?;

    let mut config = AppConfig::load(&state_dir.config_path())?;
    for edit in &edits {
      edit.apply(&mut config)?;
    }

    config.save(&state_dir.config_path())?;
    state_dir.mark_needs_apply()?;
    info!(app = %name, updates = edits.len(), "configuration updated, run 'apply' to reconcile");
    Ok(edits)
  }

  /// Toggle network access and reconcile immediately.
  pub fn set_network(&self, name: &str, allow: bool) -> Result<NetworkOutcome, OpsError> {
    {
      let state_dir = known(name)?;
      let config = AppConfig::load(&state_dir.config_path())?;
      let current = crate::config::get_bool(&config.permissions, "network", true);
      if current == allow {
        return Ok(NetworkOutcome::Unchanged);
      }

      self.configure(name, &[format!("permissions.network:{allow}")])?;
    }
    // Lock is released between configure and apply; both take it themselves
    let plan = self.apply(name)?;
    Ok(NetworkOutcome::Applied(plan))
  }

  /// Run a command inside an application's container, starting it if needed.
  ///
  /// An empty `command` falls back to `runtime.default_exec`. Returns the
  /// command's exit code.
  pub fn run(&self, name: &str, command: &[String]) -> Result<i32, OpsError> {
    let state_dir = installed(name)?;
    let config = AppConfig::load(&state_dir.config_path())?;

    let wrap = |source: CollaboratorError| OpsError::Collaborator {
      app: name.to_string(),
      context: "run",
      source,
    };

    let mut argv: Vec<String> = if command.is_empty() {
      let default_exec = get_str(&config.runtime, "default_exec").ok_or_else(|| ReconcileError::NoDefaultExec {
        name: name.to_string(),
      })?;
      default_exec.split_whitespace().map(str::to_string).collect()
    } else {
      command.to_vec()
    };

    let prepend = get_str_list(&config.runtime, "prepend_exec_args");
    if !prepend.is_empty() {
      argv.splice(0..0, prepend);
    }

    if self.collab.engine.query_status(name).map_err(wrap)? != InstanceStatus::Running {
      self.collab.engine.start(name).map_err(wrap)?;
    }

    let code = self.collab.engine.exec_interactive(name, &argv).map_err(wrap)?;
    Ok(code)
  }

  /// Summaries of every managed application, sorted by container name.
  pub fn list(&self) -> Result<Vec<AppSummary>, OpsError> {
    let apps_dir = paths::apps_dir();
    let entries = match fs::read_dir(&apps_dir) {
      Ok(entries) => entries,
      Err(e) => {
        if e.kind() != std::io::ErrorKind::NotFound {
          warn!(path = %apps_dir.display(), error = %e, "could not read applications directory");
        }
        return Ok(vec![]);
      }
    };

    let mut summaries = Vec::new();
    for entry in entries.filter_map(Result::ok) {
      if !entry.path().is_dir() {
        continue;
      }
      let state_dir = AppStateDir::new(entry.path());

      let config = match AppConfig::load(&state_dir.config_path()) {
        Ok(config) => config,
        Err(e) => {
          warn!(path = %entry.path().display(), error = %e, "skipping unreadable application");
          continue;
        }
      };

      let instance = match self.collab.engine.query_status(&config.container_name) {
        Ok(status) => Some(status),
        Err(e) => {
          warn!(app = %config.container_name, error = %e, "could not query container status");
          None
        }
      };

      summaries.push(AppSummary {
        app_name: config.app_name.clone(),
        base_image: get_str(&config.image, "base").unwrap_or("<unknown>").to_string(),
        container_name: config.container_name,
        status: state_dir.load_status(),
        instance,
        needs_apply: state_dir.needs_apply(),
      });
    }

    summaries.sort_by(|a, b| a.container_name.cmp(&b.container_name));
    Ok(summaries)
  }

  /// Repository names present in the backup registry.
  pub fn backup_catalog(&self) -> Result<Vec<String>, OpsError> {
    self.collab.registry.catalog().map_err(|source| OpsError::Collaborator {
      app: "registry".to_string(),
      context: "catalog query",
      source,
    })
  }

  /// Garbage-collect unreferenced registry blobs. Returns the report.
  pub fn backup_gc(&self, dry_run: bool) -> Result<String, OpsError> {
    self
      .collab
      .registry
      .garbage_collect(dry_run)
      .map_err(|source| OpsError::Collaborator {
        app: "registry".to_string(),
        context: "garbage collection",
        source,
      })
  }

  /// Delete every podman container, image, and volume not labeled as
  /// managed by appbox. Returns the engine's report.
  pub fn prune(&self) -> Result<String, OpsError> {
    self
      .collab
      .engine
      .prune_system(MANAGED_LABEL)
      .map_err(|source| OpsError::Collaborator {
        app: "host".to_string(),
        context: "system prune",
        source,
      })
  }
}

/// State directory for an application that has one, installed or not.
fn known(name: &str) -> Result<AppStateDir, OpsError> {
  let state_dir = AppStateDir::for_app(name);
  if !state_dir.exists() {
    return Err(ReconcileError::NotInstalled { name: name.to_string() }.into());
  }
  Ok(state_dir)
}

/// State directory for an application that is currently installed.
fn installed(name: &str) -> Result<AppStateDir, OpsError> {
  let state_dir = known(name)?;
  if state_dir.load_status() != InstallationStatus::Installed {
    return Err(ReconcileError::NotInstalled { name: name.to_string() }.into());
  }
  Ok(state_dir)
}
