//! External collaborators of the reconciliation engine.
//!
//! The orchestrator only depends on the traits in this module; production
//! implementations shell out to podman and the local registry, and tests
//! substitute recording mocks. Image content generation, desktop-file
//! handling, and registry protocol details live behind these seams and are
//! not reconciled.

pub mod integrate;
pub mod podman;
pub mod registry;

use std::path::Path;

use thiserror::Error;

use crate::config::AppConfig;

/// Failure from any collaborator during an orchestrator step.
///
/// The orchestrator annotates these with the failing phase before
/// propagating.
#[derive(Debug, Error)]
pub enum CollaboratorError {
  #[error("container engine: {0}")]
  Engine(String),

  #[error("desktop integrator: {0}")]
  Integrator(String),

  #[error("registry: {0}")]
  Registry(String),

  #[error("io: {0}")]
  Io(#[from] std::io::Error),
}

/// Observed state of a container instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatus {
  Running,
  Exited,
  Created,
  NotFound,
}

impl InstanceStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Running => "running",
      Self::Exited => "exited",
      Self::Created => "created",
      Self::NotFound => "not found",
    }
  }
}

/// Inputs for one image build.
#[derive(Debug, Clone)]
pub struct ImageBuildRequest<'a> {
  /// Containerfile content (already materialized to `context_dir` by the
  /// orchestrator; passed for engines that build from stdin).
  pub containerfile: &'a str,
  pub tag: &'a str,
  pub context_dir: &'a Path,
  pub build_args: Vec<(String, String)>,
  pub labels: Vec<(String, String)>,
}

/// The container engine boundary (podman in production).
pub trait ContainerEngine {
  fn build_image(&self, request: &ImageBuildRequest<'_>) -> Result<(), CollaboratorError>;

  fn create_instance(&self, name: &str, image_ref: &str, flags: &[String]) -> Result<(), CollaboratorError>;

  /// Stop (if running) and remove an instance. Absent instances are fine.
  fn remove_instance(&self, name: &str) -> Result<(), CollaboratorError>;

  /// Remove an image. Absent images are fine.
  fn remove_image(&self, image_ref: &str) -> Result<(), CollaboratorError>;

  fn image_exists(&self, image_ref: &str) -> Result<bool, CollaboratorError>;

  fn query_status(&self, name: &str) -> Result<InstanceStatus, CollaboratorError>;

  fn start(&self, name: &str) -> Result<(), CollaboratorError>;

  fn stop(&self, name: &str) -> Result<(), CollaboratorError>;

  /// Run a command inside the instance, inheriting the caller's terminal.
  /// Returns the command's exit code.
  fn exec_interactive(&self, name: &str, command: &[String]) -> Result<i32, CollaboratorError>;

  /// Run a command inside the instance as root, capturing its output.
  fn exec_as_root(&self, name: &str, command: &[&str]) -> Result<(), CollaboratorError>;

  /// Commit the instance's current filesystem as `image_ref`.
  fn commit_instance(&self, name: &str, image_ref: &str) -> Result<(), CollaboratorError>;

  /// Delete every container, image, and volume not carrying `keep_label`.
  /// Returns the engine's report.
  fn prune_system(&self, keep_label: &str) -> Result<String, CollaboratorError>;
}

/// The desktop integration boundary: `.desktop` files, icons, aliases.
pub trait DesktopIntegrator {
  fn add_integration(&self, config: &AppConfig) -> Result<(), CollaboratorError>;

  fn remove_integration(&self, container_name: &str, config: &AppConfig) -> Result<(), CollaboratorError>;
}

/// The backup registry boundary.
pub trait RegistryBackup {
  /// Push an image and return its content digest.
  fn push(&self, image_ref: &str) -> Result<String, CollaboratorError>;

  fn pull(&self, name: &str, tag: &str) -> Result<(), CollaboratorError>;

  fn delete_manifest(&self, name: &str, digest: &str) -> Result<(), CollaboratorError>;

  /// Remove unreferenced blobs. Returns a human-readable report.
  fn garbage_collect(&self, dry_run: bool) -> Result<String, CollaboratorError>;

  /// List repository names known to the registry.
  fn catalog(&self) -> Result<Vec<String>, CollaboratorError>;
}

/// The full collaborator set handed to the orchestrator.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
  pub engine: &'a dyn ContainerEngine,
  pub integrator: &'a dyn DesktopIntegrator,
  pub registry: &'a dyn RegistryBackup,
}
