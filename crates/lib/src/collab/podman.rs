//! [`ContainerEngine`] implementation shelling out to podman.

use std::io::Write;
use std::process::{Command, Stdio};

use tracing::{debug, warn};

use super::{CollaboratorError, ContainerEngine, ImageBuildRequest, InstanceStatus};

/// Runs podman as a subprocess. Stateless; safe to share.
#[derive(Debug, Clone)]
pub struct Podman {
  program: String,
}

impl Default for Podman {
  fn default() -> Self {
    Self {
      program: "podman".to_string(),
    }
  }
}

impl Podman {
  pub fn new() -> Self {
    Self::default()
  }

  /// Run podman with `args`, capturing stdout. Non-zero exit is an error
  /// carrying stderr.
  pub fn output(&self, args: &[&str]) -> Result<String, CollaboratorError> {
    debug!(command = %format!("{} {}", self.program, args.join(" ")), "running");

    let output = Command::new(&self.program)
      .args(args)
      .output()
      .map_err(|e| CollaboratorError::Engine(format!("could not run {}: {e}", self.program)))?;

    if !output.status.success() {
      let stderr = String::from_utf8_lossy(&output.stderr);
      return Err(CollaboratorError::Engine(format!(
        "'{} {}' failed: {}",
        self.program,
        args.join(" "),
        stderr.trim()
      )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
  }

  /// Like [`Self::output`] but feeding `stdin` to the child.
  fn output_with_stdin(&self, args: &[&str], stdin: &str) -> Result<String, CollaboratorError> {
    debug!(command = %format!("{} {}", self.program, args.join(" ")), "running with stdin");

    let mut child = Command::new(&self.program)
      .args(args)
      .stdin(Stdio::piped())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .spawn()
      .map_err(|e| CollaboratorError::Engine(format!("could not run {}: {e}", self.program)))?;

    if let Some(mut pipe) = child.stdin.take() {
      pipe.write_all(stdin.as_bytes())?;
    }

    let output = child
      .wait_with_output()
      .map_err(|e| CollaboratorError::Engine(format!("{} did not exit cleanly: {e}", self.program)))?;

    if !output.status.success() {
      let stderr = String::from_utf8_lossy(&output.stderr);
      return Err(CollaboratorError::Engine(format!(
        "'{} {}' failed: {}",
        self.program,
        args.join(" "),
        stderr.trim()
      )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
  }
}

impl ContainerEngine for Podman {
  fn build_image(&self, request: &ImageBuildRequest<'_>) -> Result<(), CollaboratorError> {
    let mut args: Vec<String> = vec![
      "build".into(),
      "-f".into(),
      "-".into(),
      "-t".into(),
      request.tag.into(),
    ];
    for (key, value) in &request.build_args {
      args.push("--build-arg".into());
      args.push(format!("{key}={value}"));
    }
    for (key, value) in &request.labels {
      args.push("--label".into());
      args.push(format!("{key}={value}"));
    }
    args.push(request.context_dir.display().to_string());

    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    self.output_with_stdin(&arg_refs, request.containerfile)?;
    Ok(())
  }

  fn create_instance(&self, name: &str, image_ref: &str, flags: &[String]) -> Result<(), CollaboratorError> {
    let mut args: Vec<&str> = vec!["create", "--name", name];
    args.extend(flags.iter().map(String::as_str));
    args.push(image_ref);
    self.output(&args)?;
    Ok(())
  }

  fn remove_instance(&self, name: &str) -> Result<(), CollaboratorError> {
    // --ignore makes both calls no-ops for absent containers
    self.output(&["stop", "--ignore", "--time=2", name])?;
    self.output(&["rm", "--ignore", name])?;
    Ok(())
  }

  fn remove_image(&self, image_ref: &str) -> Result<(), CollaboratorError> {
    self.output(&["rmi", "--ignore", image_ref])?;
    Ok(())
  }

  fn image_exists(&self, image_ref: &str) -> Result<bool, CollaboratorError> {
    let status = Command::new(&self.program)
      .args(["image", "exists", image_ref])
      .status()
      .map_err(|e| CollaboratorError::Engine(format!("could not run {}: {e}", self.program)))?;
    Ok(status.success())
  }

  fn query_status(&self, name: &str) -> Result<InstanceStatus, CollaboratorError> {
    // Exact-name filter; an empty result means no such container
    let filter = format!("name=^{name}$");
    let output = self.output(&["ps", "-a", "--filter", &filter, "--format", "{{.State}}"])?;

    let state = output.lines().next().unwrap_or("").trim().to_lowercase();
    Ok(match state.as_str() {
      "" => InstanceStatus::NotFound,
      "running" | "up" => InstanceStatus::Running,
      "created" => InstanceStatus::Created,
      "exited" | "stopped" => InstanceStatus::Exited,
      other => {
        warn!(container = name, state = other, "unrecognized container state");
        InstanceStatus::Exited
      }
    })
  }

  fn start(&self, name: &str) -> Result<(), CollaboratorError> {
    self.output(&["start", name])?;
    Ok(())
  }

  fn stop(&self, name: &str) -> Result<(), CollaboratorError> {
    self.output(&["stop", "--ignore", "--time=2", name])?;
    Ok(())
  }

  fn exec_interactive(&self, name: &str, command: &[String]) -> Result<i32, CollaboratorError> {
    let mut args: Vec<&str> = vec!["exec", "-it", name];
    args.extend(command.iter().map(String::as_str));

    debug!(container = name, command = ?command, "exec");
    let status = Command::new(&self.program)
      .args(&args)
      .status()
      .map_err(|e| CollaboratorError::Engine(format!("could not run {}: {e}", self.program)))?;

    Ok(status.code().unwrap_or(1))
  }

  fn exec_as_root(&self, name: &str, command: &[&str]) -> Result<(), CollaboratorError> {
    let mut args: Vec<&str> = vec!["exec", "--user", "root", name];
    args.extend_from_slice(command);
    self.output(&args)?;
    Ok(())
  }

  fn commit_instance(&self, name: &str, image_ref: &str) -> Result<(), CollaboratorError> {
    self.output(&["commit", name, image_ref])?;
    Ok(())
  }

  fn prune_system(&self, keep_label: &str) -> Result<String, CollaboratorError> {
    let filter = format!("label!={keep_label}");
    self.output(&["system", "prune", "-a", "--volumes", "--filter", &filter, "-f"])
  }
}
