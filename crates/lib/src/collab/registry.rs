//! [`RegistryBackup`] implementation against a local distribution registry.
//!
//! Image transfer goes through podman (push records the manifest digest via
//! `--digestfile`); catalog queries and manifest deletion use the registry's
//! v2 HTTP API. The registry itself runs as a podman container that this
//! module starts on demand but never creates.

use std::fs;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use super::podman::Podman;
use super::{CollaboratorError, ContainerEngine, InstanceStatus, RegistryBackup};

const DEFAULT_ADDRESS: &str = "localhost:5000";
const DEFAULT_CONTAINER: &str = "appbox-registry";

/// Config path inside the standard `registry:2` image.
const REGISTRY_CONFIG_PATH: &str = "/etc/docker/registry/config.yml";

#[derive(Debug, Deserialize)]
struct CatalogResponse {
  #[serde(default)]
  repositories: Vec<String>,
}

pub struct LocalRegistry {
  address: String,
  container_name: String,
  podman: Podman,
  http: reqwest::blocking::Client,
}

impl Default for LocalRegistry {
  fn default() -> Self {
    Self::with_address(DEFAULT_ADDRESS, DEFAULT_CONTAINER)
  }
}

impl LocalRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_address(address: &str, container_name: &str) -> Self {
    Self {
      address: address.to_string(),
      container_name: container_name.to_string(),
      podman: Podman::new(),
      http: reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap_or_default(),
    }
  }

  fn api_url(&self, path: &str) -> String {
    format!("http://{}/v2/{path}", self.address)
  }

  /// Start the registry container if it is stopped and wait until the v2
  /// endpoint answers. The container must already exist.
  fn ensure_running(&self) -> Result<(), CollaboratorError> {
    match self.podman.query_status(&self.container_name)? {
      InstanceStatus::Running => {}
      InstanceStatus::NotFound => {
        return Err(CollaboratorError::Registry(format!(
          "registry container '{}' not found; create it with \
           'podman run -d -p 5000:5000 --name {} registry:2'",
          self.container_name, self.container_name
        )));
      }
      InstanceStatus::Exited | InstanceStatus::Created => {
        debug!(container = %self.container_name, "starting registry container");
        self.podman.start(&self.container_name)?;
      }
    }

    let url = self.api_url("");
    for attempt in 0..10 {
      match self.http.get(&url).send() {
        Ok(response) if response.status().is_success() || response.status().as_u16() == 401 => {
          return Ok(());
        }
        Ok(response) => debug!(status = %response.status(), attempt, "registry not healthy yet"),
        Err(e) => debug!(error = %e, attempt, "registry not reachable yet"),
      }
      std::thread::sleep(Duration::from_millis(500));
    }

    Err(CollaboratorError::Registry(format!(
      "registry container '{}' is up but did not respond at {url}",
      self.container_name
    )))
  }
}

/// Strip the `localhost/` prefix from a local image reference, leaving the
/// repository-and-tag part used against the registry.
fn repository_ref(image_ref: &str) -> Result<&str, CollaboratorError> {
  image_ref
    .split_once('/')
    .map(|(_, rest)| rest)
    .ok_or_else(|| CollaboratorError::Registry(format!("unexpected local image reference '{image_ref}'")))
}

impl RegistryBackup for LocalRegistry {
  fn push(&self, image_ref: &str) -> Result<String, CollaboratorError> {
    self.ensure_running()?;

    let repository = repository_ref(image_ref)?;
    let registry_ref = format!("{}/{repository}", self.address);

    let digest_path = std::env::temp_dir().join(format!("appbox-digest-{}", std::process::id()));
    let digest_arg = digest_path.display().to_string();

    debug!(from = image_ref, to = %registry_ref, "pushing image");
    let result = self
      .podman
      .output(&["push", "--digestfile", &digest_arg, image_ref, &registry_ref]);

    let digest = fs::read_to_string(&digest_path)
      .map(|s| s.trim().to_string())
      .unwrap_or_default();
    if let Err(e) = fs::remove_file(&digest_path)
      && e.kind() != std::io::ErrorKind::NotFound
    {
      warn!(path = %digest_path.display(), error = %e, "could not remove digest file");
    }

    result?;
    if digest.is_empty() {
      return Err(CollaboratorError::Registry(
        "push succeeded but no digest was recorded".to_string(),
      ));
    }

    debug!(%digest, "image pushed");
    Ok(digest)
  }

  fn pull(&self, name: &str, tag: &str) -> Result<(), CollaboratorError> {
    self.ensure_running()?;

    let registry_ref = format!("{}/{name}:{tag}", self.address);
    let local_ref = format!("localhost/{name}:{tag}");

    debug!(from = %registry_ref, to = %local_ref, "pulling image");
    self.podman.output(&["pull", "--quiet", &registry_ref])?;
    self.podman.output(&["tag", &registry_ref, &local_ref])?;

    // The intermediate registry tag is just noise locally
    if let Err(e) = self.podman.output(&["rmi", &registry_ref]) {
      debug!(error = %e, "could not remove intermediate registry tag");
    }

    Ok(())
  }

  fn delete_manifest(&self, name: &str, digest: &str) -> Result<(), CollaboratorError> {
    self.ensure_running()?;

    let url = self.api_url(&format!("{name}/manifests/{digest}"));
    debug!(%url, "deleting manifest");

    let response = self
      .http
      .delete(&url)
      .send()
      .map_err(|e| CollaboratorError::Registry(format!("manifest deletion request failed: {e}")))?;

    if !response.status().is_success() {
      return Err(CollaboratorError::Registry(format!(
        "registry refused manifest deletion for '{name}': {}",
        response.status()
      )));
    }

    Ok(())
  }

  fn garbage_collect(&self, dry_run: bool) -> Result<String, CollaboratorError> {
    self.ensure_running()?;

    let mut args = vec![
      "exec",
      self.container_name.as_str(),
      "bin/registry",
      "garbage-collect",
      REGISTRY_CONFIG_PATH,
      "--delete-untagged=true",
    ];
    if dry_run {
      args.push("--dry-run");
    }

    self.podman.output(&args)
  }

  fn catalog(&self) -> Result<Vec<String>, CollaboratorError> {
    self.ensure_running()?;

    let url = self.api_url("_catalog");
    let response = self
      .http
      .get(&url)
      .send()
      .map_err(|e| CollaboratorError::Registry(format!("catalog request failed: {e}")))?;

    if !response.status().is_success() {
      return Err(CollaboratorError::Registry(format!(
        "catalog query failed: {}",
        response.status()
      )));
    }

    let catalog: CatalogResponse = response
      .json()
      .map_err(|e| CollaboratorError::Registry(format!("invalid catalog response: {e}")))?;
    Ok(catalog.repositories)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn repository_ref_strips_host_part() {
    assert_eq!(repository_ref("localhost/box-editor:latest").unwrap(), "box-editor:latest");
  }

  #[test]
  fn repository_ref_rejects_bare_names() {
    assert!(repository_ref("box-editor").is_err());
  }

  #[test]
  fn api_urls_are_built_from_address() {
    let registry = LocalRegistry::with_address("localhost:5999", "test-registry");
    assert_eq!(registry.api_url("_catalog"), "http://localhost:5999/v2/_catalog");
    assert_eq!(registry.api_url(""), "http://localhost:5999/v2/");
  }
}
