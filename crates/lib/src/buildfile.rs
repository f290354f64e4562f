//! Containerfile generation from the `image` section.
//!
//! The generated file mirrors the host user (name, UID, locale) inside the
//! image so the container user can reach host session resources, adds any
//! configured third-party apt repositories, and installs the configured
//! packages. The long-running default command keeps the container alive so
//! applications can be `exec`ed into it.

use serde_json::Value;

use crate::config::{AppConfig, get_str, get_str_list};

/// Host details baked into the image as build arguments.
#[derive(Debug, Clone)]
pub struct HostIdentity {
  pub user: String,
  pub uid: u32,
  pub locale: String,
}

impl HostIdentity {
  /// Detect the current user, UID, and locale from the environment.
  pub fn detect() -> Self {
    let user = std::env::var("USER").unwrap_or_else(|_| "user".to_string());
    let locale = std::env::var("LANG")
      .ok()
      .filter(|l| !l.is_empty() && l.contains('.'))
      .unwrap_or_else(|| "C.UTF-8".to_string());

    Self {
      user,
      uid: current_uid(),
      locale,
    }
  }

  /// The `--build-arg` pairs matching the ARG lines in the Containerfile.
  pub fn build_args(&self) -> Vec<(String, String)> {
    vec![
      ("HOST_USER".to_string(), self.user.clone()),
      ("HOST_UID".to_string(), self.uid.to_string()),
      ("HOST_LOCALE".to_string(), self.locale.clone()),
    ]
  }
}

#[cfg(unix)]
fn current_uid() -> u32 {
  rustix::process::getuid().as_raw()
}

#[cfg(not(unix))]
fn current_uid() -> u32 {
  1000
}

/// Generate Containerfile content for an application.
pub fn generate(config: &AppConfig, host: &HostIdentity) -> String {
  let base = get_str(&config.image, "base").unwrap_or("debian:stable");
  let mut lines = vec![
    format!("FROM {base}"),
    format!("ARG HOST_USER={}", host.user),
    format!("ARG HOST_UID={}", host.uid),
    format!("ARG HOST_LOCALE={}", host.locale),
    "ENV DEBIAN_FRONTEND=noninteractive".to_string(),
    "RUN apt-get update && apt-get install -y wget gpg sudo locales && apt-get clean".to_string(),
    // Locale generation so terminal applications behave like on the host
    "RUN sed -i -e \"s/# $HOST_LOCALE UTF-8/$HOST_LOCALE UTF-8/\" /etc/locale.gen".to_string(),
    "RUN dpkg-reconfigure --frontend=noninteractive locales".to_string(),
    "ENV LANG=$HOST_LOCALE".to_string(),
  ];

  for repo in repositories(&config.image) {
    lines.push(format!("RUN mkdir -p $(dirname {})", repo.key_path));
    lines.push(format!("RUN wget -qO- {} | gpg --dearmor > {}", repo.key_url, repo.key_path));
    lines.push(format!(
      "RUN echo \"{}\" > /etc/apt/sources.list.d/{}.list",
      repo.repo_string, config.container_name
    ));
  }

  let packages = get_str_list(&config.image, "packages");
  if !packages.is_empty() {
    lines.push(format!(
      "RUN apt-get update && apt-get install -y {} && apt-get clean",
      packages.join(" ")
    ));
  }

  // Mirror the host user so UID-mapped volumes and session sockets work
  lines.push("RUN useradd -m -s /bin/bash -u $HOST_UID $HOST_USER".to_string());
  lines.push("RUN usermod -aG sudo $HOST_USER".to_string());
  lines.push("RUN echo \"$HOST_USER ALL=(ALL) NOPASSWD:ALL\" >> /etc/sudoers".to_string());

  // Keep the container alive; applications are exec'ed into it
  lines.push("CMD [\"sleep\", \"infinity\"]".to_string());

  lines.join("\n")
}

struct Repository {
  key_path: String,
  key_url: String,
  repo_string: String,
}

fn repositories(image: &Value) -> Vec<Repository> {
  image
    .get("repositories")
    .and_then(Value::as_array)
    .map(|repos| {
      repos
        .iter()
        .filter_map(|repo| {
          // Entries missing any of the three fields are skipped, matching
          // the validation done at configure time
          Some(Repository {
            key_path: get_str(repo, "key_path")?.to_string(),
            key_url: get_str(repo, "key_url")?.to_string(),
            repo_string: get_str(repo, "repo_string")?.to_string(),
          })
        })
        .collect()
    })
    .unwrap_or_default()
}
