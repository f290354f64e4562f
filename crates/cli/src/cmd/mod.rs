mod apply;
mod configure;
mod image;
mod install;
mod list;
mod network;
mod prune;
mod remove;
mod run;
mod upgrade;

pub use apply::cmd_apply;
pub use configure::cmd_configure;
pub use image::{cmd_image_gc, cmd_image_list, cmd_image_restore};
pub use install::cmd_install;
pub use list::cmd_list;
pub use network::cmd_network;
pub use prune::cmd_prune;
pub use remove::{cmd_reinstall, cmd_remove, cmd_repair};
pub use run::cmd_run;
pub use upgrade::cmd_upgrade;

use anyhow::anyhow;
use appbox_lib::collab::Collaborators;
use appbox_lib::collab::integrate::HostIntegrator;
use appbox_lib::collab::podman::Podman;
use appbox_lib::collab::registry::LocalRegistry;
use appbox_lib::ops::{Ops, OpsError};

/// Build the production collaborator set and run `f` against it.
pub(crate) fn with_ops<T>(f: impl FnOnce(&Ops<'_>) -> Result<T, OpsError>) -> anyhow::Result<T> {
  let podman = Podman::new();
  let integrator = HostIntegrator::new();
  let registry = LocalRegistry::new();

  let ops = Ops::new(Collaborators {
    engine: &podman,
    integrator: &integrator,
    registry: &registry,
  });

  f(&ops).map_err(render)
}

/// Attach a remediation hint to execution failures; the reconciler has
/// already marked the application as needing apply.
pub(crate) fn render(err: OpsError) -> anyhow::Error {
  if let OpsError::Reconcile(inner) = &err
    && let Some(phase) = inner.phase()
  {
    return anyhow!("{err}\nThe {phase} step did not complete; fix the cause and re-run 'appbox apply'.");
  }
  anyhow::Error::new(err)
}
