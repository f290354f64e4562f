//! Implementation of the `appbox install` command.

use std::path::Path;

use anyhow::Result;

use appbox_lib::ops::InstallOutcome;

use super::with_ops;
use crate::output;

pub fn cmd_install(config: &Path) -> Result<()> {
  match with_ops(|ops| ops.install(config))? {
    InstallOutcome::Installed => output::success("application installed"),
    InstallOutcome::AlreadyInstalled => output::note("already installed with this configuration, nothing to do"),
  }
  Ok(())
}
