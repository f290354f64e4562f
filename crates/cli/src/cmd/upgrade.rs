//! Implementation of the `appbox upgrade` command.

use anyhow::Result;

use super::with_ops;
use crate::output;

pub fn cmd_upgrade(name: &str) -> Result<()> {
  with_ops(|ops| ops.upgrade(name))?;
  output::success(&format!("'{name}' packages upgraded; new image backed up to the registry"));
  Ok(())
}
