//! Implementations of `appbox remove`, `appbox reinstall`, and
//! `appbox repair`.

use anyhow::Result;

use super::with_ops;
use crate::output;

pub fn cmd_remove(name: &str, purge: bool) -> Result<()> {
  with_ops(|ops| ops.remove(name, purge))?;

  if purge {
    output::success(&format!("'{name}' purged, including home directory and registry backup"));
  } else {
    output::success(&format!("'{name}' removed"));
    output::note("configuration and home directory kept; 'install' the same config to get it back");
  }
  Ok(())
}

pub fn cmd_reinstall(name: &str, config: Option<&std::path::Path>) -> Result<()> {
  with_ops(|ops| ops.reinstall(name, config))?;
  output::success(&format!("'{name}' rebuilt from its stored configuration"));
  Ok(())
}

pub fn cmd_repair(name: &str) -> Result<()> {
  with_ops(|ops| ops.repair(name))?;
  output::success(&format!("'{name}' repaired: container recreated from the existing image"));
  Ok(())
}
