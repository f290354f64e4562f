//! Implementation of the `appbox prune` command.

use anyhow::Result;

use super::with_ops;
use crate::output;

pub fn cmd_prune(force: bool) -> Result<()> {
  if !force {
    output::warning("this deletes every podman container, image, and volume not managed by appbox");
    output::note("re-run with --force to proceed");
    return Ok(());
  }

  let report = with_ops(|ops| ops.prune())?;
  if !report.is_empty() {
    println!("{report}");
  }
  output::success("unmanaged podman data pruned");
  Ok(())
}
