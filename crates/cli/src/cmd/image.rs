//! Implementation of the `appbox image` subcommands.

use anyhow::Result;

use super::with_ops;
use crate::output;

pub fn cmd_image_list() -> Result<()> {
  let repositories = with_ops(|ops| ops.backup_catalog())?;

  if repositories.is_empty() {
    output::note("no images in the backup registry");
    return Ok(());
  }

  for name in &repositories {
    println!("{name}");
  }
  Ok(())
}

pub fn cmd_image_restore(name: &str) -> Result<()> {
  with_ops(|ops| ops.restore(name))?;
  output::success(&format!("'{name}' restored from the backup registry"));
  Ok(())
}

pub fn cmd_image_gc(dry_run: bool) -> Result<()> {
  let report = with_ops(|ops| ops.backup_gc(dry_run))?;

  if !report.is_empty() {
    println!("{report}");
  }
  if dry_run {
    output::note("dry run, nothing was deleted");
  } else {
    output::success("registry garbage collection finished");
  }
  Ok(())
}
