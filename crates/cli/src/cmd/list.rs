//! Implementation of the `appbox list` command.

use anyhow::Result;

use appbox_lib::state::InstallationStatus;

use super::with_ops;
use crate::output;

pub fn cmd_list() -> Result<()> {
  let rows = with_ops(|ops| ops.list())?;

  if rows.is_empty() {
    output::note("no applications installed");
    return Ok(());
  }

  println!(
    "{:<24} {:<16} {:<22} {:<14} {:<10}",
    "CONTAINER", "APP", "IMAGE", "STATUS", "STATE"
  );
  for row in &rows {
    let status = match row.status {
      InstallationStatus::Installed => "installed",
      InstallationStatus::NotInstalled => "not installed",
    };
    let state = row.instance.map(|s| s.as_str()).unwrap_or("unknown");
    let dirty = if row.needs_apply { " (needs apply)" } else { "" };

    println!(
      "{:<24} {:<16} {:<22} {:<14} {:<10}{dirty}",
      row.container_name, row.app_name, row.base_image, status, state
    );
  }
  Ok(())
}
