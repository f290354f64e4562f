//! Implementation of the `appbox configure` command.

use anyhow::Result;

use super::with_ops;
use crate::output;

pub fn cmd_configure(name: &str, updates: &[String]) -> Result<()> {
  let edits = with_ops(|ops| ops.configure(name, updates))?;

  for edit in &edits {
    println!("  {} {}", output::symbols::ARROW, edit.path);
  }
  output::success(&format!("updated {} setting(s)", edits.len()));
  output::note(&format!("run 'appbox apply {name}' to reconcile"));
  Ok(())
}
