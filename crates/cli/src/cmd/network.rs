//! Implementation of the `appbox network` command.

use anyhow::Result;

use appbox_lib::ops::NetworkOutcome;

use super::apply::describe;
use super::with_ops;
use crate::output;

pub fn cmd_network(name: &str, allow: bool) -> Result<()> {
  let setting = if allow { "allowed" } else { "denied" };

  match with_ops(|ops| ops.set_network(name, allow))? {
    NetworkOutcome::Unchanged => output::note(&format!("network already {setting} for '{name}'")),
    NetworkOutcome::Applied(plan) => {
      output::success(&format!("network {setting} for '{name}': {}", describe(plan)));
    }
  }
  Ok(())
}
