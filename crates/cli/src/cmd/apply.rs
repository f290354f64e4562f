//! Implementation of the `appbox apply` command.

use anyhow::Result;

use appbox_lib::plan::ActionPlan;

use super::with_ops;
use crate::output;

/// Human-readable summary of what a plan did.
pub(crate) fn describe(plan: ActionPlan) -> String {
  let mut actions = Vec::new();
  if plan.rebuild {
    actions.push("rebuilt image");
  }
  if plan.recreate {
    actions.push("recreated container");
  }
  if plan.reintegrate {
    actions.push("refreshed desktop integration");
  }
  actions.join(", ")
}

pub fn cmd_apply(name: &str) -> Result<()> {
  let plan = with_ops(|ops| ops.apply(name))?;

  if plan.is_noop() {
    output::note(&format!("'{name}' is up to date"));
  } else {
    output::success(&format!("'{name}' reconciled: {}", describe(plan)));
  }
  Ok(())
}
