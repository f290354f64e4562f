//! Implementation of the `appbox run` command.

use anyhow::Result;

use super::with_ops;

/// Returns the exit code of the command run inside the container.
pub fn cmd_run(name: &str, command: &[String]) -> Result<i32> {
  with_ops(|ops| ops.run(name, command))
}
