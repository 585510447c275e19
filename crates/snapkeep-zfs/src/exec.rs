//! Synchronous command execution shared by the zfs/zpool wrappers.

use crate::error::{ZfsError, ZfsResult};
use std::process::Command;
use tracing::debug;

/// Run a command to completion and return its stdout.
///
/// Non-zero exit is an error carrying the captured stderr.
pub(crate) fn run(program: &str, args: &[&str]) -> ZfsResult<String> {
    let rendered = format!("{program} {}", args.join(" "));
    debug!(command = %rendered, "running");

    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|source| ZfsError::Spawn {
            command: rendered.clone(),
            source,
        })?;

    if !output.status.success() {
        return Err(ZfsError::CommandFailed {
            command: rendered,
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        });
    }

    String::from_utf8(output.stdout).map_err(|_| ZfsError::InvalidOutput { command: rendered })
}
