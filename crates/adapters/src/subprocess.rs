// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subprocess execution helpers.

use std::process::Output;
use std::time::Duration;
use tokio::process::Command;

/// Default timeout for guard predicate evaluation.
pub const GUARD_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for hook script invocations.
pub const HOOK_TIMEOUT: Duration = Duration::from_secs(30);

/// Environment variables a child inherits from the agent process.
///
/// Everything else comes from the caller-supplied map in the envelope.
pub const ENV_ALLOWLIST: &[&str] = &[
    "PATH", "HOME", "USER", "SHELL", "LANG", "LC_ALL", "TERM", "TMPDIR",
];

/// Run a subprocess with a timeout.
///
/// Wraps `Command::output()` with `tokio::time::timeout`, converting
/// expiration into a descriptive error. The child is killed by tokio's
/// `Child` drop when the timeout elapses.
pub async fn run_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    description: &str,
) -> Result<Output, String> {
    cmd.kill_on_drop(true);
    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(io_err)) => Err(format!("{} failed: {}", description, io_err)),
        Err(_elapsed) => Err(format!(
            "{} timed out after {}s",
            description,
            timeout.as_secs()
        )),
    }
}

/// A `bash -c` command with the strict-mode preamble, allowlisted
/// environment, and its own process group.
pub fn shell_command(script: &str) -> Command {
    let wrapped = format!("set -euo pipefail\n{script}");
    let mut cmd = Command::new("bash");
    cmd.arg("-c").arg(wrapped);
    cmd.env_clear();
    for key in ENV_ALLOWLIST {
        if let Ok(value) = std::env::var(key) {
            cmd.env(key, value);
        }
    }
    cmd.process_group(0);
    cmd
}

#[cfg(test)]
#[path = "subprocess_tests.rs"]
mod tests;
