// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-group termination with signal escalation.
//!
//! Children are spawned in their own process group so that shell pipelines
//! and grandchildren die with them. Escalation ladder: SIGINT, SIGTERM,
//! SIGKILL, with a slice of the grace window between rungs.

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::time::Duration;
use tokio::process::Child;
use tracing::debug;

/// Send a signal to an entire process group. Best-effort: a group that
/// already exited is not an error.
pub fn signal_group(pgid: u32, signal: Signal) -> bool {
    match killpg(Pid::from_raw(pgid as i32), signal) {
        Ok(()) => true,
        Err(nix::errno::Errno::ESRCH) => false,
        Err(e) => {
            debug!(pgid, %signal, error = %e, "killpg failed");
            false
        }
    }
}

/// Terminate a child's process group within `grace`, escalating
/// SIGINT → SIGTERM → SIGKILL. Returns the exit code if the child was
/// reaped.
pub async fn terminate_group(child: &mut Child, grace: Duration) -> Option<i32> {
    let Some(pid) = child.id() else {
        // Already reaped.
        return child.try_wait().ok().flatten().and_then(|s| s.code());
    };

    let rung = grace / 3;
    for signal in [Signal::SIGINT, Signal::SIGTERM] {
        signal_group(pid, signal);
        if let Ok(Ok(status)) = tokio::time::timeout(rung, child.wait()).await {
            return status.code();
        }
    }

    signal_group(pid, Signal::SIGKILL);
    match tokio::time::timeout(rung, child.wait()).await {
        Ok(Ok(status)) => status.code(),
        _ => None,
    }
}

#[cfg(test)]
#[path = "process_tests.rs"]
mod tests;
