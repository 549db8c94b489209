// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command-string interpreter.
//!
//! Runs `command` tasks through `bash -c` and shell guard predicates via
//! exit-code truth. Script-source tasks belong to whatever embedded
//! interpreter the deployment plugs in; this adapter refuses them.

use crate::interpreter::{
    Bindings, Interpreter, InterpreterError, IoSinks, ScriptOutcome, OUTPUT_CHUNK_SIZE,
};
use crate::process::terminate_group;
use crate::subprocess::{run_with_timeout, shell_command, GUARD_TIMEOUT};
use async_trait::async_trait;
use sloth_core::{OutputTable, TaskScript};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Interpreter for command-string tasks.
#[derive(Clone)]
pub struct CommandInterpreter {
    cancel_grace: Duration,
}

impl CommandInterpreter {
    pub fn new() -> Self {
        Self {
            cancel_grace: Duration::from_secs(5),
        }
    }

    pub fn with_cancel_grace(cancel_grace: Duration) -> Self {
        Self { cancel_grace }
    }
}

impl Default for CommandInterpreter {
    fn default() -> Self {
        Self::new()
    }
}

/// Forward a child stream to a sink in bounded chunks.
async fn pump<R: AsyncReadExt + Unpin>(mut reader: R, sink: mpsc::Sender<Vec<u8>>) {
    let mut buf = vec![0u8; OUTPUT_CHUNK_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                // A dropped receiver just discards output.
                if sink.send(buf[..n].to_vec()).await.is_err() {
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl Interpreter for CommandInterpreter {
    async fn evaluate_script(
        &self,
        script: &TaskScript,
        bindings: Bindings,
        sinks: IoSinks,
        cancel: CancellationToken,
    ) -> Result<ScriptOutcome, InterpreterError> {
        let TaskScript::Command(command) = script else {
            return Err(InterpreterError::Unsupported(
                "script source requires an embedded interpreter".into(),
            ));
        };

        let mut cmd = shell_command(command);
        cmd.envs(&bindings.env);
        if let Some(workdir) = &bindings.workdir {
            cmd.current_dir(workdir);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| InterpreterError::StartFailed(e.to_string()))?;

        let stdout_pump = child
            .stdout
            .take()
            .map(|out| tokio::spawn(pump(out, sinks.stdout)));
        let stderr_pump = child
            .stderr
            .take()
            .map(|err| tokio::spawn(pump(err, sinks.stderr)));

        let status = tokio::select! {
            status = child.wait() => {
                status.map_err(|e| InterpreterError::Exception(e.to_string()))?
            }
            _ = cancel.cancelled() => {
                debug!(%command, "cancelling shell task");
                terminate_group(&mut child, self.cancel_grace).await;
                if let Some(pump) = stdout_pump { pump.abort(); }
                if let Some(pump) = stderr_pump { pump.abort(); }
                return Err(InterpreterError::Cancelled);
            }
        };

        // Drain remaining buffered output before reporting.
        if let Some(pump) = stdout_pump {
            let _ = pump.await;
        }
        if let Some(pump) = stderr_pump {
            let _ = pump.await;
        }

        let exit_code = status.code().unwrap_or(-1);
        Ok(ScriptOutcome {
            success: status.success(),
            message: if status.success() {
                String::new()
            } else {
                format!("exit code {}", exit_code)
            },
            outputs: OutputTable::new(),
            exit_code,
        })
    }

    async fn evaluate_guard(
        &self,
        guard: &TaskScript,
        bindings: &Bindings,
    ) -> Result<bool, InterpreterError> {
        let TaskScript::Command(command) = guard else {
            return Err(InterpreterError::Unsupported(
                "guard closures require an embedded interpreter".into(),
            ));
        };

        let mut cmd = shell_command(command);
        cmd.envs(&bindings.env);
        if let Some(workdir) = &bindings.workdir {
            cmd.current_dir(workdir);
        }

        let output = run_with_timeout(cmd, GUARD_TIMEOUT, "guard predicate")
            .await
            .map_err(InterpreterError::StartFailed)?;
        Ok(output.status.success())
    }
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;
