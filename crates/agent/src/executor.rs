// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One task, one frame stream.
//!
//! The executor owns the task-scoped workdir, runs the interpreter with
//! streamed output, collects declared artifacts, and always terminates the
//! stream with exactly one `Final` frame.

use sloth_adapters::{Bindings, Interpreter, InterpreterError, IoSinks};
use sloth_core::{TaskError, TaskErrorKind, TaskScript};
use sloth_proto::{Frame, TaskEnvelope};
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Artifact bytes per `ArtifactChunk` frame (64 KiB).
pub const ARTIFACT_CHUNK_SIZE: usize = 64 * 1024;

/// Executes envelopes on behalf of the task server.
#[derive(Clone)]
pub struct TaskExecutor<I> {
    interpreter: I,
    work_root: PathBuf,
    cancel_grace: Duration,
}

impl<I: Interpreter> TaskExecutor<I> {
    pub fn new(interpreter: I, work_root: impl Into<PathBuf>, cancel_grace: Duration) -> Self {
        Self {
            interpreter,
            work_root: work_root.into(),
            cancel_grace,
        }
    }

    /// Run one envelope, emitting frames until the terminal `Final`.
    ///
    /// The frame channel is bounded: when the master stops reading, the
    /// executor (and through it the interpreter) blocks producing more.
    pub async fn execute(
        &self,
        envelope: TaskEnvelope,
        frames: mpsc::Sender<Frame>,
        cancel: CancellationToken,
    ) {
        let started = Instant::now();
        let final_frame = self.execute_inner(&envelope, &frames, cancel, started).await;
        let _ = frames.send(final_frame).await;
    }

    async fn execute_inner(
        &self,
        envelope: &TaskEnvelope,
        frames: &mpsc::Sender<Frame>,
        cancel: CancellationToken,
        started: Instant,
    ) -> Frame {
        let elapsed = |s: Instant| s.elapsed().as_millis() as u64;

        let (workdir, ephemeral) = match self.prepare_workdir(envelope).await {
            Ok(pair) => pair,
            Err(message) => {
                return Frame::failed(
                    TaskError::new(TaskErrorKind::InterpreterStartFailed, message),
                    elapsed(started),
                );
            }
        };

        let result = self
            .run_script(envelope, &workdir, frames, cancel, started)
            .await;

        if ephemeral {
            if let Err(e) = tokio::fs::remove_dir_all(&workdir).await {
                debug!(workdir = %workdir.display(), error = %e, "workdir cleanup failed");
            }
        }
        result
    }

    async fn run_script(
        &self,
        envelope: &TaskEnvelope,
        workdir: &Path,
        frames: &mpsc::Sender<Frame>,
        cancel: CancellationToken,
        started: Instant,
    ) -> Frame {
        let elapsed = |s: Instant| s.elapsed().as_millis() as u64;

        // Materialize script source for auditability; command strings run
        // as-is.
        if let TaskScript::Source(source) = &envelope.script {
            let script_path = workdir.join(format!(".task-{}.script", envelope.task_id.short(8)));
            if let Err(e) = tokio::fs::write(&script_path, source).await {
                return Frame::failed(
                    TaskError::new(
                        TaskErrorKind::InterpreterStartFailed,
                        format!("cannot write script file: {}", e),
                    ),
                    elapsed(started),
                );
            }
        }

        let bindings = Bindings {
            params: envelope.params.clone(),
            deps: envelope
                .deps
                .iter()
                .map(|(name, dep)| {
                    (
                        name.clone(),
                        serde_json::to_value(dep).unwrap_or(serde_json::Value::Null),
                    )
                })
                .collect(),
            env: envelope.env.clone(),
            workdir: Some(workdir.to_path_buf()),
        };

        // Forward interpreter output as it arrives.
        let (stdout_tx, stdout_rx) = mpsc::channel::<Vec<u8>>(8);
        let (stderr_tx, stderr_rx) = mpsc::channel::<Vec<u8>>(8);
        let stdout_pump = tokio::spawn(pump_stream(stdout_rx, frames.clone(), false));
        let stderr_pump = tokio::spawn(pump_stream(stderr_rx, frames.clone(), true));

        let deadline = Duration::from_millis(envelope.timeout_ms);
        let child_cancel = cancel.child_token();
        let evaluation = self.interpreter.evaluate_script(
            &envelope.script,
            bindings,
            IoSinks {
                stdout: stdout_tx,
                stderr: stderr_tx,
            },
            child_cancel.clone(),
        );
        tokio::pin!(evaluation);

        enum Ended {
            Finished(Result<sloth_adapters::ScriptOutcome, InterpreterError>),
            TimedOut,
            Cancelled,
        }

        let ended = tokio::select! {
            result = &mut evaluation => Ended::Finished(result),
            _ = tokio::time::sleep(deadline) => Ended::TimedOut,
            _ = cancel.cancelled() => Ended::Cancelled,
        };

        let outcome = match ended {
            Ended::Finished(result) => result,
            Ended::TimedOut => {
                warn!(task = %envelope.task_id, "deadline reached, terminating");
                child_cancel.cancel();
                let _ = tokio::time::timeout(self.cancel_grace, &mut evaluation).await;
                // The evaluation may still hold the sinks; abandon the pumps.
                stdout_pump.abort();
                stderr_pump.abort();
                return Frame::failed(
                    TaskError::timeout(envelope.timeout_ms),
                    elapsed(started),
                );
            }
            Ended::Cancelled => {
                debug!(task = %envelope.task_id, "cancel requested, terminating");
                child_cancel.cancel();
                let _ = tokio::time::timeout(self.cancel_grace, &mut evaluation).await;
                stdout_pump.abort();
                stderr_pump.abort();
                return Frame::failed(TaskError::cancelled(), elapsed(started));
            }
        };

        // Interpreter is done; drain the pumps so output frames precede
        // artifacts and Final.
        let _ = stdout_pump.await;
        let _ = stderr_pump.await;

        let script = match outcome {
            Ok(script) => script,
            Err(e) => {
                let kind = match &e {
                    InterpreterError::StartFailed(_) | InterpreterError::Unsupported(_) => {
                        TaskErrorKind::InterpreterStartFailed
                    }
                    InterpreterError::Exception(_) => TaskErrorKind::InterpreterException,
                    InterpreterError::Cancelled => TaskErrorKind::Cancelled,
                };
                return Frame::failed(TaskError::new(kind, e.to_string()), elapsed(started));
            }
        };

        if !script.success {
            let error = if script.exit_code != 0 {
                TaskError::non_zero_exit(script.exit_code)
            } else {
                TaskError::new(TaskErrorKind::InterpreterException, script.message.clone())
            };
            return Frame::Final {
                exit_code: script.exit_code,
                duration_ms: elapsed(started),
                outputs: script.outputs,
                error: Some(error),
            };
        }

        if let Err(error) = self
            .stream_artifacts(workdir, &envelope.artifacts, frames)
            .await
        {
            return Frame::failed(error, elapsed(started));
        }

        Frame::Final {
            exit_code: script.exit_code,
            duration_ms: elapsed(started),
            outputs: script.outputs,
            error: None,
        }
    }

    /// Returns the workdir and whether this execution owns (and removes) it.
    async fn prepare_workdir(
        &self,
        envelope: &TaskEnvelope,
    ) -> Result<(PathBuf, bool), String> {
        let (workdir, ephemeral) = match &envelope.workdir {
            Some(dir) => (PathBuf::from(dir), false),
            None => (self.work_root.join(envelope.task_id.as_str()), true),
        };
        tokio::fs::create_dir_all(&workdir)
            .await
            .map_err(|e| format!("cannot create workdir {}: {}", workdir.display(), e))?;

        for (name, bytes) in &envelope.inputs {
            let relative = sanitize(name)?;
            let path = workdir.join(relative);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| format!("cannot create input dir: {}", e))?;
            }
            tokio::fs::write(&path, bytes)
                .await
                .map_err(|e| format!("cannot write input '{}': {}", name, e))?;
        }
        Ok((workdir, ephemeral))
    }

    /// Match declared patterns and stream every hit as contiguous chunks.
    async fn stream_artifacts(
        &self,
        workdir: &Path,
        patterns: &[String],
        frames: &mpsc::Sender<Frame>,
    ) -> Result<(), TaskError> {
        if patterns.is_empty() {
            return Ok(());
        }

        let names = workdir_files(workdir).map_err(|e| {
            TaskError::new(
                TaskErrorKind::ArtifactMissing,
                format!("cannot scan workdir: {}", e),
            )
        })?;

        for pattern in patterns {
            let matcher = glob::Pattern::new(pattern).map_err(|e| {
                TaskError::new(
                    TaskErrorKind::ArtifactMissing,
                    format!("bad artifact pattern '{}': {}", pattern, e),
                )
            })?;
            let matched: Vec<&String> = names.iter().filter(|n| matcher.matches(n)).collect();
            if matched.is_empty() {
                return Err(TaskError::new(
                    TaskErrorKind::ArtifactMissing,
                    format!("no files matched '{}'", pattern),
                ));
            }

            for name in matched {
                let bytes = tokio::fs::read(workdir.join(name)).await.map_err(|e| {
                    TaskError::new(
                        TaskErrorKind::ArtifactMissing,
                        format!("cannot read artifact '{}': {}", name, e),
                    )
                })?;
                let mut offset = 0u64;
                for chunk in bytes.chunks(ARTIFACT_CHUNK_SIZE) {
                    let frame = Frame::ArtifactChunk {
                        name: name.clone(),
                        offset,
                        data: chunk.to_vec(),
                    };
                    if frames.send(frame).await.is_err() {
                        return Err(TaskError::new(
                            TaskErrorKind::ConnectionLost,
                            "frame stream closed while sending artifacts",
                        ));
                    }
                    offset += chunk.len() as u64;
                }
                // Zero-byte artifacts still announce themselves.
                if bytes.is_empty() {
                    let _ = frames
                        .send(Frame::ArtifactChunk {
                            name: name.clone(),
                            offset: 0,
                            data: Vec::new(),
                        })
                        .await;
                }
            }
        }
        Ok(())
    }
}

/// Forward one interpreter output stream into the frame channel.
async fn pump_stream(
    mut rx: mpsc::Receiver<Vec<u8>>,
    frames: mpsc::Sender<Frame>,
    is_stderr: bool,
) {
    while let Some(data) = rx.recv().await {
        let frame = if is_stderr {
            Frame::Stderr { data }
        } else {
            Frame::Stdout { data }
        };
        if frames.send(frame).await.is_err() {
            return;
        }
    }
}

fn sanitize(name: &str) -> Result<&Path, String> {
    let path = Path::new(name);
    let ok = !name.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if ok {
        Ok(path)
    } else {
        Err(format!("illegal input name: {name:?}"))
    }
}

/// Files under the workdir, relative, `/`-separated, scripts excluded.
fn workdir_files(base: &Path) -> std::io::Result<Vec<String>> {
    let mut names = Vec::new();
    let mut stack = vec![base.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if let Ok(relative) = path.strip_prefix(base) {
                let name = relative.to_string_lossy().replace('\\', "/");
                if !name.starts_with(".task-") {
                    names.push(name);
                }
            }
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
