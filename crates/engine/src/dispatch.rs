// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task dispatch: one envelope, one attempt, one outcome.
//!
//! [`LocalDispatcher`] runs the envelope in-process through the interpreter.
//! [`RemoteDispatcher`] ships it to an agent over the wire protocol and
//! reassembles the frame stream. [`ExecRouter`] picks the path from the
//! resolved endpoint. The scheduler only sees [`AttemptOutcome`]s.

use crate::artifacts::relative_files;
use crate::resolver::Endpoint;
use async_trait::async_trait;
use sloth_adapters::{Bindings, Interpreter, InterpreterError, IoSinks};
use sloth_core::{OutputTable, TaskError, TaskErrorKind};
use sloth_proto::{
    auth_digest, read_msg, write_msg, AgentReply, Frame, Hello, HelloReply, MasterToAgent,
    TaskEnvelope, DEFAULT_IO_TIMEOUT, PROTOCOL_VERSION,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Result of one execution attempt.
#[derive(Debug, Default)]
pub struct AttemptOutcome {
    pub exit_code: i32,
    pub duration_ms: u64,
    pub outputs: OutputTable,
    /// `None` means the attempt succeeded.
    pub error: Option<TaskError>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Collected artifacts, name → bytes.
    pub artifacts: Vec<(String, Vec<u8>)>,
}

impl AttemptOutcome {
    pub fn failed(error: TaskError, duration_ms: u64) -> Self {
        Self {
            exit_code: -1,
            duration_ms,
            error: Some(error),
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Executes one envelope against a resolved endpoint.
#[async_trait]
pub trait Dispatcher: Send + Sync + 'static {
    async fn execute(
        &self,
        endpoint: &Endpoint,
        envelope: TaskEnvelope,
        cancel: CancellationToken,
    ) -> AttemptOutcome;
}

// ── local execution ──────────────────────────────────────────────────────

/// Runs envelopes in-process through the interpreter.
#[derive(Clone)]
pub struct LocalDispatcher<I> {
    interpreter: I,
    /// Root for task-scoped workdirs when the envelope names none.
    work_root: PathBuf,
}

impl<I: Interpreter> LocalDispatcher<I> {
    pub fn new(interpreter: I, work_root: impl Into<PathBuf>) -> Self {
        Self {
            interpreter,
            work_root: work_root.into(),
        }
    }

    async fn run(&self, envelope: TaskEnvelope, cancel: CancellationToken) -> AttemptOutcome {
        let started = Instant::now();
        let elapsed_ms = |s: Instant| s.elapsed().as_millis() as u64;

        // Task-scoped workdirs are ephemeral; a caller-named workdir is not.
        let ephemeral = envelope.workdir.is_none();
        let workdir = match self.prepare_workdir(&envelope).await {
            Ok(dir) => dir,
            Err(e) => {
                return AttemptOutcome::failed(
                    TaskError::new(TaskErrorKind::InterpreterStartFailed, e),
                    elapsed_ms(started),
                );
            }
        };

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
            workdir: Some(workdir.clone()),
        };

        let (stdout_tx, stdout_rx) = mpsc::channel(64);
        let (stderr_tx, stderr_rx) = mpsc::channel(64);
        let stdout_buf = tokio::spawn(collect(stdout_rx));
        let stderr_buf = tokio::spawn(collect(stderr_rx));

        let result = self
            .interpreter
            .evaluate_script(
                &envelope.script,
                bindings,
                IoSinks {
                    stdout: stdout_tx,
                    stderr: stderr_tx,
                },
                cancel,
            )
            .await;

        let stdout = stdout_buf.await.unwrap_or_default();
        let stderr = stderr_buf.await.unwrap_or_default();

        let mut outcome = match result {
            Ok(script) => {
                let error = if script.success {
                    None
                } else if script.exit_code != 0 {
                    Some(TaskError::non_zero_exit(script.exit_code))
                } else {
                    Some(TaskError::new(
                        TaskErrorKind::InterpreterException,
                        script.message.clone(),
                    ))
                };
                AttemptOutcome {
                    exit_code: script.exit_code,
                    duration_ms: elapsed_ms(started),
                    outputs: script.outputs,
                    error,
                    stdout,
                    stderr,
                    artifacts: Vec::new(),
                }
            }
            Err(e) => {
                let mut failed =
                    AttemptOutcome::failed(interpreter_error(e), elapsed_ms(started));
                failed.stdout = stdout;
                failed.stderr = stderr;
                failed
            }
        };

        if outcome.is_success() {
            match collect_artifacts(&workdir, &envelope.artifacts).await {
                Ok(artifacts) => outcome.artifacts = artifacts,
                Err(e) => outcome.error = Some(e),
            }
        }

        if ephemeral {
            if let Err(e) = tokio::fs::remove_dir_all(&workdir).await {
                debug!(workdir = %workdir.display(), error = %e, "workdir cleanup failed");
            }
        }
        outcome
    }

    async fn prepare_workdir(&self, envelope: &TaskEnvelope) -> Result<PathBuf, String> {
        let workdir = match &envelope.workdir {
            Some(dir) => PathBuf::from(dir),
            None => self
                .work_root
                .join(envelope.workflow_id.as_str())
                .join(envelope.task_id.as_str()),
        };
        tokio::fs::create_dir_all(&workdir)
            .await
            .map_err(|e| format!("cannot create workdir {}: {}", workdir.display(), e))?;

        // Consumed artifacts are materialized before the script runs.
        for (name, bytes) in &envelope.inputs {
            let path = workdir.join(name);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| format!("cannot create input dir: {}", e))?;
            }
            tokio::fs::write(&path, bytes)
                .await
                .map_err(|e| format!("cannot write input {}: {}", name, e))?;
        }
        Ok(workdir)
    }
}

async fn collect(mut rx: mpsc::Receiver<Vec<u8>>) -> Vec<u8> {
    let mut all = Vec::new();
    while let Some(chunk) = rx.recv().await {
        all.extend(chunk);
    }
    all
}

fn interpreter_error(e: InterpreterError) -> TaskError {
    let kind = match &e {
        InterpreterError::StartFailed(_) | InterpreterError::Unsupported(_) => {
            TaskErrorKind::InterpreterStartFailed
        }
        InterpreterError::Exception(_) => TaskErrorKind::InterpreterException,
        InterpreterError::Cancelled => TaskErrorKind::Cancelled,
    };
    TaskError::new(kind, e.to_string())
}

/// Match each declared pattern against the workdir tree. A pattern that
/// matches nothing fails the task.
async fn collect_artifacts(
    workdir: &Path,
    patterns: &[String],
) -> Result<Vec<(String, Vec<u8>)>, TaskError> {
    let mut collected = Vec::new();
    if patterns.is_empty() {
        return Ok(collected);
    }

    let names = relative_files(workdir).map_err(|e| {
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
                    format!("cannot read artifact {}: {}", name, e),
                )
            })?;
            collected.push((name.clone(), bytes));
        }
    }
    Ok(collected)
}

// ── remote execution ─────────────────────────────────────────────────────

/// Ships envelopes to agents over the wire protocol.
#[derive(Clone)]
pub struct RemoteDispatcher {
    token: String,
    connect_timeout: Duration,
    cancel_grace: Duration,
}

impl RemoteDispatcher {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            connect_timeout: Duration::from_secs(5),
            cancel_grace: Duration::from_secs(5),
        }
    }

    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }

    async fn run(
        &self,
        address: &str,
        token: Option<&str>,
        envelope: TaskEnvelope,
        cancel: CancellationToken,
    ) -> AttemptOutcome {
        let started = Instant::now();
        let elapsed_ms = |s: Instant| s.elapsed().as_millis() as u64;
        let digest = auth_digest(token.unwrap_or(&self.token));

        match self
            .stream_task(address, &digest, envelope, cancel)
            .await
        {
            Ok(outcome) => outcome,
            Err(error) => AttemptOutcome::failed(error, elapsed_ms(started)),
        }
    }

    async fn stream_task(
        &self,
        address: &str,
        digest: &str,
        envelope: TaskEnvelope,
        cancel: CancellationToken,
    ) -> Result<AttemptOutcome, TaskError> {
        let task_id = envelope.task_id.clone();
        let frame_deadline =
            Duration::from_millis(envelope.timeout_ms) + 2 * self.cancel_grace;

        let mut stream = connect(address, self.connect_timeout, digest).await?;

        write_msg(
            &mut stream,
            &MasterToAgent::Execute { envelope },
            DEFAULT_IO_TIMEOUT,
        )
        .await
        .map_err(transport_lost)?;

        let admission: AgentReply = read_msg(&mut stream, DEFAULT_IO_TIMEOUT)
            .await
            .map_err(transport_lost)?;
        match admission {
            AgentReply::Accepted => {}
            AgentReply::Busy => {
                return Err(TaskError::new(
                    TaskErrorKind::AgentBusy,
                    format!("agent {} at capacity", address),
                ));
            }
            AgentReply::CancelOk => {
                return Err(transport_protocol_error("unexpected cancel ack"));
            }
            AgentReply::Err { message } => {
                return Err(TaskError::new(
                    TaskErrorKind::InterpreterStartFailed,
                    message,
                ));
            }
        }

        // Cancellation goes out-of-band on a fresh connection so the frame
        // stream stays byte-aligned; the agent answers with a terminal
        // Final(cancelled) on this stream.
        let cancel_watcher = {
            let cancel = cancel.clone();
            let address = address.to_string();
            let digest = digest.to_string();
            let task_id = task_id.clone();
            let connect_timeout = self.connect_timeout;
            tokio::spawn(async move {
                cancel.cancelled().await;
                send_cancel(&address, &digest, &task_id, connect_timeout).await;
            })
        };

        let result = self
            .read_frames(&mut stream, &task_id, frame_deadline)
            .await;
        cancel_watcher.abort();
        result
    }

    async fn read_frames(
        &self,
        stream: &mut TcpStream,
        task_id: &sloth_core::TaskId,
        frame_deadline: Duration,
    ) -> Result<AttemptOutcome, TaskError> {
        let mut outcome = AttemptOutcome::default();
        let mut artifact_bufs: BTreeMap<String, Vec<u8>> = BTreeMap::new();

        loop {
            let frame: Frame = read_msg(stream, frame_deadline)
                .await
                .map_err(transport_lost)?;

            match frame {
                Frame::Stdout { data } => outcome.stdout.extend(data),
                Frame::Stderr { data } => outcome.stderr.extend(data),
                Frame::Progress { message } => {
                    debug!(task = %task_id, %message, "progress");
                }
                Frame::ArtifactChunk { name, offset, data } => {
                    let buf = artifact_bufs.entry(name.clone()).or_default();
                    if buf.len() as u64 != offset {
                        return Err(transport_protocol_error(&format!(
                            "non-contiguous chunk for artifact '{}'",
                            name
                        )));
                    }
                    buf.extend(data);
                }
                Frame::Final {
                    exit_code,
                    duration_ms,
                    outputs,
                    error,
                } => {
                    outcome.exit_code = exit_code;
                    outcome.duration_ms = duration_ms;
                    outcome.outputs = outputs;
                    outcome.error = error;
                    outcome.artifacts = artifact_bufs.into_iter().collect();
                    return Ok(outcome);
                }
            }
        }
    }
}

async fn connect(
    address: &str,
    connect_timeout: Duration,
    digest: &str,
) -> Result<TcpStream, TaskError> {
    let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(address))
        .await
        .map_err(|_| {
            TaskError::new(
                TaskErrorKind::ConnectionLost,
                format!("connect to {} timed out", address),
            )
        })?
        .map_err(|e| {
            TaskError::new(
                TaskErrorKind::ConnectionLost,
                format!("connect to {} failed: {}", address, e),
            )
        })?;

    let mut stream = stream;
    write_msg(
        &mut stream,
        &Hello {
            version: PROTOCOL_VERSION,
            auth_digest: digest.to_string(),
        },
        DEFAULT_IO_TIMEOUT,
    )
    .await
    .map_err(transport_lost)?;

    let reply: HelloReply = read_msg(&mut stream, DEFAULT_IO_TIMEOUT)
        .await
        .map_err(transport_lost)?;
    match reply {
        HelloReply::Ok { version } if version == PROTOCOL_VERSION => Ok(stream),
        HelloReply::Ok { version } => Err(transport_protocol_error(&format!(
            "protocol version mismatch: agent {}, master {}",
            version, PROTOCOL_VERSION
        ))),
        HelloReply::Denied { reason } => {
            Err(TaskError::new(TaskErrorKind::CredentialRejected, reason))
        }
    }
}

/// Open a fresh connection and deliver a cancel request. Best-effort.
async fn send_cancel(
    address: &str,
    digest: &str,
    task_id: &sloth_core::TaskId,
    connect_timeout: Duration,
) {
    let result: Result<(), TaskError> = async {
        let mut stream = connect(address, connect_timeout, digest).await?;
        write_msg(
            &mut stream,
            &MasterToAgent::Cancel {
                task_id: task_id.clone(),
            },
            DEFAULT_IO_TIMEOUT,
        )
        .await
        .map_err(transport_lost)?;
        let _: AgentReply = read_msg(&mut stream, DEFAULT_IO_TIMEOUT)
            .await
            .map_err(transport_lost)?;
        Ok(())
    }
    .await;

    if let Err(e) = result {
        warn!(task = %task_id, error = %e, "cancel delivery failed");
    }
}

fn transport_lost(e: sloth_proto::ProtocolError) -> TaskError {
    TaskError::new(TaskErrorKind::ConnectionLost, e.to_string())
}

fn transport_protocol_error(message: &str) -> TaskError {
    TaskError::new(TaskErrorKind::ConnectionLost, message.to_string())
}

// ── routing ──────────────────────────────────────────────────────────────

/// Routes an envelope to the local or remote path from its endpoint.
#[derive(Clone)]
pub struct ExecRouter<I> {
    local: LocalDispatcher<I>,
    remote: RemoteDispatcher,
}

impl<I: Interpreter> ExecRouter<I> {
    pub fn new(local: LocalDispatcher<I>, remote: RemoteDispatcher) -> Self {
        Self { local, remote }
    }
}

#[async_trait]
impl<I: Interpreter> Dispatcher for LocalDispatcher<I> {
    async fn execute(
        &self,
        _endpoint: &Endpoint,
        envelope: TaskEnvelope,
        cancel: CancellationToken,
    ) -> AttemptOutcome {
        self.run(envelope, cancel).await
    }
}

#[async_trait]
impl Dispatcher for RemoteDispatcher {
    async fn execute(
        &self,
        endpoint: &Endpoint,
        envelope: TaskEnvelope,
        cancel: CancellationToken,
    ) -> AttemptOutcome {
        match endpoint {
            Endpoint::Remote { address, token } => {
                self.run(address, token.as_deref(), envelope, cancel).await
            }
            Endpoint::Local => AttemptOutcome::failed(
                TaskError::new(
                    TaskErrorKind::ConnectionLost,
                    "remote dispatcher has no local execution path",
                ),
                0,
            ),
        }
    }
}

#[async_trait]
impl<I: Interpreter> Dispatcher for ExecRouter<I> {
    async fn execute(
        &self,
        endpoint: &Endpoint,
        envelope: TaskEnvelope,
        cancel: CancellationToken,
    ) -> AttemptOutcome {
        match endpoint {
            Endpoint::Local => self.local.run(envelope, cancel).await,
            Endpoint::Remote { address, token } => {
                self.remote
                    .run(address, token.as_deref(), envelope, cancel)
                    .await
            }
        }
    }
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
