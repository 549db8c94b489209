// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The interpreter boundary.

use async_trait::async_trait;
use sloth_core::{OutputTable, TaskScript};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Size of streamed stdout/stderr chunks (8 KiB).
pub const OUTPUT_CHUNK_SIZE: usize = 8 * 1024;

/// Errors from interpreter invocations.
#[derive(Debug, Error)]
pub enum InterpreterError {
    /// The interpreter (or shell) could not be started.
    #[error("interpreter start failed: {0}")]
    StartFailed(String),

    /// The script raised instead of returning a result tuple.
    #[error("interpreter exception: {0}")]
    Exception(String),

    /// Evaluation was cancelled and the child reaped.
    #[error("evaluation cancelled")]
    Cancelled,

    /// This interpreter does not handle the given script form.
    #[error("unsupported script form: {0}")]
    Unsupported(String),
}

/// Input binding for one evaluation.
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    /// Declared parameters, exposed to scripts as `params`.
    pub params: OutputTable,
    /// Dependency name → `{status, outputs}` value, exposed as `deps`.
    pub deps: BTreeMap<String, serde_json::Value>,
    /// Extra environment for the evaluation.
    pub env: BTreeMap<String, String>,
    pub workdir: Option<PathBuf>,
}

/// Result tuple produced by a task script.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptOutcome {
    pub success: bool,
    pub message: String,
    pub outputs: OutputTable,
    pub exit_code: i32,
}

/// Sinks for streamed interpreter output.
///
/// Senders are bounded; a slow consumer backpressures the interpreter.
pub struct IoSinks {
    pub stdout: mpsc::Sender<Vec<u8>>,
    pub stderr: mpsc::Sender<Vec<u8>>,
}

impl IoSinks {
    /// Sinks that discard everything (guard evaluation, hooks).
    pub fn discard() -> Self {
        let (stdout, _) = mpsc::channel(1);
        let (stderr, _) = mpsc::channel(1);
        Self { stdout, stderr }
    }
}

/// The embedded scripting interpreter, as the engine sees it.
#[async_trait]
pub trait Interpreter: Clone + Send + Sync + 'static {
    /// Evaluate a task script to a result tuple, streaming output through
    /// `sinks`. Cancellation must terminate the evaluation within the
    /// caller's grace window.
    async fn evaluate_script(
        &self,
        script: &TaskScript,
        bindings: Bindings,
        sinks: IoSinks,
        cancel: CancellationToken,
    ) -> Result<ScriptOutcome, InterpreterError>;

    /// Evaluate a guard to a boolean. Restricted to side-effect-free
    /// evaluation; no output streaming.
    async fn evaluate_guard(
        &self,
        guard: &TaskScript,
        bindings: &Bindings,
    ) -> Result<bool, InterpreterError>;
}
