// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scripted interpreter double for tests.

use crate::interpreter::{Bindings, Interpreter, InterpreterError, IoSinks, ScriptOutcome};
use async_trait::async_trait;
use parking_lot::Mutex;
use sloth_core::{OutputTable, TaskScript};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What the fake does when asked to evaluate a given script string.
#[derive(Debug, Clone)]
pub enum FakeBehavior {
    /// Return success with the given outputs after optionally emitting
    /// stdout bytes.
    Succeed {
        outputs: OutputTable,
        stdout: Vec<u8>,
    },
    /// Return a failed outcome with the given exit code and message.
    Fail { message: String, exit_code: i32 },
    /// Raise an interpreter exception.
    Raise(String),
    /// Sleep, then succeed — unless cancelled first.
    Slow(Duration),
    /// Block until cancelled.
    Hang,
}

/// One recorded evaluation.
#[derive(Debug, Clone)]
pub struct FakeCall {
    pub script: String,
    pub params: OutputTable,
    /// Dependency bindings as handed to the script.
    pub deps: std::collections::BTreeMap<String, serde_json::Value>,
}

#[derive(Default)]
struct FakeState {
    behaviors: HashMap<String, FakeBehavior>,
    guards: HashMap<String, bool>,
    calls: Vec<FakeCall>,
    guard_calls: Vec<String>,
}

/// Interpreter double with per-script scripted behavior.
///
/// Unconfigured scripts succeed with empty outputs; unconfigured guards
/// evaluate true.
#[derive(Clone, Default)]
pub struct FakeInterpreter {
    state: Arc<Mutex<FakeState>>,
}

impl FakeInterpreter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn behave(&self, script: &str, behavior: FakeBehavior) -> &Self {
        self.state
            .lock()
            .behaviors
            .insert(script.to_string(), behavior);
        self
    }

    pub fn succeed_with(&self, script: &str, outputs: OutputTable) -> &Self {
        self.behave(
            script,
            FakeBehavior::Succeed {
                outputs,
                stdout: Vec::new(),
            },
        )
    }

    pub fn fail(&self, script: &str, message: &str) -> &Self {
        self.behave(
            script,
            FakeBehavior::Fail {
                message: message.to_string(),
                exit_code: 1,
            },
        )
    }

    pub fn hang(&self, script: &str) -> &Self {
        self.behave(script, FakeBehavior::Hang)
    }

    pub fn set_guard(&self, guard: &str, result: bool) -> &Self {
        self.state.lock().guards.insert(guard.to_string(), result);
        self
    }

    /// Scripts evaluated so far, in order.
    pub fn calls(&self) -> Vec<FakeCall> {
        self.state.lock().calls.clone()
    }

    pub fn call_count(&self, script: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.script == script)
            .count()
    }

    pub fn guard_calls(&self) -> Vec<String> {
        self.state.lock().guard_calls.clone()
    }
}

#[async_trait]
impl Interpreter for FakeInterpreter {
    async fn evaluate_script(
        &self,
        script: &TaskScript,
        bindings: Bindings,
        sinks: IoSinks,
        cancel: CancellationToken,
    ) -> Result<ScriptOutcome, InterpreterError> {
        let key = script.as_str().to_string();
        let behavior = {
            let mut state = self.state.lock();
            state.calls.push(FakeCall {
                script: key.clone(),
                params: bindings.params.clone(),
                deps: bindings.deps.clone(),
            });
            state.behaviors.get(&key).cloned()
        };

        match behavior {
            None => Ok(ScriptOutcome {
                success: true,
                message: String::new(),
                outputs: OutputTable::new(),
                exit_code: 0,
            }),
            Some(FakeBehavior::Succeed { outputs, stdout }) => {
                if !stdout.is_empty() {
                    let _ = sinks.stdout.send(stdout).await;
                }
                Ok(ScriptOutcome {
                    success: true,
                    message: String::new(),
                    outputs,
                    exit_code: 0,
                })
            }
            Some(FakeBehavior::Fail { message, exit_code }) => Ok(ScriptOutcome {
                success: false,
                message,
                outputs: OutputTable::new(),
                exit_code,
            }),
            Some(FakeBehavior::Raise(message)) => Err(InterpreterError::Exception(message)),
            Some(FakeBehavior::Slow(delay)) => {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => Ok(ScriptOutcome {
                        success: true,
                        message: String::new(),
                        outputs: OutputTable::new(),
                        exit_code: 0,
                    }),
                    _ = cancel.cancelled() => Err(InterpreterError::Cancelled),
                }
            }
            Some(FakeBehavior::Hang) => {
                cancel.cancelled().await;
                Err(InterpreterError::Cancelled)
            }
        }
    }

    async fn evaluate_guard(
        &self,
        guard: &TaskScript,
        _bindings: &Bindings,
    ) -> Result<bool, InterpreterError> {
        let key = guard.as_str().to_string();
        let mut state = self.state.lock();
        state.guard_calls.push(key.clone());
        Ok(state.guards.get(&key).copied().unwrap_or(true))
    }
}
