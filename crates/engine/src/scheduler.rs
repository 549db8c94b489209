// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The workflow scheduler.
//!
//! One coordinator task per workflow owns the mutable DAG state
//! `(pending, ready, running, done)`. Workers are spawned per dispatched
//! task and report back over a single bounded channel; the coordinator
//! `select!`s over that channel, the workflow deadline, and the external
//! cancellation token. Dependency visibility is deterministic because
//! dispatch and completion both happen on the coordinator.

use crate::artifacts::WorkflowStaging;
use crate::bus::EventBus;
use crate::dispatch::{AttemptOutcome, Dispatcher};
use crate::logger::TaskLogger;
use crate::resolver::{classify_delegate, EndpointResolver};
use sloth_adapters::{Bindings, Interpreter, IoSinks};
use sloth_core::{
    Event, OutputTable, SkipReason, TaskError, TaskErrorKind, TaskId, TaskResult, TaskScript,
    TaskStatus, WorkflowReport,
};
use sloth_proto::{DepResult, TaskEnvelope};
use sloth_workflow::{Guard, TaskSpec, Workflow};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Retry, timeout, and grace policy knobs.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Deadline for tasks that declare none.
    pub default_task_timeout: Duration,
    /// Hard ceiling applied to every task and workflow.
    pub system_ceiling: Duration,
    /// Retry backoff: base * 2^(attempt-1), capped, jittered.
    pub retry_base: Duration,
    pub retry_cap: Duration,
    /// Redispatch pacing for transient conditions (busy agent).
    pub transient_retry_base: Duration,
    pub transient_retry_cap: Duration,
    /// Transient redispatches before the condition counts as a failure.
    pub max_transient_retries: u32,
    /// Wait after cancellation before a worker is abandoned.
    pub cancel_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_task_timeout: Duration::from_secs(3600),
            system_ceiling: Duration::from_secs(24 * 60 * 60),
            retry_base: Duration::from_secs(1),
            retry_cap: Duration::from_secs(30),
            transient_retry_base: Duration::from_millis(200),
            transient_retry_cap: Duration::from_secs(5),
            max_transient_retries: 10,
            cancel_grace: Duration::from_secs(5),
        }
    }
}

/// Why the run loop is being torn down early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AbortCause {
    ExternalCancel,
    WorkflowTimeout,
    GuardAbort,
    FailFast,
}

enum Msg {
    Done { name: String, outcome: AttemptOutcome },
    RetryDue { name: String },
}

/// Classification of a pending task against its dependencies.
enum Gate {
    Wait,
    Ready,
    Skip(SkipReason),
}

struct RunningTask {
    cancel: CancellationToken,
}

struct RunState {
    tx: mpsc::Sender<Msg>,
    pending: Vec<String>,
    /// Guard-passed tasks waiting for a dispatch slot.
    dispatchable: VecDeque<String>,
    running: HashMap<String, RunningTask>,
    waiting_retry: HashSet<String>,
    done: HashMap<String, TaskResult>,
    retries_left: HashMap<String, u32>,
    transient_used: HashMap<String, u32>,
    attempts: HashMap<String, u32>,
    abort: Option<(AbortCause, TaskError)>,
}

/// Drives one workflow to completion.
pub struct WorkflowRunner<I, D, R> {
    workflow: Workflow,
    interpreter: I,
    dispatcher: Arc<D>,
    resolver: Arc<R>,
    bus: EventBus,
    staging: WorkflowStaging,
    logger: TaskLogger,
    config: SchedulerConfig,
    /// External cancellation (client request or master shutdown).
    cancel: CancellationToken,
}

impl<I, D, R> WorkflowRunner<I, D, R>
where
    I: Interpreter,
    D: Dispatcher,
    R: EndpointResolver,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        workflow: Workflow,
        interpreter: I,
        dispatcher: Arc<D>,
        resolver: Arc<R>,
        bus: EventBus,
        staging: WorkflowStaging,
        logger: TaskLogger,
        config: SchedulerConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            workflow,
            interpreter,
            dispatcher,
            resolver,
            bus,
            staging,
            logger,
            config,
            cancel,
        }
    }

    /// Run the workflow to its terminal aggregate.
    pub async fn run(self) -> WorkflowReport {
        let started = Instant::now();
        let deadline = started
            + self
                .workflow
                .config
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(self.config.system_ceiling)
                .min(self.config.system_ceiling);

        info!(workflow = %self.workflow.id, name = %self.workflow.name, "workflow started");
        self.bus.dispatch(&Event::WorkflowStarted {
            workflow_id: self.workflow.id.clone(),
            name: self.workflow.name.clone(),
        });
        self.run_lifecycle_hook(
            "on_start",
            self.workflow.hooks.on_start.clone(),
            OutputTable::new(),
        )
        .await;

        let (tx, mut rx) = mpsc::channel::<Msg>(64);
        let mut state = RunState {
            tx,
            pending: self.workflow.tasks.keys().cloned().collect(),
            dispatchable: VecDeque::new(),
            running: HashMap::new(),
            waiting_retry: HashSet::new(),
            done: HashMap::new(),
            retries_left: self
                .workflow
                .tasks
                .iter()
                .map(|(name, task)| (name.clone(), task.retries))
                .collect(),
            transient_used: HashMap::new(),
            attempts: HashMap::new(),
            abort: None,
        };

        loop {
            self.promote(&mut state).await;
            if state.abort.is_none() {
                self.fill_window(&mut state, deadline).await;
            }

            if let Some((cause, error)) = state.abort.take() {
                self.tear_down(&mut state, &mut rx, cause, error.clone()).await;
                return self.finish(state, started, Some(error)).await;
            }

            if state.pending.is_empty()
                && state.dispatchable.is_empty()
                && state.running.is_empty()
                && state.waiting_retry.is_empty()
            {
                break;
            }

            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(Msg::Done { name, outcome }) => {
                            self.handle_completion(&mut state, name, outcome).await;
                        }
                        Some(Msg::RetryDue { name }) => {
                            if state.waiting_retry.remove(&name) {
                                state.dispatchable.push_back(name);
                            }
                        }
                        // Unreachable while state.tx is alive; treated as an
                        // infrastructure failure if it ever fires.
                        None => {
                            state.abort = Some((
                                AbortCause::FailFast,
                                TaskError::new(
                                    TaskErrorKind::StorageError,
                                    "coordinator channel closed unexpectedly",
                                ),
                            ));
                        }
                    }
                }
                _ = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)) => {
                    state.abort = Some((
                        AbortCause::WorkflowTimeout,
                        TaskError::new(TaskErrorKind::Timeout, "workflow timeout exceeded"),
                    ));
                }
                _ = self.cancel.cancelled() => {
                    state.abort = Some((
                        AbortCause::ExternalCancel,
                        TaskError::cancelled(),
                    ));
                }
            }
        }

        self.finish(state, started, None).await
    }

    /// Move pending tasks whose dependencies are settled through the guard
    /// gate, marking skips along the way. Loops to a fixpoint because each
    /// skip can settle further dependents.
    async fn promote(&self, state: &mut RunState) {
        loop {
            if state.abort.is_some() {
                return;
            }

            let mut progressed = false;
            let mut still_pending = Vec::with_capacity(state.pending.len());
            let mut newly_ready = Vec::new();

            for name in std::mem::take(&mut state.pending) {
                let task = &self.workflow.tasks[&name];
                match self.dependency_gate(state, &name, task) {
                    Gate::Wait => still_pending.push(name),
                    Gate::Ready => {
                        newly_ready.push(name);
                        progressed = true;
                    }
                    Gate::Skip(reason) => {
                        self.record_skip(state, &name, reason);
                        progressed = true;
                    }
                }
            }
            state.pending = still_pending;

            for name in newly_ready {
                if state.abort.is_some() {
                    state.pending.push(name);
                } else {
                    self.guard_gate(state, name).await;
                }
            }

            if !progressed {
                return;
            }
        }
    }

    fn dependency_gate(&self, state: &RunState, name: &str, task: &TaskSpec) -> Gate {
        let mut skip: Option<SkipReason> = None;
        for dep in &task.depends_on {
            if let Some(result) = state.done.get(dep) {
                match result.status {
                    TaskStatus::Success => {}
                    TaskStatus::Skipped { .. } => {
                        skip.get_or_insert(SkipReason::SkippedUpstream);
                    }
                    TaskStatus::Failed | TaskStatus::Cancelled => {
                        let recovers = self.workflow.tasks[dep]
                            .next_if_fail
                            .iter()
                            .any(|t| t == name);
                        if !recovers {
                            skip = Some(SkipReason::UpstreamFailed);
                        }
                    }
                }
            } else if self.workflow.tasks[dep].fire_and_forget && self.in_flight(state, dep) {
                // Fire-and-forget dependencies gate on dispatch, not on
                // completion.
            } else {
                return Gate::Wait;
            }
        }
        match skip {
            Some(reason) => Gate::Skip(reason),
            None => Gate::Ready,
        }
    }

    fn in_flight(&self, state: &RunState, name: &str) -> bool {
        state.running.contains_key(name)
            || state.waiting_retry.contains(name)
            || state.dispatchable.iter().any(|d| d == name)
    }

    /// Evaluate `run_if` / `abort_if` for a task whose dependencies are
    /// settled, then queue it for dispatch.
    async fn guard_gate(&self, state: &mut RunState, name: String) {
        let task = &self.workflow.tasks[&name];
        let bindings = self.guard_bindings(state, task);

        if let Some(guard) = &task.run_if {
            match self.eval_guard(guard, &bindings).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(task = %name, "run_if false, skipping");
                    self.record_skip(state, &name, SkipReason::ConditionFalse);
                    return;
                }
                Err(e) => {
                    self.fail_task(state, &name, e).await;
                    return;
                }
            }
        }

        if let Some(guard) = &task.abort_if {
            match self.eval_guard(guard, &bindings).await {
                Ok(false) => {}
                Ok(true) => {
                    warn!(task = %name, "abort_if true, aborting workflow");
                    state.abort = Some((
                        AbortCause::GuardAbort,
                        TaskError::new(
                            TaskErrorKind::Aborted,
                            format!("abort_if on task '{}'", name),
                        ),
                    ));
                    state.pending.push(name);
                    return;
                }
                Err(e) => {
                    self.fail_task(state, &name, e).await;
                    return;
                }
            }
        }

        state.dispatchable.push_back(name);
    }

    async fn eval_guard(&self, guard: &Guard, bindings: &Bindings) -> Result<bool, TaskError> {
        let script = match guard {
            Guard::Command(cmd) => TaskScript::Command(cmd.clone()),
            Guard::Script(src) => TaskScript::Source(src.clone()),
        };
        self.interpreter
            .evaluate_guard(&script, bindings)
            .await
            .map_err(|e| TaskError::new(TaskErrorKind::InterpreterException, e.to_string()))
    }

    /// Dispatch queued tasks while the parallelism window has room.
    async fn fill_window(&self, state: &mut RunState, deadline: Instant) {
        let window = self
            .workflow
            .config
            .max_parallel_tasks
            .unwrap_or(usize::MAX);

        while state.running.len() < window && state.abort.is_none() {
            let Some(name) = state.dispatchable.pop_front() else {
                return;
            };
            self.dispatch(state, name, deadline).await;
        }
    }

    async fn dispatch(&self, state: &mut RunState, name: String, deadline: Instant) {
        let task = &self.workflow.tasks[&name];
        let attempt = {
            let n = state.attempts.entry(name.clone()).or_insert(0);
            *n += 1;
            *n
        };

        // Per-attempt pre_exec; a failing one consumes this attempt.
        if let Some(source) = &task.pre_exec {
            if let Err(e) = self.run_task_hook(source, state, task).await {
                self.route_failure(state, name, e).await;
                return;
            }
        }

        let delegate = classify_delegate(task.delegate_to.as_ref());
        let endpoint = match self.resolver.resolve(&delegate).await {
            Ok(endpoint) => endpoint,
            Err(e) => {
                // Resolution failures are terminal: retrying will not make
                // an unknown or inactive agent appear.
                self.fail_task(state, &name, e).await;
                return;
            }
        };

        let envelope = match self.build_envelope(state, &name, task, deadline).await {
            Ok(envelope) => envelope,
            Err(e) => {
                self.route_failure(state, name, e).await;
                return;
            }
        };

        self.bus.dispatch(&Event::TaskStarted {
            workflow_id: self.workflow.id.clone(),
            task: name.clone(),
            target: endpoint.label(),
            attempt,
        });

        let timeout = Duration::from_millis(envelope.timeout_ms);
        let child_cancel = self.cancel.child_token();
        let worker_cancel = child_cancel.clone();
        let dispatcher = Arc::clone(&self.dispatcher);
        let grace = self.config.cancel_grace;
        let tx = state.tx.clone();
        let worker_name = name.clone();

        tokio::spawn(async move {
            let fut = dispatcher.execute(&endpoint, envelope, worker_cancel.clone());
            tokio::pin!(fut);

            let outcome = tokio::select! {
                outcome = &mut fut => outcome,
                _ = tokio::time::sleep(timeout) => {
                    worker_cancel.cancel();
                    let limit_ms = timeout.as_millis() as u64;
                    match tokio::time::timeout(grace, &mut fut).await {
                        Ok(mut outcome) => {
                            // The deadline caused this cancellation; report
                            // it as a timeout, not a cancel.
                            if matches!(
                                outcome.error.as_ref().map(|e| e.kind),
                                Some(TaskErrorKind::Cancelled)
                            ) {
                                outcome.error = Some(TaskError::timeout(limit_ms));
                            }
                            outcome
                        }
                        Err(_) => AttemptOutcome::failed(
                            TaskError::timeout(limit_ms),
                            limit_ms + grace.as_millis() as u64,
                        ),
                    }
                }
            };

            let _ = tx
                .send(Msg::Done {
                    name: worker_name,
                    outcome,
                })
                .await;
        });

        state.running.insert(
            name,
            RunningTask {
                cancel: child_cancel,
            },
        );
    }

    async fn build_envelope(
        &self,
        state: &RunState,
        name: &str,
        task: &TaskSpec,
        deadline: Instant,
    ) -> Result<TaskEnvelope, TaskError> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let timeout = task
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.config.default_task_timeout)
            .min(remaining)
            .min(self.config.system_ceiling)
            .max(Duration::from_millis(1));

        let mut inputs: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        if !task.consumes.is_empty() {
            let producers = self.transitive_dependencies(name);
            for pattern in &task.consumes {
                let found = self.staging.collect(pattern, &producers).await.map_err(|e| {
                    TaskError::new(
                        TaskErrorKind::StorageError,
                        format!("artifact staging read failed: {}", e),
                    )
                })?;
                inputs.extend(found);
            }
        }

        Ok(TaskEnvelope {
            task_id: TaskId::generate(),
            workflow_id: self.workflow.id.clone(),
            task_name: name.to_string(),
            script: task.script.clone(),
            params: task.params.clone(),
            deps: self.dep_results(state, task),
            env: task.env.clone(),
            workdir: self.workflow.config.workdir.clone(),
            timeout_ms: timeout.as_millis() as u64,
            artifacts: task.artifacts.clone(),
            inputs,
            user: None,
        })
    }

    fn dep_results(&self, state: &RunState, task: &TaskSpec) -> BTreeMap<String, DepResult> {
        task.depends_on
            .iter()
            .map(|dep| {
                let result = match state.done.get(dep) {
                    Some(result) => DepResult {
                        status: result.status,
                        outputs: result.outputs.clone(),
                    },
                    // Fire-and-forget dependency still in flight.
                    None => DepResult {
                        status: TaskStatus::Success,
                        outputs: OutputTable::new(),
                    },
                };
                (dep.clone(), result)
            })
            .collect()
    }

    fn transitive_dependencies(&self, name: &str) -> HashSet<String> {
        let mut out = HashSet::new();
        let mut stack: Vec<&str> = self.workflow.tasks[name]
            .depends_on
            .iter()
            .map(String::as_str)
            .collect();
        while let Some(dep) = stack.pop() {
            if out.insert(dep.to_string()) {
                stack.extend(
                    self.workflow.tasks[dep]
                        .depends_on
                        .iter()
                        .map(String::as_str),
                );
            }
        }
        out
    }

    async fn handle_completion(
        &self,
        state: &mut RunState,
        name: String,
        outcome: AttemptOutcome,
    ) {
        if state.running.remove(&name).is_none() {
            // Late result from an abandoned worker.
            return;
        }

        self.logger.append(&self.workflow.id, &name, &outcome.stdout);
        self.logger.append(&self.workflow.id, &name, &outcome.stderr);

        match outcome.error.clone() {
            None => self.complete_success(state, name, outcome).await,
            Some(error) => self.route_failure(state, name, error).await,
        }
    }

    async fn complete_success(
        &self,
        state: &mut RunState,
        name: String,
        outcome: AttemptOutcome,
    ) {
        let task = &self.workflow.tasks[&name];

        // Stage artifacts before the result becomes visible to dependents.
        for (artifact, bytes) in &outcome.artifacts {
            if let Err(e) = self.staging.store(&name, artifact, bytes).await {
                let error = TaskError::new(
                    TaskErrorKind::StorageError,
                    format!("failed to stage artifact '{}': {}", artifact, e),
                );
                self.route_failure(state, name, error).await;
                return;
            }
        }

        if let Some(source) = &task.post_exec {
            if let Err(e) = self.run_task_hook(source, state, task).await {
                self.route_failure(state, name, e).await;
                return;
            }
        }

        if let Some(source) = &task.on_success {
            if let Err(e) = self.run_task_hook(source, state, task).await {
                // Observational hook: recorded, never fails the task.
                warn!(task = %name, error = %e, "on_success hook failed");
            }
        }

        self.bus.dispatch(&Event::TaskCompleted {
            workflow_id: self.workflow.id.clone(),
            task: name.clone(),
            duration_ms: outcome.duration_ms,
        });

        let attempts = state.attempts.get(&name).copied().unwrap_or(1);
        state.done.insert(
            name.clone(),
            TaskResult {
                name,
                status: TaskStatus::Success,
                duration_ms: outcome.duration_ms,
                attempts,
                outputs: outcome.outputs,
                error: None,
            },
        );
    }

    /// Classify a failed attempt: transient redispatch, budgeted retry, or
    /// terminal failure.
    async fn route_failure(&self, state: &mut RunState, name: String, error: TaskError) {
        if error.kind == TaskErrorKind::Timeout {
            self.bus.dispatch(&Event::TaskTimeout {
                workflow_id: self.workflow.id.clone(),
                task: name.clone(),
            });
        }

        if error.kind == TaskErrorKind::Cancelled {
            self.record_cancelled(state, &name);
            return;
        }

        if error.kind.is_transient() {
            let used = state.transient_used.entry(name.clone()).or_insert(0);
            if *used < self.config.max_transient_retries {
                *used += 1;
                let delay = backoff(
                    self.config.transient_retry_base,
                    self.config.transient_retry_cap,
                    *used,
                );
                debug!(
                    task = %name,
                    redispatch = used,
                    delay_ms = delay.as_millis() as u64,
                    "transient condition, redispatching"
                );
                self.schedule_retry(state, name, delay);
                return;
            }
        }

        let retries_left = state.retries_left.entry(name.clone()).or_insert(0);
        if *retries_left > 0 && !error.kind.is_policy() {
            *retries_left -= 1;
            let attempt = state.attempts.get(&name).copied().unwrap_or(1);
            let delay = backoff(self.config.retry_base, self.config.retry_cap, attempt);
            self.bus.dispatch(&Event::TaskRetrying {
                workflow_id: self.workflow.id.clone(),
                task: name.clone(),
                attempt: attempt + 1,
                delay_ms: delay.as_millis() as u64,
            });
            self.schedule_retry(state, name, delay);
            return;
        }

        self.fail_task(state, &name, error).await;

        if self.workflow.config.fail_fast {
            let task = &self.workflow.tasks[&name];
            if task.next_if_fail.is_empty() {
                state.abort = Some((
                    AbortCause::FailFast,
                    TaskError::new(
                        TaskErrorKind::Aborted,
                        format!("fail_fast: task '{}' failed", name),
                    ),
                ));
            }
        }
    }

    fn schedule_retry(&self, state: &mut RunState, name: String, delay: Duration) {
        state.waiting_retry.insert(name.clone());
        let tx = state.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Msg::RetryDue { name }).await;
        });
    }

    fn record_skip(&self, state: &mut RunState, name: &str, reason: SkipReason) {
        self.bus.dispatch(&Event::TaskSkipped {
            workflow_id: self.workflow.id.clone(),
            task: name.to_string(),
            reason,
        });
        state
            .done
            .insert(name.to_string(), TaskResult::skipped(name, reason));
    }

    fn record_cancelled(&self, state: &mut RunState, name: &str) {
        self.bus.dispatch(&Event::TaskCancelled {
            workflow_id: self.workflow.id.clone(),
            task: name.to_string(),
        });
        let attempts = state.attempts.get(name).copied().unwrap_or(0);
        state.done.insert(
            name.to_string(),
            TaskResult {
                name: name.to_string(),
                status: TaskStatus::Cancelled,
                duration_ms: 0,
                attempts,
                outputs: OutputTable::new(),
                error: Some(TaskError::cancelled()),
            },
        );
    }

    /// Terminal failure: run `on_failure`, record, emit.
    async fn fail_task(&self, state: &mut RunState, name: &str, error: TaskError) {
        let task = &self.workflow.tasks[name];
        if let Some(source) = &task.on_failure {
            if let Err(e) = self.run_task_hook(source, state, task).await {
                warn!(task = name, error = %e, "on_failure hook failed");
            }
        }

        self.bus.dispatch(&Event::TaskFailed {
            workflow_id: self.workflow.id.clone(),
            task: name.to_string(),
            error: error.clone(),
        });
        let attempts = state.attempts.get(name).copied().unwrap_or(0);
        state.done.insert(
            name.to_string(),
            TaskResult {
                name: name.to_string(),
                status: TaskStatus::Failed,
                duration_ms: 0,
                attempts,
                outputs: OutputTable::new(),
                error: Some(error),
            },
        );
    }

    /// Cancel everything in flight, wait out the grace window, classify
    /// whatever did not finish.
    async fn tear_down(
        &self,
        state: &mut RunState,
        rx: &mut mpsc::Receiver<Msg>,
        cause: AbortCause,
        error: TaskError,
    ) {
        for running in state.running.values() {
            running.cancel.cancel();
        }

        let drain_deadline = Instant::now() + self.config.cancel_grace;
        while !state.running.is_empty() {
            let remaining = drain_deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Some(Msg::Done { name, outcome })) => {
                    if state.running.remove(&name).is_some() {
                        self.logger.append(&self.workflow.id, &name, &outcome.stdout);
                        self.logger.append(&self.workflow.id, &name, &outcome.stderr);
                        self.record_cancelled(state, &name);
                    }
                }
                Ok(Some(Msg::RetryDue { .. })) => {}
                Ok(None) | Err(_) => break,
            }
        }

        // Workers that never reported within the grace window.
        let unreported: Vec<String> = state.running.drain().map(|(name, _)| name).collect();
        for name in unreported {
            self.record_cancelled(state, &name);
        }

        // Everything that never dispatched.
        let undispatched: Vec<String> = state
            .pending
            .drain(..)
            .chain(state.dispatchable.drain(..))
            .chain(state.waiting_retry.drain())
            .collect();
        for name in undispatched {
            if state.done.contains_key(&name) {
                continue;
            }
            match cause {
                AbortCause::ExternalCancel | AbortCause::WorkflowTimeout => {
                    self.record_cancelled(state, &name);
                }
                AbortCause::GuardAbort | AbortCause::FailFast => {
                    self.record_skip(state, &name, SkipReason::UpstreamFailed);
                }
            }
        }

        let mut params = OutputTable::new();
        params.insert("reason".into(), serde_json::json!(error.to_string()));
        self.run_lifecycle_hook("on_abort", self.workflow.hooks.on_abort.clone(), params)
            .await;

        if cause == AbortCause::ExternalCancel {
            self.bus.dispatch(&Event::WorkflowCancelled {
                workflow_id: self.workflow.id.clone(),
                name: self.workflow.name.clone(),
            });
        }
    }

    async fn finish(
        &self,
        state: RunState,
        started: Instant,
        abort_error: Option<TaskError>,
    ) -> WorkflowReport {
        let tasks: Vec<TaskResult> = self
            .workflow
            .tasks
            .keys()
            .filter_map(|name| state.done.get(name).cloned())
            .collect();
        let success =
            abort_error.is_none() && tasks.iter().all(|t| !t.status.counts_as_failure());
        let duration_ms = started.elapsed().as_millis() as u64;

        let mut params = OutputTable::new();
        params.insert("success".into(), serde_json::json!(success));
        params.insert(
            "results".into(),
            serde_json::to_value(&tasks).unwrap_or(serde_json::Value::Null),
        );
        self.run_lifecycle_hook(
            "on_complete",
            self.workflow.hooks.on_complete.clone(),
            params,
        )
        .await;

        let externally_cancelled = abort_error
            .as_ref()
            .is_some_and(|e| e.kind == TaskErrorKind::Cancelled);
        if success {
            self.bus.dispatch(&Event::WorkflowCompleted {
                workflow_id: self.workflow.id.clone(),
                name: self.workflow.name.clone(),
                duration_ms,
            });
        } else if !externally_cancelled {
            let error = abort_error.clone().unwrap_or_else(|| {
                let failed = tasks
                    .iter()
                    .filter(|t| t.status.counts_as_failure())
                    .count();
                TaskError::new(
                    TaskErrorKind::UpstreamFailed,
                    format!("{} task(s) did not succeed", failed),
                )
            });
            self.bus.dispatch(&Event::WorkflowFailed {
                workflow_id: self.workflow.id.clone(),
                name: self.workflow.name.clone(),
                error,
            });
        }

        if success || self.workflow.config.cleanup_on_failure {
            if let Err(e) = self.staging.cleanup().await {
                warn!(error = %e, "artifact staging cleanup failed");
            }
        }

        info!(
            workflow = %self.workflow.id,
            success,
            duration_ms,
            "workflow finished"
        );
        WorkflowReport {
            workflow_id: self.workflow.id.clone(),
            name: self.workflow.name.clone(),
            success,
            duration_ms,
            tasks,
        }
    }

    fn guard_bindings(&self, state: &RunState, task: &TaskSpec) -> Bindings {
        Bindings {
            params: task.params.clone(),
            deps: self
                .dep_results(state, task)
                .into_iter()
                .map(|(name, dep)| {
                    (
                        name,
                        serde_json::to_value(&dep).unwrap_or(serde_json::Value::Null),
                    )
                })
                .collect(),
            env: task.env.clone(),
            workdir: self.workflow.config.workdir.clone().map(Into::into),
        }
    }

    /// Per-task closure hook (`pre_exec` / `post_exec` / …).
    async fn run_task_hook(
        &self,
        source: &str,
        state: &RunState,
        task: &TaskSpec,
    ) -> Result<(), TaskError> {
        let bindings = self.guard_bindings(state, task);
        let outcome = self
            .interpreter
            .evaluate_script(
                &TaskScript::Source(source.to_string()),
                bindings,
                IoSinks::discard(),
                self.cancel.child_token(),
            )
            .await
            .map_err(|e| TaskError::new(TaskErrorKind::InterpreterException, e.to_string()))?;
        if outcome.success {
            Ok(())
        } else {
            Err(TaskError::new(
                TaskErrorKind::InterpreterException,
                outcome.message,
            ))
        }
    }

    /// Workflow-level lifecycle closure; failures are logged, never fatal.
    async fn run_lifecycle_hook(&self, label: &str, source: Option<String>, params: OutputTable) {
        let Some(source) = source else { return };
        let bindings = Bindings {
            params,
            ..Default::default()
        };
        let result = self
            .interpreter
            .evaluate_script(
                &TaskScript::Source(source),
                bindings,
                IoSinks::discard(),
                CancellationToken::new(),
            )
            .await;
        match result {
            Ok(outcome) if outcome.success => {}
            Ok(outcome) => {
                warn!(hook = label, message = %outcome.message, "lifecycle hook failed")
            }
            Err(e) => warn!(hook = label, error = %e, "lifecycle hook failed"),
        }
    }
}

/// Exponential backoff with ±20% jitter.
fn backoff(base: Duration, cap: Duration, attempt: u32) -> Duration {
    use rand::Rng;
    let exp = attempt.saturating_sub(1).min(16);
    let raw = base.saturating_mul(1u32 << exp).min(cap);
    let jitter = rand::rng().random_range(0.8..1.2);
    raw.mul_f64(jitter)
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
