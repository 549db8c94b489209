// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Master state: everything the listener needs to answer a request.

use crate::protocol::{DaemonStatus, Response};
use parking_lot::Mutex;
use sloth_adapters::CommandInterpreter;
use sloth_core::{AgentStatus, Event, SystemClock, WorkflowId};
use sloth_engine::{
    ArtifactStaging, EventBus, ExecRouter, Resolver, SchedulerConfig, TaskLogger,
    WorkflowRunner, AgentRegistry,
};
use sloth_storage::{AgentFilter, RegistryStore};
use sloth_workflow::{validate, WorkflowSpec};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub(crate) type MasterResolver = Resolver<SystemClock>;
pub(crate) type MasterDispatcher = ExecRouter<CommandInterpreter>;

/// Shared master state behind the listener.
pub struct Master {
    pub store: Arc<RegistryStore>,
    pub bus: EventBus,
    pub registry: AgentRegistry<SystemClock>,
    pub resolver: Arc<MasterResolver>,
    pub dispatcher: Arc<MasterDispatcher>,
    pub interpreter: CommandInterpreter,
    pub staging: ArtifactStaging,
    pub logger: TaskLogger,
    pub scheduler_config: SchedulerConfig,
    pub heartbeat_interval_ms: u64,
    pub start_time: Instant,
    /// Workflow id → cancellation handle for every in-flight run.
    running: Mutex<HashMap<WorkflowId, CancellationToken>>,
    /// Signalled whenever a run leaves the `running` map.
    drained: Notify,
    /// Parent token: tripping it aborts every in-flight workflow.
    pub shutdown_token: CancellationToken,
}

impl Master {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<RegistryStore>,
        bus: EventBus,
        registry: AgentRegistry<SystemClock>,
        resolver: Arc<MasterResolver>,
        dispatcher: Arc<MasterDispatcher>,
        interpreter: CommandInterpreter,
        staging: ArtifactStaging,
        logger: TaskLogger,
        scheduler_config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            bus,
            registry,
            resolver,
            dispatcher,
            interpreter,
            staging,
            logger,
            scheduler_config,
            heartbeat_interval_ms: 30_000,
            start_time: Instant::now(),
            running: Mutex::new(HashMap::new()),
            drained: Notify::new(),
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Validate and execute one workflow to completion.
    ///
    /// `Submitted` goes out through `on_accept` before the run starts so
    /// the client learns the id it can cancel.
    pub async fn submit(
        &self,
        spec: WorkflowSpec,
        on_accept: impl FnOnce(&WorkflowId),
    ) -> Response {
        let workflow = match validate(spec) {
            Ok(workflow) => workflow,
            Err(e) => return Response::err(e.to_task_error()),
        };
        let id = workflow.id.clone();
        on_accept(&id);

        let cancel = self.shutdown_token.child_token();
        self.running.lock().insert(id.clone(), cancel.clone());

        let runner = WorkflowRunner::new(
            workflow,
            self.interpreter.clone(),
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.resolver),
            self.bus.clone(),
            self.staging.workflow(&id),
            self.logger.clone(),
            self.scheduler_config.clone(),
            cancel,
        );
        let report = runner.run().await;

        self.running.lock().remove(&id);
        self.drained.notify_waiters();
        Response::Report { report }
    }

    /// Validation-only path for `sloth run --validate`.
    pub fn validate_only(&self, spec: WorkflowSpec) -> Response {
        match validate(spec) {
            Ok(workflow) => Response::Validated {
                name: workflow.name,
                tasks: workflow.tasks.len(),
            },
            Err(e) => Response::err(e.to_task_error()),
        }
    }

    /// Cancel a running workflow. Unknown ids (already finished) report
    /// `found: false`.
    pub fn cancel_workflow(&self, id: &WorkflowId) -> Response {
        let running = self.running.lock();
        match running.get(id) {
            Some(token) => {
                info!(workflow = %id, "cancelling workflow on request");
                token.cancel();
                Response::Cancelling { found: true }
            }
            None => Response::Cancelling { found: false },
        }
    }

    pub fn running_workflows(&self) -> usize {
        self.running.lock().len()
    }

    pub fn status(&self) -> Result<DaemonStatus, sloth_storage::StoreError> {
        let agents = self.store.list_agents(&AgentFilter::default())?;
        Ok(DaemonStatus {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            agents_active: agents
                .iter()
                .filter(|a| a.status == AgentStatus::Active)
                .count(),
            agents_inactive: agents
                .iter()
                .filter(|a| a.status != AgentStatus::Active)
                .count(),
            running_workflows: self.running_workflows(),
            schema_version: self.store.schema_version(),
        })
    }

    /// Orderly teardown: abort every in-flight workflow, wait for each to
    /// record its terminal state, then flush the shutdown event.
    ///
    /// The wait is bounded by the scheduler's cancellation grace plus
    /// slack so a wedged worker cannot hang process exit.
    pub async fn shutdown(&self) {
        let in_flight = self.running_workflows();
        if in_flight > 0 {
            info!(in_flight, "aborting in-flight workflows for shutdown");
        }
        self.shutdown_token.cancel();

        let deadline = tokio::time::Instant::now()
            + self.scheduler_config.cancel_grace
            + Duration::from_secs(5);
        loop {
            // Register for the wakeup before re-checking the map, so a run
            // finishing in between cannot be missed.
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.running_workflows() == 0 {
                break;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                warn!(
                    remaining = self.running_workflows(),
                    "shutdown drain timed out, abandoning workflows"
                );
                break;
            }
        }

        self.bus.dispatch(&Event::SystemShutdown);
    }
}

#[cfg(test)]
#[path = "master_tests.rs"]
mod tests;
