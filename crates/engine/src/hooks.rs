// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hook runner: user scripts reacting to events.
//!
//! The runner reads the persistent event log forward from a cursor; the
//! bus only wakes it, so no burst of events can drop a fanout. Invocations
//! run on a bounded worker pool. Per-hook single-flight keeps a hook's
//! invocations serialized so user scripts never observe themselves
//! reentrantly; distinct hooks run concurrently. Every invocation is
//! recorded in the hook's bounded history, and a hook that fails enough
//! times in a row is disabled.

use sloth_adapters::{Bindings, Interpreter, IoSinks};
use sloth_core::{
    Event, EventId, EventRecord, HookDef, HookRun, HookRunStatus, HookSource, TaskScript,
};
use sloth_storage::RegistryStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Events read from the log per drain pass.
const FANOUT_BATCH: usize = 64;

/// Pool sizing and failure policy.
#[derive(Debug, Clone)]
pub struct HookRunnerConfig {
    pub workers: usize,
    pub hook_timeout: Duration,
    /// Ring size of persisted runs per hook.
    pub history_keep: usize,
    /// Consecutive failures before a hook is auto-disabled.
    pub auto_disable_after: u32,
}

impl Default for HookRunnerConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            hook_timeout: Duration::from_secs(30),
            history_keep: 100,
            auto_disable_after: 10,
        }
    }
}

/// Executes matching hooks for every event record it receives.
pub struct HookRunner<I: Interpreter> {
    store: Arc<RegistryStore>,
    interpreter: I,
    config: HookRunnerConfig,
    pool: Arc<Semaphore>,
    /// Per-hook single-flight locks.
    flights: Arc<parking_lot::Mutex<HashMap<String, Arc<Mutex<()>>>>>,
    /// Consecutive failure counts.
    failures: Arc<parking_lot::Mutex<HashMap<String, u32>>>,
}

impl<I: Interpreter> HookRunner<I> {
    pub fn new(store: Arc<RegistryStore>, interpreter: I, config: HookRunnerConfig) -> Self {
        let pool = Arc::new(Semaphore::new(config.workers));
        Self {
            store,
            interpreter,
            config,
            pool,
            flights: Arc::new(parking_lot::Mutex::new(HashMap::new())),
            failures: Arc::new(parking_lot::Mutex::new(HashMap::new())),
        }
    }

    /// Start the fanout loop. Returns the wake sender the event bus
    /// notifies and the loop's join handle; the loop ends when every
    /// sender is dropped.
    ///
    /// The runner owns a cursor into the event log, initialized at the
    /// current end so history is not replayed. Every append is followed by
    /// a wake, and each wake drains the log to its end, so appended rows
    /// are never missed — a full wake channel just means the runner is
    /// already awake.
    pub fn spawn(self) -> (mpsc::Sender<()>, JoinHandle<()>) {
        let (wake_tx, mut wake_rx) = mpsc::channel::<()>(1);
        let mut cursor = match self.store.last_event_seq() {
            Ok(seq) => seq,
            Err(e) => {
                error!(error = %e, "cannot read event log position, starting at zero");
                0
            }
        };

        let runner = Arc::new(self);
        let handle = tokio::spawn(async move {
            loop {
                // Drain everything appended since the cursor.
                loop {
                    let batch = match runner.store.events_after(cursor, FANOUT_BATCH) {
                        Ok(batch) => batch,
                        Err(e) => {
                            error!(error = %e, "cannot read event log for fanout");
                            break;
                        }
                    };
                    if batch.is_empty() {
                        break;
                    }
                    for (seq, record) in batch {
                        runner.fan_out(record).await;
                        cursor = seq;
                    }
                }

                // Wait for the next wake.
                if wake_rx.recv().await.is_none() {
                    debug!("hook intake closed");
                    return;
                }
            }
        });
        (wake_tx, handle)
    }

    async fn fan_out(self: &Arc<Self>, record: EventRecord) {
        let hooks = match self.store.list_hooks() {
            Ok(hooks) => hooks,
            Err(e) => {
                error!(error = %e, "cannot list hooks for fanout");
                return;
            }
        };

        for hook in hooks {
            if !hook.enabled || !sloth_core::selector_matches(&hook.selector, &record.tag) {
                continue;
            }
            let runner = Arc::clone(self);
            let record = record.clone();
            tokio::spawn(async move {
                runner.invoke(hook, record).await;
            });
        }
    }

    fn flight_lock(&self, hook: &str) -> Arc<Mutex<()>> {
        let mut flights = self.flights.lock();
        Arc::clone(flights.entry(hook.to_string()).or_default())
    }

    async fn invoke(&self, hook: HookDef, record: EventRecord) {
        // Serialize per hook first, then take a pool slot, so a hook
        // waiting its turn does not occupy a worker.
        let flight = self.flight_lock(hook.name.as_str());
        let _serialized = flight.lock().await;
        let Ok(_slot) = self.pool.acquire().await else {
            return; // pool closed at shutdown
        };

        let started_at_ms = epoch_ms();
        let started = std::time::Instant::now();
        let (status, error) = self.invoke_inner(&hook, &record).await;
        let run = HookRun {
            hook: hook.name.clone(),
            started_at_ms,
            duration_ms: started.elapsed().as_millis() as u64,
            status,
            error,
        };

        if let Err(e) = self.store.record_hook_run(&run, self.config.history_keep) {
            error!(hook = %hook.name, error = %e, "failed to record hook run");
        }

        self.track_failures(&hook, status);
    }

    async fn invoke_inner(
        &self,
        hook: &HookDef,
        record: &EventRecord,
    ) -> (HookRunStatus, Option<String>) {
        let source = match &hook.source {
            HookSource::Inline(source) => source.clone(),
            HookSource::File(path) => match tokio::fs::read_to_string(path).await {
                Ok(source) => source,
                Err(e) => {
                    return (
                        HookRunStatus::Failed,
                        Some(format!("cannot load script {}: {}", path.display(), e)),
                    );
                }
            },
        };

        let mut params = sloth_core::OutputTable::new();
        params.insert("tag".into(), serde_json::json!(record.tag));
        params.insert("timestamp_ms".into(), serde_json::json!(record.timestamp_ms));
        params.insert("data".into(), record.data.clone());
        let bindings = Bindings {
            params,
            ..Default::default()
        };

        let cancel = CancellationToken::new();
        let task_script = TaskScript::Source(source);
        let evaluation = self.interpreter.evaluate_script(
            &task_script,
            bindings,
            IoSinks::discard(),
            cancel.clone(),
        );

        match tokio::time::timeout(self.config.hook_timeout, evaluation).await {
            Ok(Ok(outcome)) if outcome.success => (HookRunStatus::Ok, None),
            Ok(Ok(outcome)) => (HookRunStatus::Failed, Some(outcome.message)),
            Ok(Err(e)) => (HookRunStatus::Failed, Some(e.to_string())),
            Err(_) => {
                cancel.cancel();
                (
                    HookRunStatus::Timeout,
                    Some(format!(
                        "hook exceeded {}s",
                        self.config.hook_timeout.as_secs()
                    )),
                )
            }
        }
    }

    fn track_failures(&self, hook: &HookDef, status: HookRunStatus) {
        let name = hook.name.as_str();
        let count = {
            let mut failures = self.failures.lock();
            if status == HookRunStatus::Ok {
                failures.remove(name);
                return;
            }
            let count = failures.entry(name.to_string()).or_insert(0);
            *count += 1;
            *count
        };

        if count >= self.config.auto_disable_after {
            warn!(hook = name, failures = count, "auto-disabling hook");
            if let Err(e) = self.store.set_hook_enabled(name, false) {
                error!(hook = name, error = %e, "failed to disable hook");
            }
            let event = Event::HookDisabled {
                hook: hook.name.clone(),
                failures: count,
            };
            let record = EventRecord::from_event(EventId::generate(), epoch_ms(), &event);
            if let Err(e) = self.store.append_event(&record) {
                error!(error = %e, "failed to log hook.disabled");
            }
            self.failures.lock().remove(name);
        }
    }
}

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
#[path = "hooks_tests.rs"]
mod tests;
