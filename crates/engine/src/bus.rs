// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event bus: append to the persistent log, wake the hook runner.
//!
//! `dispatch` never fails the caller. Durability lives in the event log;
//! the channel to the hook runner carries no data, only a wake. The runner
//! reads the log forward from its own cursor, so a full wake channel (the
//! runner is already awake) never loses a fanout — every appended row is
//! seen on the runner's next drain.

use sloth_core::{Event, EventId, EventRecord};
use sloth_storage::RegistryStore;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Dispatch surface handed to every component that emits events.
#[derive(Clone)]
pub struct EventBus {
    store: Arc<RegistryStore>,
    hook_wake: Option<mpsc::Sender<()>>,
}

impl EventBus {
    pub fn new(store: Arc<RegistryStore>) -> Self {
        Self {
            store,
            hook_wake: None,
        }
    }

    /// Attach the hook runner's wake channel.
    pub fn with_hook_runner(mut self, hook_wake: mpsc::Sender<()>) -> Self {
        self.hook_wake = Some(hook_wake);
        self
    }

    /// Stamp, persist, and announce one event.
    pub fn dispatch(&self, event: &Event) {
        let record = EventRecord::from_event(EventId::generate(), epoch_ms(), event);
        debug!(tag = %record.tag, "event");

        if let Err(e) = self.store.append_event(&record) {
            error!(tag = %record.tag, error = %e, "failed to append event to log");
            // No durable row, nothing for the runner to pick up.
            return;
        }

        if let Some(wake) = &self.hook_wake {
            // Non-blocking wake: a full channel means the runner is already
            // awake and will see this row on its next drain.
            let _ = wake.try_send(());
        }
    }

    /// Apply the retention policy to the event log.
    pub fn prune(&self, max_age: std::time::Duration, max_count: usize) {
        let cutoff = epoch_ms().saturating_sub(max_age.as_millis() as u64);
        match self.store.prune_events(cutoff, max_count) {
            Ok(0) => {}
            Ok(n) => debug!(pruned = n, "event log pruned"),
            Err(e) => error!(error = %e, "event log prune failed"),
        }
    }

    pub fn store(&self) -> &Arc<RegistryStore> {
        &self.store
    }
}

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
