// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent registry: the authoritative view of which agents exist and are
//! reachable right now.
//!
//! State machine per agent:
//! `Unknown → [register] → Active → [no heartbeat for T₁] → Inactive →
//! [no heartbeat for T₂] → evicted`. A heartbeat from any non-Active state
//! transitions back to Active with an `agent.connected` event.

use crate::bus::EventBus;
use crate::resolver::ResolverCache;
use sloth_core::{AgentRecord, AgentStatus, Clock, Event};
use sloth_proto::AgentInfo;
use sloth_storage::{AgentFilter, RegistryStore, StoreError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Errors from registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown agent: {0}")]
    Unknown(String),

    #[error("agent inactive: {0}")]
    Inactive(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Liveness thresholds and sweep cadence.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Heartbeats older than this make an agent Inactive (T₁).
    pub inactivity_threshold: Duration,
    /// Heartbeats older than this evict the record entirely (T₂).
    pub eviction_threshold: Duration,
    pub sweep_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            inactivity_threshold: Duration::from_secs(60),
            eviction_threshold: Duration::from_secs(24 * 60 * 60),
            sweep_interval: Duration::from_secs(15),
        }
    }
}

/// Tracks live agents and serves name → address resolution.
#[derive(Clone)]
pub struct AgentRegistry<C: Clock> {
    store: Arc<RegistryStore>,
    bus: EventBus,
    clock: C,
    config: RegistryConfig,
    cache: ResolverCache,
}

impl<C: Clock> AgentRegistry<C> {
    pub fn new(store: Arc<RegistryStore>, bus: EventBus, clock: C, config: RegistryConfig) -> Self {
        Self {
            store,
            bus,
            clock,
            config,
            cache: ResolverCache::new(),
        }
    }

    /// Cache handle shared with the resolver; registry writes invalidate it.
    pub fn resolver_cache(&self) -> ResolverCache {
        self.cache.clone()
    }

    /// First contact or re-registration of an agent.
    ///
    /// Same name at a different address updates the record atomically and
    /// emits `agent.updated`; a brand-new name emits `agent.registered`.
    pub fn register(&self, info: &AgentInfo) -> Result<(), RegistryError> {
        let now = self.clock.epoch_secs();
        let existing = match self.store.get_agent(info.name.as_str()) {
            Ok(record) => Some(record),
            Err(StoreError::NotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };

        let record = AgentRecord {
            name: info.name.clone(),
            address: info.address.clone(),
            status: AgentStatus::Active,
            tags: info.tags.clone(),
            version: info.version.clone(),
            system: info.system.clone(),
            last_heartbeat: now,
            registered_at: existing.as_ref().map(|r| r.registered_at).unwrap_or(now),
            updated_at: now,
        };
        self.store.put_agent(&record)?;
        self.cache.invalidate(info.name.as_str());

        match existing {
            None => {
                info!(agent = %info.name, address = %info.address, "agent registered");
                self.bus.dispatch(&Event::AgentRegistered {
                    name: info.name.clone(),
                    address: info.address.clone(),
                });
            }
            Some(previous) if previous.address != info.address => {
                info!(
                    agent = %info.name,
                    old = %previous.address,
                    new = %info.address,
                    "agent re-registered from new address"
                );
                self.bus.dispatch(&Event::AgentUpdated {
                    name: info.name.clone(),
                    address: info.address.clone(),
                });
            }
            Some(_) => {
                // Same name, same address: observationally a refresh.
            }
        }
        Ok(())
    }

    /// Refresh an agent's heartbeat. Emits `agent.connected` when the agent
    /// was not Active before.
    pub fn heartbeat(&self, name: &str) -> Result<(), RegistryError> {
        let now = self.clock.epoch_secs();
        let previous = match self.store.touch_heartbeat(name, now) {
            Ok(status) => status,
            Err(StoreError::NotFound(_)) => {
                return Err(RegistryError::Unknown(name.to_string()))
            }
            Err(e) => {
                self.bus.dispatch(&Event::AgentHeartbeatFailed {
                    name: name.into(),
                    error: e.to_string(),
                });
                return Err(e.into());
            }
        };
        self.cache.invalidate(name);

        if previous != AgentStatus::Active {
            info!(agent = name, "agent reconnected");
            self.bus
                .dispatch(&Event::AgentConnected { name: name.into() });
        }
        Ok(())
    }

    /// Resolve a name to an address; the agent must be Active.
    pub fn resolve(&self, name: &str) -> Result<String, RegistryError> {
        let record = match self.store.get_agent(name) {
            Ok(record) => record,
            Err(StoreError::NotFound(_)) => {
                return Err(RegistryError::Unknown(name.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        // Dispatch gates on liveness, not just the stored status: a stale
        // Active row (sweep hasn't run yet) is still unusable.
        let now = self.clock.epoch_secs();
        let stale = record.heartbeat_stale(now, self.config.inactivity_threshold.as_secs());
        if record.status != AgentStatus::Active || stale {
            return Err(RegistryError::Inactive(name.to_string()));
        }
        Ok(record.address)
    }

    pub fn get(&self, name: &str) -> Result<AgentRecord, RegistryError> {
        match self.store.get_agent(name) {
            Ok(record) => Ok(record),
            Err(StoreError::NotFound(_)) => Err(RegistryError::Unknown(name.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list(&self, filter: &AgentFilter) -> Result<Vec<AgentRecord>, RegistryError> {
        Ok(self.store.list_agents(filter)?)
    }

    pub fn remove(&self, name: &str) -> Result<bool, RegistryError> {
        self.cache.invalidate(name);
        Ok(self.store.delete_agent(name)?)
    }

    /// One sweep pass: reclassify stale Active agents as Inactive (emitting
    /// `agent.disconnected`) and evict records past the eviction threshold.
    pub fn sweep(&self) -> Result<(), RegistryError> {
        let now = self.clock.epoch_secs();

        let active = self.store.list_agents(&AgentFilter {
            status: Some(AgentStatus::Active),
            tag: None,
        })?;
        for record in active {
            if record.heartbeat_stale(now, self.config.inactivity_threshold.as_secs()) {
                warn!(
                    agent = %record.name,
                    last_heartbeat = record.last_heartbeat,
                    "agent went silent, marking inactive"
                );
                self.store
                    .set_agent_status(record.name.as_str(), AgentStatus::Inactive, now)?;
                self.cache.invalidate(record.name.as_str());
                self.bus.dispatch(&Event::AgentDisconnected {
                    name: record.name.clone(),
                });
            }
        }

        let cutoff = now.saturating_sub(self.config.eviction_threshold.as_secs());
        let evicted = self.store.delete_agents_older_than(cutoff)?;
        if evicted > 0 {
            info!(evicted, "evicted agents past retention");
            self.cache.clear();
        }
        Ok(())
    }

    /// Run the sweep loop until cancelled. Spawned once per master.
    pub async fn run_sweeper(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep() {
                        warn!(error = %e, "registry sweep failed");
                    }
                }
                _ = cancel.cancelled() => return,
            }
        }
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
