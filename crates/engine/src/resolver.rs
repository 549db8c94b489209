// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Resolver façade: turn a `delegate_to` value into a callable endpoint.

use crate::registry::{AgentRegistry, RegistryError};
use async_trait::async_trait;
use parking_lot::Mutex;
use sloth_core::{Clock, TaskError, TaskErrorKind};
use sloth_workflow::DelegateSpec;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Classified `delegate_to` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delegate {
    Local,
    /// Direct `host:port`, no registry consultation.
    Address(String),
    /// Logical agent name, resolved through the registry.
    Name(String),
    /// Inline agent record: transient, unregistered, credentials supplied.
    Inline {
        address: String,
        token: Option<String>,
    },
}

/// Where a task actually executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Local,
    Remote {
        address: String,
        /// Credential override for inline agents.
        token: Option<String>,
    },
}

impl Endpoint {
    /// Label used in `task.started` events.
    pub fn label(&self) -> String {
        match self {
            Endpoint::Local => "local".to_string(),
            Endpoint::Remote { address, .. } => address.clone(),
        }
    }
}

/// Classify a raw `delegate_to` value.
///
/// Absent or `"local"` means local execution; a string with a valid
/// `host:port` shape is a direct address; anything else is an agent name.
pub fn classify_delegate(spec: Option<&DelegateSpec>) -> Delegate {
    match spec {
        None => Delegate::Local,
        Some(DelegateSpec::Inline(inline)) => Delegate::Inline {
            address: inline.address.clone(),
            token: inline.token.clone(),
        },
        Some(DelegateSpec::Target(target)) => {
            if target == "local" {
                return Delegate::Local;
            }
            if is_host_port(target) {
                return Delegate::Address(target.clone());
            }
            Delegate::Name(target.clone())
        }
    }
}

fn is_host_port(s: &str) -> bool {
    match s.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}

/// Shared name → address memo with TTL, invalidated on registry writes.
#[derive(Clone, Default)]
pub struct ResolverCache {
    entries: Arc<Mutex<HashMap<String, CacheEntry>>>,
}

struct CacheEntry {
    address: String,
    expires_at: Instant,
}

impl ResolverCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, name: &str, now: Instant) -> Option<String> {
        let entries = self.entries.lock();
        entries
            .get(name)
            .filter(|e| e.expires_at > now)
            .map(|e| e.address.clone())
    }

    fn put(&self, name: &str, address: String, expires_at: Instant) {
        self.entries
            .lock()
            .insert(name.to_string(), CacheEntry { address, expires_at });
    }

    /// Drop one name (any registry write for that agent).
    pub fn invalidate(&self, name: &str) {
        self.entries.lock().remove(name);
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

/// Resolution configuration.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub cache_ttl: Duration,
    /// Attempts for transient store failures before giving up.
    pub retry_attempts: u32,
    pub retry_backoff: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(60),
            retry_attempts: 3,
            retry_backoff: Duration::from_millis(200),
        }
    }
}

/// What the scheduler needs from a resolver.
#[async_trait]
pub trait EndpointResolver: Send + Sync + 'static {
    async fn resolve(&self, delegate: &Delegate) -> Result<Endpoint, TaskError>;
}

/// Fixed name → address table. Used in tests and single-process setups
/// where no registry is running; unknown names fail as unknown agents.
#[derive(Clone, Default)]
pub struct TableResolver {
    table: Arc<Mutex<HashMap<String, String>>>,
}

impl TableResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: &str, address: &str) {
        self.table
            .lock()
            .insert(name.to_string(), address.to_string());
    }
}

#[async_trait]
impl EndpointResolver for TableResolver {
    async fn resolve(&self, delegate: &Delegate) -> Result<Endpoint, TaskError> {
        match delegate {
            Delegate::Local => Ok(Endpoint::Local),
            Delegate::Address(address) => Ok(Endpoint::Remote {
                address: address.clone(),
                token: None,
            }),
            Delegate::Inline { address, token } => Ok(Endpoint::Remote {
                address: address.clone(),
                token: token.clone(),
            }),
            Delegate::Name(name) => match self.table.lock().get(name) {
                Some(address) => Ok(Endpoint::Remote {
                    address: address.clone(),
                    token: None,
                }),
                None => Err(TaskError::new(
                    TaskErrorKind::UnknownAgent,
                    format!("no agent named '{}'", name),
                )),
            },
        }
    }
}

/// The single query surface the scheduler uses for dispatch targets.
#[derive(Clone)]
pub struct Resolver<C: Clock> {
    registry: AgentRegistry<C>,
    cache: ResolverCache,
    config: ResolverConfig,
}

impl<C: Clock> Resolver<C> {
    pub fn new(registry: AgentRegistry<C>, config: ResolverConfig) -> Self {
        // Share the registry's cache handle so writes invalidate us.
        let cache = registry.resolver_cache();
        Self {
            registry,
            cache,
            config,
        }
    }

    /// Resolve a delegate to an endpoint.
    ///
    /// Name lookups retry transient store failures per config, then fail
    /// with `resolution_transient`. Unknown and inactive agents are
    /// non-retryable.
    async fn resolve_delegate(&self, delegate: &Delegate) -> Result<Endpoint, TaskError> {
        match delegate {
            Delegate::Local => Ok(Endpoint::Local),
            Delegate::Address(address) => Ok(Endpoint::Remote {
                address: address.clone(),
                token: None,
            }),
            Delegate::Inline { address, token } => Ok(Endpoint::Remote {
                address: address.clone(),
                token: token.clone(),
            }),
            Delegate::Name(name) => self.resolve_name(name).await,
        }
    }

    async fn resolve_name(&self, name: &str) -> Result<Endpoint, TaskError> {
        let now = Instant::now();
        if let Some(address) = self.cache.get(name, now) {
            debug!(agent = name, %address, "resolver cache hit");
            return Ok(Endpoint::Remote {
                address,
                token: None,
            });
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.registry.resolve(name) {
                Ok(address) => {
                    self.cache
                        .put(name, address.clone(), now + self.config.cache_ttl);
                    return Ok(Endpoint::Remote {
                        address,
                        token: None,
                    });
                }
                Err(RegistryError::Unknown(name)) => {
                    return Err(TaskError::new(
                        TaskErrorKind::UnknownAgent,
                        format!("no agent named '{}'", name),
                    ));
                }
                Err(RegistryError::Inactive(name)) => {
                    return Err(TaskError::new(
                        TaskErrorKind::AgentInactive,
                        format!("agent '{}' is not active", name),
                    ));
                }
                Err(RegistryError::Store(e)) if e.is_retryable() => {
                    if attempt >= self.config.retry_attempts {
                        return Err(TaskError::new(
                            TaskErrorKind::ResolutionTransient,
                            format!("registry lookup for '{}' failed: {}", name, e),
                        ));
                    }
                    tokio::time::sleep(self.config.retry_backoff).await;
                }
                Err(RegistryError::Store(e)) => {
                    return Err(TaskError::new(
                        TaskErrorKind::StorageError,
                        format!("registry lookup for '{}' failed: {}", name, e),
                    ));
                }
            }
        }
    }
}

#[async_trait]
impl<C: Clock> EndpointResolver for Resolver<C> {
    async fn resolve(&self, delegate: &Delegate) -> Result<Endpoint, TaskError> {
        self.resolve_delegate(delegate).await
    }
}

#[cfg(test)]
#[path = "resolver_tests.rs"]
mod tests;
