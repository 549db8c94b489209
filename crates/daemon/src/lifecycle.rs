// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Master startup and teardown.
//!
//! Startup order: lock file, registry store (with corruption recovery),
//! hook runner, event bus, registry + sweeper, resolver, dispatcher,
//! listener socket. Teardown aborts in-flight workflows, emits
//! `system.shutdown`, and releases the lock.

use crate::master::Master;
use fs2::FileExt;
use sloth_adapters::CommandInterpreter;
use sloth_core::{Event, SystemClock};
use sloth_engine::{
    AgentRegistry, ArtifactStaging, EventBus, ExecRouter, HookRunner, HookRunnerConfig,
    LocalDispatcher, RegistryConfig, RemoteDispatcher, Resolver, SchedulerConfig, TaskLogger,
};
use sloth_engine::resolver::ResolverConfig;
use sloth_storage::RegistryStore;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Event log retention: 7 days or 10 000 rows, whichever first.
const EVENT_RETENTION_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);
const EVENT_RETENTION_COUNT: usize = 10_000;
const EVENT_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("another master holds the lock at {0}")]
    LockFailed(PathBuf),

    #[error("store error: {0}")]
    Store(#[from] sloth_storage::StoreError),

    #[error("cannot bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
}

/// Paths and knobs for one master process.
#[derive(Debug, Clone)]
pub struct Config {
    /// State root (default `.sloth-cache/`).
    pub state_dir: PathBuf,
    pub bind: String,
    pub token: String,
}

impl Config {
    pub fn new(state_dir: impl Into<PathBuf>, bind: &str, token: &str) -> Self {
        Self {
            state_dir: state_dir.into(),
            bind: bind.to_string(),
            token: token.to_string(),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.state_dir.join("registry.db")
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.state_dir.join("artifacts")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.state_dir.join("logs")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.state_dir.join("master.lock")
    }
}

/// Holds the exclusive state-dir lock for the process lifetime.
pub struct LockGuard(#[allow(dead_code)] File);

/// Everything `main` needs after startup.
pub struct Startup {
    pub master: Arc<Master>,
    pub listener: TcpListener,
    /// Root cancellation for background tasks (sweeper, pruner).
    pub background: CancellationToken,
    /// Released when dropped; keep it alive for the process lifetime.
    pub lock: LockGuard,
}

/// Bring the master up.
pub async fn startup(config: &Config) -> Result<Startup, LifecycleError> {
    std::fs::create_dir_all(&config.state_dir)?;

    // Exactly one master per state directory. Open without truncating so
    // a failed lock leaves the owner's pid intact.
    let lock_path = config.lock_path();
    let mut lock = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)?;
    if lock.try_lock_exclusive().is_err() {
        return Err(LifecycleError::LockFailed(lock_path));
    }
    lock.set_len(0)?;
    let _ = writeln!(lock, "{}", std::process::id());

    let opened = RegistryStore::open(&config.db_path())?;
    let store = Arc::new(opened.store);
    info!(
        db = %config.db_path().display(),
        schema = store.schema_version(),
        "registry store open"
    );

    let interpreter = CommandInterpreter::new();

    // Hook runner first so the bus can fan out from the first event.
    let hook_runner = HookRunner::new(
        Arc::clone(&store),
        interpreter.clone(),
        HookRunnerConfig::default(),
    );
    let (hook_tx, _hook_handle) = hook_runner.spawn();
    let bus = EventBus::new(Arc::clone(&store)).with_hook_runner(hook_tx);

    if opened.recovered {
        warn!("registry database was corrupt and has been rotated");
        bus.dispatch(&Event::StateCorrupted {
            path: config.db_path().display().to_string(),
        });
    }

    let registry = AgentRegistry::new(
        Arc::clone(&store),
        bus.clone(),
        SystemClock,
        RegistryConfig::default(),
    );
    let resolver = Arc::new(Resolver::new(registry.clone(), ResolverConfig::default()));

    let scheduler_config = SchedulerConfig::default();
    let dispatcher = Arc::new(ExecRouter::new(
        LocalDispatcher::new(interpreter.clone(), config.state_dir.join("work")),
        RemoteDispatcher::new(&config.token)
            .with_cancel_grace(scheduler_config.cancel_grace),
    ));

    let master = Arc::new(Master::new(
        Arc::clone(&store),
        bus.clone(),
        registry.clone(),
        resolver,
        dispatcher,
        interpreter,
        ArtifactStaging::new(config.artifacts_dir()),
        TaskLogger::new(config.logs_dir()),
        scheduler_config,
    ));

    // Background tasks: registry sweep and event-log retention.
    let background = CancellationToken::new();
    tokio::spawn(registry.run_sweeper(background.child_token()));
    {
        let bus = bus.clone();
        let cancel = background.child_token();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(EVENT_PRUNE_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => bus.prune(EVENT_RETENTION_AGE, EVENT_RETENTION_COUNT),
                    _ = cancel.cancelled() => return,
                }
            }
        });
    }

    let listener = TcpListener::bind(&config.bind)
        .await
        .map_err(|source| LifecycleError::Bind {
            addr: config.bind.clone(),
            source,
        })?;

    bus.dispatch(&Event::SystemStartup {
        version: env!("CARGO_PKG_VERSION").to_string(),
    });

    Ok(Startup {
        master,
        listener,
        background,
        lock: LockGuard(lock),
    })
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
