// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sloth Runner master daemon (`slothd`)
//!
//! Accepts agent registrations and heartbeats, client workflow
//! submissions, and registry/event/hook queries on one listener.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use clap::Parser;
use sloth_daemon::lifecycle::{self, Config, LifecycleError, Startup};
use sloth_daemon::listener::Listener;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Maximum log file size before rotation (10 MB).
const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Number of rotated log files to keep.
const MAX_ROTATED_LOGS: u32 = 3;

#[derive(Parser, Debug)]
#[command(name = "slothd", version, about = "Sloth Runner master daemon")]
struct Args {
    /// State directory (registry database, artifacts, logs)
    #[arg(long, default_value = ".sloth-cache")]
    state_dir: PathBuf,

    /// Listen address for agents and clients
    #[arg(long, default_value = "0.0.0.0:50050")]
    bind: String,

    /// File containing the shared authentication token
    #[arg(long)]
    token_file: PathBuf,

    /// Log to stderr instead of the state-dir log file
    #[arg(long)]
    log_stderr: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let token = std::fs::read_to_string(&args.token_file)
        .map_err(|e| format!("cannot read token file {}: {}", args.token_file.display(), e))?
        .trim()
        .to_string();
    if token.is_empty() {
        return Err("token file is empty".into());
    }

    let config = Config::new(&args.state_dir, &args.bind, &token);

    // Rotate before tracing opens the file.
    let log_path = config.state_dir.join("slothd.log");
    rotate_log_if_needed(&log_path);
    let _log_guard = setup_logging(&log_path, args.log_stderr)?;

    info!(version = env!("CARGO_PKG_VERSION"), "starting master");

    let Startup {
        master,
        listener: socket,
        background,
        lock: _lock,
    } = match lifecycle::startup(&config).await {
        Ok(startup) => startup,
        Err(LifecycleError::LockFailed(path)) => {
            let pid = std::fs::read_to_string(&path).unwrap_or_default();
            eprintln!("slothd is already running for {}", config.state_dir.display());
            let pid = pid.trim();
            if !pid.is_empty() {
                eprintln!("  pid: {pid}");
            }
            std::process::exit(1);
        }
        Err(e) => {
            error!("failed to start master: {e}");
            return Err(e.into());
        }
    };

    let listener = Arc::new(Listener::new(Arc::clone(&master), &token));
    let listener_cancel = CancellationToken::new();
    let shutdown_notify = Arc::clone(&listener.shutdown);
    let listener_task = tokio::spawn(
        Arc::clone(&listener).run(socket, listener_cancel.clone()),
    );

    info!(bind = %args.bind, "master ready");
    // Startup handshake for a supervising process.
    println!("READY");

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        _ = sigint.recv() => info!("received SIGINT, shutting down"),
        _ = shutdown_notify.notified() => info!("shutdown requested via protocol"),
    }

    // Teardown order: abort and drain in-flight workflows first so every
    // run records its terminal state, then close the listener, then stop
    // the background tasks.
    master.shutdown().await;
    listener_cancel.cancel();
    let _ = listener_task.await;
    background.cancel();
    info!("master stopped");
    Ok(())
}

/// Shift `slothd.log` → `.1` → `.2` → `.3`, dropping the oldest, once the
/// live file exceeds [`MAX_LOG_SIZE`]. Best-effort.
fn rotate_log_if_needed(log_path: &std::path::Path) {
    let size = match std::fs::metadata(log_path) {
        Ok(m) => m.len(),
        Err(_) => return,
    };
    if size < MAX_LOG_SIZE {
        return;
    }

    let log_str = log_path.display().to_string();
    for i in (1..MAX_ROTATED_LOGS).rev() {
        let from = format!("{log_str}.{i}");
        let to = format!("{log_str}.{}", i + 1);
        let _ = std::fs::rename(&from, &to);
    }
    let _ = std::fs::rename(log_path, format!("{log_str}.1"));
}

fn setup_logging(
    log_path: &std::path::Path,
    stderr: bool,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>, std::io::Error> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if stderr {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
        return Ok(None);
    }

    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let dir = log_path.parent().unwrap_or_else(|| std::path::Path::new("."));
    let file = log_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "slothd.log".into());
    let appender = tracing_appender::rolling::never(dir, file);
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();
    Ok(Some(guard))
}
