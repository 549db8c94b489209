// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sloth Runner agent (`sloth-agent`)
//!
//! Long-lived per-host process: registers with the master, heartbeats,
//! and executes dispatched tasks.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use clap::Parser;
use sloth_adapters::CommandInterpreter;
use sloth_agent::{AgentConfig, MasterLink, TaskExecutor, TaskServer, TaskTable};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "sloth-agent", version, about = "Sloth Runner agent")]
struct Args {
    /// Unique agent name workflows delegate to
    #[arg(long)]
    name: String,

    /// Listen address for task execution
    #[arg(long, default_value = "0.0.0.0:50051")]
    bind: String,

    /// Address the master should dial (defaults to --bind)
    #[arg(long)]
    advertise: Option<String>,

    /// Master endpoint for registration and heartbeats
    #[arg(long)]
    master: String,

    /// File containing the shared authentication token
    #[arg(long)]
    token_file: PathBuf,

    /// Concurrent task limit (defaults to the CPU count)
    #[arg(long)]
    max_tasks: Option<usize>,

    /// State directory for task workdirs
    #[arg(long, default_value = ".sloth-agent")]
    state_dir: PathBuf,

    /// Tags reported at registration, `key=value`, repeatable
    #[arg(long = "tag")]
    tags: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let token = std::fs::read_to_string(&args.token_file)
        .map_err(|e| format!("cannot read token file {}: {}", args.token_file.display(), e))?
        .trim()
        .to_string();
    if token.is_empty() {
        return Err("token file is empty".into());
    }

    let mut config = AgentConfig::defaults(&args.name, &args.bind, &args.master, &token);
    config.advertise = args.advertise.unwrap_or_else(|| args.bind.clone());
    config.state_dir = args.state_dir.clone();
    if let Some(max) = args.max_tasks {
        config.max_concurrent_tasks = max.max(1);
    }
    for tag in &args.tags {
        match tag.split_once('=') {
            Some((key, value)) => {
                config.tags.insert(key.to_string(), value.to_string());
            }
            None => {
                config.tags.insert(tag.clone(), String::new());
            }
        }
    }

    info!(
        name = %config.name,
        bind = %config.bind,
        master = %config.master,
        max_tasks = config.max_concurrent_tasks,
        "starting agent"
    );

    let listener = TcpListener::bind(&config.bind).await?;
    let cancel = CancellationToken::new();

    let executor = TaskExecutor::new(
        CommandInterpreter::with_cancel_grace(config.cancel_grace),
        config.state_dir.join("work"),
        config.cancel_grace,
    );
    let server = Arc::new(TaskServer::new(
        executor,
        TaskTable::new(),
        config.max_concurrent_tasks,
        &config.token,
    ));
    let server_task = tokio::spawn(Arc::clone(&server).serve(listener, cancel.clone()));

    let link = MasterLink::new(config);
    let link_task = tokio::spawn(link.run(cancel.clone()));

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        _ = sigint.recv() => info!("received SIGINT, shutting down"),
    }

    cancel.cancel();
    if let Err(e) = server_task.await {
        error!(error = %e, "task server ended abnormally");
    }
    if let Err(e) = link_task.await {
        error!(error = %e, "master link ended abnormally");
    }
    info!("agent stopped");
    Ok(())
}
