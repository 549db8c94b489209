// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sloth Runner CLI (`sloth`)
//!
//! Submits workflows and queries the registry, event log, and hooks over
//! the same wire protocol endpoints the agents use.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod client;
mod output;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use client::Client;
use sloth_core::{HookDef, HookName, HookSource};
use sloth_daemon::protocol::{Request, Response};
use sloth_workflow::WorkflowSpec;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "sloth", version, about = "Sloth Runner client")]
struct Cli {
    /// Master endpoint
    #[arg(long, global = true, default_value = "127.0.0.1:50050")]
    master: String,

    /// File containing the shared authentication token
    #[arg(long, global = true, default_value = ".sloth-token")]
    token_file: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit a workflow definition and wait for its report
    Run {
        /// Workflow record (JSON)
        file: PathBuf,
        /// Validate without executing
        #[arg(long)]
        validate: bool,
        /// Print the raw report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Cancel a running workflow by id
    Cancel { workflow_id: String },
    /// Inspect registered agents
    Agent {
        #[command(subcommand)]
        command: AgentCommand,
    },
    /// Query the event log
    Events {
        /// Selector: exact tag, `category.*`, or `*`
        #[arg(long)]
        tag: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Manage event hooks
    Hook {
        #[command(subcommand)]
        command: HookCommand,
    },
    /// Master daemon control
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

#[derive(Subcommand, Debug)]
enum AgentCommand {
    /// List agents, optionally filtered
    List {
        #[arg(long)]
        status: Option<String>,
        /// Tag filter: `key` or `key=value`
        #[arg(long)]
        tag: Option<String>,
    },
    /// Show one agent in full
    Get { name: String },
    /// Remove an agent record
    Rm { name: String },
}

#[derive(Subcommand, Debug)]
enum HookCommand {
    /// Register (or replace) a hook
    Add {
        name: String,
        /// Event selector the hook listens on
        #[arg(long)]
        selector: String,
        /// Script file to run
        #[arg(long, conflicts_with = "inline")]
        file: Option<PathBuf>,
        /// Inline script source
        #[arg(long)]
        inline: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    List,
    Rm { name: String },
    Enable { name: String },
    Disable { name: String },
    /// Show a hook's recent invocations
    Runs {
        name: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Subcommand, Debug)]
enum DaemonCommand {
    Status,
    Stop,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let token = std::fs::read_to_string(&cli.token_file)
        .with_context(|| format!("cannot read token file {}", cli.token_file.display()))?
        .trim()
        .to_string();
    let client = Client::new(&cli.master, &token);

    match cli.command {
        Command::Run {
            file,
            validate,
            json,
        } => run_workflow(&client, &file, validate, json).await,
        Command::Cancel { workflow_id } => {
            let response = client
                .request(&Request::CancelWorkflow {
                    id: workflow_id.clone().into(),
                })
                .await?;
            match response {
                Response::Cancelling { found: true } => {
                    println!("cancelling {workflow_id}");
                    Ok(())
                }
                Response::Cancelling { found: false } => {
                    bail!("no running workflow with id {workflow_id}")
                }
                other => bail!("unexpected reply: {other:?}"),
            }
        }
        Command::Agent { command } => agent_command(&client, command).await,
        Command::Events { tag, limit } => {
            let response = client
                .request(&Request::ListEvents {
                    selector: tag,
                    limit,
                })
                .await?;
            let Response::Events { events } = response else {
                bail!("unexpected reply: {response:?}");
            };
            print!("{}", output::events_table(&events));
            Ok(())
        }
        Command::Hook { command } => hook_command(&client, command).await,
        Command::Daemon { command } => daemon_command(&client, command).await,
    }
}

async fn run_workflow(client: &Client, file: &std::path::Path, validate: bool, json: bool) -> Result<()> {
    let source = std::fs::read_to_string(file)
        .with_context(|| format!("cannot read workflow file {}", file.display()))?;
    let spec: WorkflowSpec = serde_json::from_str(&source)
        .with_context(|| format!("invalid workflow record in {}", file.display()))?;

    if validate {
        let response = client
            .request(&Request::Submit {
                spec,
                validate_only: true,
            })
            .await?;
        let Response::Validated { name, tasks } = response else {
            bail!("unexpected reply: {response:?}");
        };
        println!("workflow '{name}' is valid ({tasks} task(s))");
        return Ok(());
    }

    let report = client
        .submit(spec, |id| eprintln!("running workflow {id}"))
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", output::report_table(&report));
    }
    if report.success {
        Ok(())
    } else {
        std::process::exit(1);
    }
}

async fn agent_command(client: &Client, command: AgentCommand) -> Result<()> {
    match command {
        AgentCommand::List { status, tag } => {
            let response = client.request(&Request::ListAgents { status, tag }).await?;
            let Response::Agents { agents } = response else {
                bail!("unexpected reply: {response:?}");
            };
            print!("{}", output::agents_table(&agents));
            Ok(())
        }
        AgentCommand::Get { name } => {
            let response = client.request(&Request::GetAgent { name }).await?;
            let Response::Agent { agent } = response else {
                bail!("unexpected reply: {response:?}");
            };
            println!("{}", serde_json::to_string_pretty(&agent)?);
            Ok(())
        }
        AgentCommand::Rm { name } => {
            let response = client
                .request(&Request::RemoveAgent { name: name.clone() })
                .await?;
            match response {
                Response::Removed { existed: true } => {
                    println!("removed agent {name}");
                    Ok(())
                }
                Response::Removed { existed: false } => bail!("no agent named {name}"),
                other => bail!("unexpected reply: {other:?}"),
            }
        }
    }
}

async fn hook_command(client: &Client, command: HookCommand) -> Result<()> {
    match command {
        HookCommand::Add {
            name,
            selector,
            file,
            inline,
            description,
        } => {
            let source = match (file, inline) {
                (Some(path), None) => HookSource::File(path),
                (None, Some(source)) => HookSource::Inline(source),
                _ => bail!("exactly one of --file or --inline is required"),
            };
            let def = HookDef {
                name: HookName::new(&name),
                selector,
                source,
                enabled: true,
                description,
                created_at: chrono::Utc::now().timestamp() as u64,
            };
            client.request(&Request::PutHook { def }).await?;
            println!("hook {name} registered");
            Ok(())
        }
        HookCommand::List => {
            let response = client.request(&Request::ListHooks).await?;
            let Response::Hooks { hooks } = response else {
                bail!("unexpected reply: {response:?}");
            };
            print!("{}", output::hooks_table(&hooks));
            Ok(())
        }
        HookCommand::Rm { name } => {
            let response = client
                .request(&Request::DeleteHook { name: name.clone() })
                .await?;
            match response {
                Response::Removed { existed: true } => {
                    println!("deleted hook {name}");
                    Ok(())
                }
                Response::Removed { existed: false } => bail!("no hook named {name}"),
                other => bail!("unexpected reply: {other:?}"),
            }
        }
        HookCommand::Enable { name } => {
            client
                .request(&Request::SetHookEnabled {
                    name: name.clone(),
                    enabled: true,
                })
                .await?;
            println!("hook {name} enabled");
            Ok(())
        }
        HookCommand::Disable { name } => {
            client
                .request(&Request::SetHookEnabled {
                    name: name.clone(),
                    enabled: false,
                })
                .await?;
            println!("hook {name} disabled");
            Ok(())
        }
        HookCommand::Runs { name, limit } => {
            let response = client.request(&Request::HookRuns { name, limit }).await?;
            let Response::HookRuns { runs } = response else {
                bail!("unexpected reply: {response:?}");
            };
            print!("{}", output::hook_runs_table(&runs));
            Ok(())
        }
    }
}

async fn daemon_command(client: &Client, command: DaemonCommand) -> Result<()> {
    match command {
        DaemonCommand::Status => {
            let response = client.request(&Request::Status).await?;
            let Response::Status { status } = response else {
                bail!("unexpected reply: {response:?}");
            };
            println!("slothd {} (schema v{})", status.version, status.schema_version);
            println!("  uptime: {}s", status.uptime_secs);
            println!(
                "  agents: {} active, {} inactive",
                status.agents_active, status.agents_inactive
            );
            println!("  running workflows: {}", status.running_workflows);
            Ok(())
        }
        DaemonCommand::Stop => {
            client.request(&Request::Shutdown).await?;
            println!("shutdown requested");
            Ok(())
        }
    }
}
