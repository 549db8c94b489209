// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Listener: one TCP accept loop serving agents and clients.
//!
//! Each connection authenticates with a `Hello`, then issues requests in a
//! loop. Agent connections stay open for heartbeats; client connections
//! usually carry one request and close.

use crate::master::Master;
use crate::protocol::{Request, Response};
use sloth_core::AgentStatus;
use sloth_proto::{
    auth_digest, digest_matches, read_msg, write_msg, Hello, HelloReply, ProtocolError,
    DEFAULT_IO_TIMEOUT, PROTOCOL_VERSION,
};
use sloth_storage::AgentFilter;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Idle read window. Agents heartbeat every 30 s; triple that before a
/// silent connection is dropped.
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(90);

pub struct Listener {
    master: Arc<Master>,
    auth: String,
    /// Tripped by a `Shutdown` request; main observes it.
    pub shutdown: Arc<Notify>,
}

impl Listener {
    pub fn new(master: Arc<Master>, token: &str) -> Self {
        Self {
            master,
            auth: auth_digest(token),
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub async fn run(self: Arc<Self>, listener: TcpListener, cancel: CancellationToken) {
        info!(addr = ?listener.local_addr().ok(), "listener ready");
        loop {
            let (socket, peer) = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                },
                _ = cancel.cancelled() => {
                    info!("listener stopping");
                    return;
                }
            };

            let this = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = this.handle(socket).await {
                    debug!(%peer, error = %e, "connection closed");
                }
            });
        }
    }

    async fn handle(&self, mut socket: TcpStream) -> Result<(), ProtocolError> {
        let hello: Hello = read_msg(&mut socket, DEFAULT_IO_TIMEOUT).await?;
        if !digest_matches(&self.auth, &hello.auth_digest) {
            write_msg(
                &mut socket,
                &HelloReply::Denied {
                    reason: "credentials rejected".to_string(),
                },
                DEFAULT_IO_TIMEOUT,
            )
            .await?;
            return Ok(());
        }
        write_msg(
            &mut socket,
            &HelloReply::Ok {
                version: PROTOCOL_VERSION,
            },
            DEFAULT_IO_TIMEOUT,
        )
        .await?;

        loop {
            let request: Request = match read_msg(&mut socket, REQUEST_READ_TIMEOUT).await {
                Ok(request) => request,
                Err(ProtocolError::ConnectionClosed) => return Ok(()),
                Err(e) => return Err(e),
            };

            match request {
                Request::Submit {
                    spec,
                    validate_only,
                } => {
                    if validate_only {
                        let response = self.master.validate_only(spec);
                        write_msg(&mut socket, &response, DEFAULT_IO_TIMEOUT).await?;
                        continue;
                    }
                    // Submitted goes out first so the client can cancel;
                    // Report follows when the run terminates.
                    let (accepted_tx, accepted_rx) =
                        tokio::sync::oneshot::channel::<Response>();
                    let master = Arc::clone(&self.master);
                    let run = tokio::spawn(async move {
                        master
                            .submit(spec, |id| {
                                let _ = accepted_tx.send(Response::Submitted {
                                    workflow_id: id.clone(),
                                });
                            })
                            .await
                    });

                    if let Ok(submitted) = accepted_rx.await {
                        write_msg(&mut socket, &submitted, DEFAULT_IO_TIMEOUT).await?;
                    }
                    let response = match run.await {
                        Ok(response) => response,
                        Err(e) => Response::err(format!("workflow runner panicked: {e}")),
                    };
                    write_msg(&mut socket, &response, DEFAULT_IO_TIMEOUT).await?;
                }
                other => {
                    let response = self.dispatch(other, hello.version).await;
                    write_msg(&mut socket, &response, DEFAULT_IO_TIMEOUT).await?;
                }
            }
        }
    }

    async fn dispatch(&self, request: Request, peer_version: u32) -> Response {
        match request {
            Request::Register { info } => {
                if peer_version != PROTOCOL_VERSION {
                    self.master.bus.dispatch(&sloth_core::Event::AgentVersionMismatch {
                        name: info.name.clone(),
                        agent_version: peer_version,
                        master_version: PROTOCOL_VERSION,
                    });
                    return Response::err("protocol version mismatch");
                }
                match self.master.registry.register(&info) {
                    Ok(()) => Response::RegisterOk {
                        server_version: env!("CARGO_PKG_VERSION").to_string(),
                        heartbeat_interval_ms: self.master.heartbeat_interval_ms,
                    },
                    Err(e) => Response::err(e),
                }
            }

            Request::Heartbeat { name } => match self.master.registry.heartbeat(name.as_str()) {
                Ok(()) => Response::HeartbeatOk,
                Err(e) => Response::err(e),
            },

            Request::CancelWorkflow { id } => self.master.cancel_workflow(&id),

            Request::ListAgents { status, tag } => {
                let status = match status.as_deref() {
                    None => None,
                    Some(s) => match s.parse::<AgentStatus>() {
                        Ok(status) => Some(status),
                        Err(e) => return Response::err(e),
                    },
                };
                match self.master.registry.list(&AgentFilter { status, tag }) {
                    Ok(agents) => Response::Agents { agents },
                    Err(e) => Response::err(e),
                }
            }

            Request::GetAgent { name } => match self.master.registry.get(&name) {
                Ok(agent) => Response::Agent {
                    agent: Box::new(agent),
                },
                Err(e) => Response::err(e),
            },

            Request::RemoveAgent { name } => match self.master.registry.remove(&name) {
                Ok(existed) => Response::Removed { existed },
                Err(e) => Response::err(e),
            },

            Request::ListEvents { selector, limit } => {
                match self.master.store.list_events(selector.as_deref(), limit) {
                    Ok(events) => Response::Events { events },
                    Err(e) => Response::err(e),
                }
            }

            Request::PutHook { def } => match self.master.store.put_hook(&def) {
                Ok(()) => Response::Ok,
                Err(e) => Response::err(e),
            },

            Request::ListHooks => match self.master.store.list_hooks() {
                Ok(hooks) => Response::Hooks { hooks },
                Err(e) => Response::err(e),
            },

            Request::DeleteHook { name } => match self.master.store.delete_hook(&name) {
                Ok(existed) => Response::Removed { existed },
                Err(e) => Response::err(e),
            },

            Request::SetHookEnabled { name, enabled } => {
                match self.master.store.set_hook_enabled(&name, enabled) {
                    Ok(()) => Response::Ok,
                    Err(e) => Response::err(e),
                }
            }

            Request::HookRuns { name, limit } => {
                match self.master.store.list_hook_runs(&name, limit) {
                    Ok(runs) => Response::HookRuns { runs },
                    Err(e) => Response::err(e),
                }
            }

            Request::Status => match self.master.status() {
                Ok(status) => Response::Status { status },
                Err(e) => Response::err(e),
            },

            Request::Shutdown => {
                info!("shutdown requested via protocol");
                self.shutdown.notify_one();
                Response::Ok
            }

            // Handled by the connection loop.
            Request::Submit { .. } => Response::err("unreachable"),
        }
    }
}

#[cfg(test)]
#[path = "listener_tests.rs"]
mod tests;
