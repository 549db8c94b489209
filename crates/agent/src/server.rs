// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task server: accepts master connections, admits or rejects work.
//!
//! One connection carries one request. `Execute` streams frames back on
//! the same connection; `Cancel` is answered immediately and routed to the
//! running stream through the task table.

use crate::executor::TaskExecutor;
use crate::task_table::TaskTable;
use sloth_adapters::Interpreter;
use sloth_proto::{
    auth_digest, digest_matches, read_msg, write_msg, AgentReply, Frame, Hello, HelloReply,
    MasterToAgent, ProtocolError, DEFAULT_IO_TIMEOUT, PROTOCOL_VERSION,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Write timeout for a single outbound frame. Generous: a master applying
/// backpressure is expected, a master gone for minutes is not.
const FRAME_WRITE_TIMEOUT: Duration = Duration::from_secs(120);

/// Serves `Execute`/`Cancel` for one agent process.
pub struct TaskServer<I> {
    executor: TaskExecutor<I>,
    table: TaskTable,
    slots: Arc<Semaphore>,
    auth: String,
}

impl<I: Interpreter> TaskServer<I> {
    pub fn new(executor: TaskExecutor<I>, table: TaskTable, max_tasks: usize, token: &str) -> Self {
        Self {
            executor,
            table,
            slots: Arc::new(Semaphore::new(max_tasks)),
            auth: auth_digest(token),
        }
    }

    /// Accept loop; runs until cancelled.
    pub async fn serve(self: Arc<Self>, listener: TcpListener, cancel: CancellationToken) {
        info!(addr = ?listener.local_addr().ok(), "task server listening");
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
                    info!("task server stopping");
                    return;
                }
            };

            let server = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = server.handle(socket).await {
                    debug!(%peer, error = %e, "connection ended with error");
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
        let version_ok = hello.version == PROTOCOL_VERSION;

        let request: MasterToAgent = read_msg(&mut socket, DEFAULT_IO_TIMEOUT).await?;
        match request {
            MasterToAgent::Cancel { task_id } => {
                let was_running = self.table.cancel(&task_id);
                debug!(task = %task_id, was_running, "cancel request");
                write_msg(&mut socket, &AgentReply::CancelOk, DEFAULT_IO_TIMEOUT).await
            }
            MasterToAgent::Execute { envelope } => {
                // Dispatch is refused across a protocol version gap even
                // though the handshake itself succeeded.
                if !version_ok {
                    warn!(
                        peer_version = hello.version,
                        "refusing dispatch from version-mismatched master"
                    );
                    return write_msg(
                        &mut socket,
                        &AgentReply::Err {
                            message: format!(
                                "protocol version mismatch: agent {}, master {}",
                                PROTOCOL_VERSION, hello.version
                            ),
                        },
                        DEFAULT_IO_TIMEOUT,
                    )
                    .await;
                }

                if let Err(message) = envelope.validate() {
                    return write_msg(
                        &mut socket,
                        &AgentReply::Err { message },
                        DEFAULT_IO_TIMEOUT,
                    )
                    .await;
                }

                // Admission: a full agent answers Busy, never queues.
                let Ok(slot) = Arc::clone(&self.slots).try_acquire_owned() else {
                    debug!(task = %envelope.task_id, "at capacity, rejecting");
                    return write_msg(&mut socket, &AgentReply::Busy, DEFAULT_IO_TIMEOUT).await;
                };

                write_msg(&mut socket, &AgentReply::Accepted, DEFAULT_IO_TIMEOUT).await?;
                let result = self.run_stream(&mut socket, envelope).await;
                drop(slot);
                result
            }
        }
    }

    async fn run_stream(
        &self,
        socket: &mut TcpStream,
        envelope: sloth_proto::TaskEnvelope,
    ) -> Result<(), ProtocolError> {
        let task_id = envelope.task_id.clone();
        let cancel = CancellationToken::new();
        self.table.insert(task_id.clone(), cancel.clone());

        let (frame_tx, mut frame_rx) = mpsc::channel::<Frame>(32);
        let executor = self.executor.clone();
        let exec_task = tokio::spawn(async move {
            executor.execute(envelope, frame_tx, cancel).await;
        });

        // Forward frames until the stream ends (sender dropped after
        // Final). A write failure means the master is gone; cancel the
        // execution so the child does not run unattended.
        let mut write_error = None;
        while let Some(frame) = frame_rx.recv().await {
            if let Err(e) = write_msg(socket, &frame, FRAME_WRITE_TIMEOUT).await {
                write_error = Some(e);
                break;
            }
        }

        if write_error.is_some() {
            self.table.cancel(&task_id);
        }
        let _ = exec_task.await;
        self.table.remove(&task_id);

        match write_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
