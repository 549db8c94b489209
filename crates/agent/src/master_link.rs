// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Registration and heartbeat client.
//!
//! Holds one connection to the master: register once, then heartbeat at
//! the interval the master assigned. Any failure tears the session down
//! and reconnects with capped exponential backoff.

use crate::config::AgentConfig;
use crate::sysinfo;
use sloth_proto::{
    auth_digest, read_msg, write_msg, AgentInfo, AgentToMaster, Hello, HelloReply, MasterReply,
    DEFAULT_IO_TIMEOUT, PROTOCOL_VERSION,
};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const RECONNECT_BASE: Duration = Duration::from_secs(1);
const RECONNECT_CAP: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
enum LinkError {
    #[error(transparent)]
    Protocol(#[from] sloth_proto::ProtocolError),

    #[error("connect failed: {0}")]
    Connect(std::io::Error),

    #[error("registration denied: {0}")]
    Denied(String),

    #[error("protocol version mismatch: master {master}, agent {agent}")]
    VersionMismatch { master: u32, agent: u32 },
}

/// Keeps this agent registered and live in the master's registry.
pub struct MasterLink {
    config: AgentConfig,
}

impl MasterLink {
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }

    fn info(&self) -> AgentInfo {
        AgentInfo {
            name: self.config.name.clone(),
            address: self.config.advertise.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            tags: self.config.tags.clone(),
            system: sysinfo::fingerprint(),
        }
    }

    /// Run until cancelled, reconnecting on every failure.
    pub async fn run(self, cancel: CancellationToken) {
        let mut backoff = RECONNECT_BASE;
        loop {
            match self.session(&cancel).await {
                Ok(()) => return, // cancelled
                Err(LinkError::VersionMismatch { master, agent }) => {
                    // A mismatched master will not accept us until one side
                    // is upgraded; keep retrying slowly so an upgrade on
                    // either end reconnects without a restart.
                    error!(master, agent, "protocol version mismatch, refusing dispatch");
                    backoff = RECONNECT_CAP;
                }
                Err(e) => {
                    warn!(error = %e, "master session ended, reconnecting");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = cancel.cancelled() => return,
            }
            backoff = (backoff * 2).min(RECONNECT_CAP);
        }
    }

    /// One connected session: register, then heartbeat until failure or
    /// cancellation. `Ok(())` means cancellation.
    async fn session(&self, cancel: &CancellationToken) -> Result<(), LinkError> {
        let mut stream = TcpStream::connect(&self.config.master)
            .await
            .map_err(LinkError::Connect)?;

        write_msg(
            &mut stream,
            &Hello {
                version: PROTOCOL_VERSION,
                auth_digest: auth_digest(&self.config.token),
            },
            DEFAULT_IO_TIMEOUT,
        )
        .await?;
        let reply: HelloReply = read_msg(&mut stream, DEFAULT_IO_TIMEOUT).await?;
        match reply {
            HelloReply::Ok { version } if version == PROTOCOL_VERSION => {}
            HelloReply::Ok { version } => {
                return Err(LinkError::VersionMismatch {
                    master: version,
                    agent: PROTOCOL_VERSION,
                });
            }
            HelloReply::Denied { reason } => return Err(LinkError::Denied(reason)),
        }

        write_msg(
            &mut stream,
            &AgentToMaster::Register { info: self.info() },
            DEFAULT_IO_TIMEOUT,
        )
        .await?;
        let reply: MasterReply = read_msg(&mut stream, DEFAULT_IO_TIMEOUT).await?;
        let interval = match reply {
            MasterReply::RegisterOk {
                server_version,
                heartbeat_interval_ms,
            } => {
                info!(
                    master = %self.config.master,
                    %server_version,
                    "registered with master"
                );
                if heartbeat_interval_ms == 0 {
                    self.config.heartbeat_interval
                } else {
                    Duration::from_millis(heartbeat_interval_ms.max(1000))
                }
            }
            MasterReply::Err { message } => return Err(LinkError::Denied(message)),
            MasterReply::HeartbeatOk => {
                return Err(LinkError::Denied("unexpected heartbeat ack".to_string()))
            }
        };

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = cancel.cancelled() => return Ok(()),
            }

            write_msg(
                &mut stream,
                &AgentToMaster::Heartbeat {
                    name: self.config.name.clone(),
                },
                DEFAULT_IO_TIMEOUT,
            )
            .await?;
            let reply: MasterReply = read_msg(&mut stream, DEFAULT_IO_TIMEOUT).await?;
            match reply {
                MasterReply::HeartbeatOk => {
                    debug!("heartbeat acknowledged");
                }
                MasterReply::Err { message } => return Err(LinkError::Denied(message)),
                MasterReply::RegisterOk { .. } => {
                    return Err(LinkError::Denied("unexpected register ack".to_string()))
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "master_link_tests.rs"]
mod tests;
