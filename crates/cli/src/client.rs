// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Thin client over the master's wire protocol.

use anyhow::{anyhow, bail, Context, Result};
use sloth_daemon::protocol::{Request, Response};
use sloth_proto::{
    auth_digest, read_msg, write_msg, Hello, HelloReply, DEFAULT_IO_TIMEOUT, PROTOCOL_VERSION,
};
use std::time::Duration;
use tokio::net::TcpStream;

/// Reports can take as long as the workflow runs; wait generously.
const REPORT_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

pub struct Client {
    address: String,
    token: String,
}

impl Client {
    pub fn new(address: &str, token: &str) -> Self {
        Self {
            address: address.to_string(),
            token: token.to_string(),
        }
    }

    async fn connect(&self) -> Result<TcpStream> {
        let mut stream = TcpStream::connect(&self.address)
            .await
            .with_context(|| format!("cannot reach master at {}", self.address))?;

        write_msg(
            &mut stream,
            &Hello {
                version: PROTOCOL_VERSION,
                auth_digest: auth_digest(&self.token),
            },
            DEFAULT_IO_TIMEOUT,
        )
        .await?;
        let reply: HelloReply = read_msg(&mut stream, DEFAULT_IO_TIMEOUT).await?;
        match reply {
            HelloReply::Ok { version } if version == PROTOCOL_VERSION => Ok(stream),
            HelloReply::Ok { version } => bail!(
                "protocol version mismatch: master speaks v{version}, this client v{PROTOCOL_VERSION}"
            ),
            HelloReply::Denied { reason } => bail!("master refused connection: {reason}"),
        }
    }

    /// One request, one response.
    pub async fn request(&self, request: &Request) -> Result<Response> {
        let mut stream = self.connect().await?;
        write_msg(&mut stream, request, DEFAULT_IO_TIMEOUT).await?;
        let response: Response = read_msg(&mut stream, DEFAULT_IO_TIMEOUT).await?;
        fail_on_err(response)
    }

    /// Submit a workflow: returns the id as soon as the master accepts,
    /// then the terminal report.
    pub async fn submit(
        &self,
        spec: sloth_workflow::WorkflowSpec,
        mut on_accept: impl FnMut(&sloth_core::WorkflowId),
    ) -> Result<sloth_core::WorkflowReport> {
        let mut stream = self.connect().await?;
        write_msg(
            &mut stream,
            &Request::Submit {
                spec,
                validate_only: false,
            },
            DEFAULT_IO_TIMEOUT,
        )
        .await?;

        let first: Response = read_msg(&mut stream, DEFAULT_IO_TIMEOUT).await?;
        match fail_on_err(first)? {
            Response::Submitted { workflow_id } => on_accept(&workflow_id),
            other => bail!("unexpected reply to submission: {other:?}"),
        }

        let second: Response = read_msg(&mut stream, REPORT_TIMEOUT).await?;
        match fail_on_err(second)? {
            Response::Report { report } => Ok(report),
            other => bail!("unexpected terminal reply: {other:?}"),
        }
    }
}

fn fail_on_err(response: Response) -> Result<Response> {
    match response {
        Response::Err { message } => Err(anyhow!(message)),
        other => Ok(other),
    }
}
