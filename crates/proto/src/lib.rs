// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! sloth-proto: the master ↔ agent wire protocol.
//!
//! Framing is a 4-byte big-endian length prefix followed by a JSON payload.
//! Every connection opens with a `Hello` carrying the protocol version and
//! an auth digest; after that the connection speaks one of the two request
//! vocabularies ([`AgentToMaster`] or [`MasterToAgent`]). Task execution
//! replies are a stream of [`Frame`]s terminated by exactly one
//! `Frame::Final`.

mod auth;
mod codec;
mod envelope;
mod frame;
mod message;

pub use auth::{auth_digest, digest_matches};
pub use codec::{
    read_message, read_msg, write_message, write_msg, ProtocolError, DEFAULT_IO_TIMEOUT,
    MAX_MESSAGE_SIZE,
};
pub use envelope::{DepResult, TaskEnvelope};
pub use frame::Frame;
pub use message::{
    AgentInfo, AgentReply, AgentToMaster, Hello, HelloReply, MasterReply, MasterToAgent,
};

/// Wire protocol version, negotiated at `Hello`.
pub const PROTOCOL_VERSION: u32 = 1;
