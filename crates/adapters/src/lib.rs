// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! sloth-adapters: external collaborators behind traits.
//!
//! The engine treats the scripting interpreter as a black box that turns a
//! source string and an input binding into a result tuple. The
//! [`Interpreter`] trait is that boundary; [`CommandInterpreter`] covers the
//! command-string half of the task surface and shell guard predicates.
//! Anything beyond that (an embedded scripting runtime with `log`, `fs`,
//! `exec` modules) plugs in behind the same trait.

mod command;
mod interpreter;
pub mod process;
pub mod subprocess;

pub use command::CommandInterpreter;
pub use interpreter::{
    Bindings, Interpreter, InterpreterError, IoSinks, ScriptOutcome, OUTPUT_CHUNK_SIZE,
};

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeBehavior, FakeCall, FakeInterpreter};
