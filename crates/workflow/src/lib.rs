// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! sloth-workflow: workflow definition records and parse-time validation.
//!
//! The scripting front-end that evaluates workflow sources is an external
//! collaborator; what arrives here is the structured record it produces.
//! Validation turns a [`WorkflowSpec`] into a [`Workflow`] the scheduler can
//! trust: unique task names, resolvable dependency edges, an acyclic graph,
//! and `consumes` declarations covered by upstream `artifacts`.

mod spec;
mod validate;

pub use spec::{
    DelegateSpec, Guard, InlineAgent, TaskSpec, WorkflowConfig, WorkflowHooks, WorkflowSpec,
};
pub use validate::{validate, ValidationError, Workflow};

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
