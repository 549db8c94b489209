// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stream frames for task execution.

use serde::{Deserialize, Serialize};
use sloth_core::{OutputTable, TaskError};

/// One frame of an `Execute` reply stream.
///
/// Frames are ordered per stream. Chunks for a given artifact name are
/// contiguous and monotonic in offset. Exactly one `Final` terminates the
/// stream; a stream that ends without one is a transport failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Chunk of interpreter stdout.
    Stdout { data: Vec<u8> },

    /// Chunk of interpreter stderr.
    Stderr { data: Vec<u8> },

    /// Free-form progress note.
    Progress { message: String },

    /// Chunk of a collected artifact.
    ArtifactChunk {
        name: String,
        offset: u64,
        data: Vec<u8>,
    },

    /// Terminal frame: exit status, measured duration, structured outputs.
    Final {
        exit_code: i32,
        duration_ms: u64,
        #[serde(default)]
        outputs: OutputTable,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<TaskError>,
    },
}

impl Frame {
    pub fn is_final(&self) -> bool {
        matches!(self, Frame::Final { .. })
    }

    /// Terminal frame for a failure that produced no output.
    pub fn failed(error: TaskError, duration_ms: u64) -> Self {
        Frame::Final {
            exit_code: -1,
            duration_ms,
            outputs: OutputTable::new(),
            error: Some(error),
        }
    }
}

#[cfg(test)]
#[path = "frame_tests.rs"]
mod tests;
