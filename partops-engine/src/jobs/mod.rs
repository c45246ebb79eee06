// SPDX-License-Identifier: GPL-3.0-only

//! Jobs: the smallest executable unit of an operation.
//!
//! Every job performs exactly one inspecting or mutating action against one
//! partition, re-checking capability and mount state right before it runs.

mod check;
mod copy;
mod label;
mod resize;

use std::sync::Arc;

use async_trait::async_trait;
use partops_contracts::{BlockCopier, JobError, ToolCommand, ToolOutput, ToolRunner};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::capability::CapabilityMatrix;
use crate::device::Partition;

pub use check::CheckFileSystemJob;
pub use copy::{BackupFileSystemJob, CopyFileSystemJob};
pub use label::SetFileSystemLabelJob;
pub use resize::{ResizeFileSystemJob, ResizeTarget};

/// Collaborators available to a running job.
#[derive(Clone)]
pub struct JobContext {
    pub runner: Arc<dyn ToolRunner>,
    pub copier: Arc<dyn BlockCopier>,
    pub matrix: Arc<CapabilityMatrix>,
}

/// Device and partition a job acts on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTarget {
    pub device: String,
    pub partition: Option<String>,
}

impl JobTarget {
    pub fn partition(partition: &Partition) -> Self {
        Self {
            device: partition.device_node().to_string(),
            partition: Some(partition.node().to_string()),
        }
    }
}

#[async_trait]
pub trait Job: Send + Sync {
    fn description(&self) -> &str;

    fn target(&self) -> &JobTarget;

    /// Run the job; `Ok` carries a short human-readable report.
    async fn execute(&self, ctx: &JobContext) -> Result<String, JobError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    NotStarted,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// `NotStarted -> Running -> {Succeeded, Failed}`; nothing leaves a
    /// terminal state.
    pub fn can_advance_to(self, next: JobState) -> bool {
        matches!(
            (self, next),
            (Self::NotStarted, Self::Running)
                | (Self::Running, Self::Succeeded)
                | (Self::Running, Self::Failed)
        )
    }
}

/// Final state and message of one job in an operation result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub description: String,
    pub state: JobState,
    pub message: Option<String>,
}

impl JobRecord {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            state: JobState::NotStarted,
            message: None,
        }
    }

    /// Returns false, leaving the record untouched, for an invalid transition.
    pub fn advance(&mut self, next: JobState) -> bool {
        if !self.state.can_advance_to(next) {
            return false;
        }
        self.state = next;
        true
    }

    pub fn finish(&mut self, succeeded: bool, message: impl Into<String>) -> bool {
        let next = if succeeded {
            JobState::Succeeded
        } else {
            JobState::Failed
        };
        let advanced = self.advance(next);
        if advanced {
            self.message = Some(message.into());
        }
        advanced
    }

    pub fn skipped(&self) -> bool {
        self.state == JobState::NotStarted
    }
}

/// Run an external tool, treating any exit code in `accepted` as success.
///
/// A tool that vanished since start-up probing is a normal
/// [`JobError::ToolMissing`].
pub(crate) async fn run_tool(
    ctx: &JobContext,
    command: ToolCommand,
    accepted: &[i32],
) -> Result<ToolOutput, JobError> {
    if !ctx.runner.has_tool(&command.program) {
        return Err(JobError::ToolMissing(command.program));
    }
    debug!(command = %command.render(), "running tool");
    let output = ctx.runner.run(&command).await?;
    if accepted.contains(&output.exit_code) {
        Ok(output)
    } else {
        Err(JobError::ToolFailed {
            exit_code: output.exit_code,
            message: output.diagnostic(),
        })
    }
}

pub(crate) fn require_unmounted(partition: &Partition) -> Result<(), JobError> {
    if partition.is_mounted() {
        return Err(JobError::DeviceBusy(partition.node().to_string()));
    }
    Ok(())
}
