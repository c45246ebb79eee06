// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};

use super::OperationId;
use crate::JobError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Check,
    Resize,
    SetLabel,
    Copy,
    Backup,
}

/// Emitted after each job finishes, successfully or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    pub operation_id: OperationId,
    /// 0-based position of the job within its operation
    pub job_index: usize,
    pub job_total: usize,
    pub succeeded: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "payload")]
pub enum OperationEvent {
    Started {
        operation_id: OperationId,
        operation: OperationKind,
        job_total: usize,
    },
    JobFinished(JobProgress),
    Completed {
        operation_id: OperationId,
        operation: OperationKind,
    },
    Failed {
        operation_id: OperationId,
        operation: OperationKind,
        job_index: usize,
        error: JobError,
    },
    Cancelled {
        operation_id: OperationId,
        operation: OperationKind,
        completed_jobs: usize,
    },
}

impl OperationEvent {
    pub fn operation_id(&self) -> OperationId {
        match self {
            Self::Started { operation_id, .. }
            | Self::Completed { operation_id, .. }
            | Self::Failed { operation_id, .. }
            | Self::Cancelled { operation_id, .. } => *operation_id,
            Self::JobFinished(progress) => progress.operation_id,
        }
    }
}
