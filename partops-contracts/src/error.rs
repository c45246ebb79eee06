// SPDX-License-Identifier: GPL-3.0-only

use partops_types::{Action, FileSystemKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::OperationId;

/// Action not available in the current state. Used to gate offering an
/// action, never to abort anything.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{action} is not supported for {kind} in its current state")]
pub struct CapabilityError {
    pub action: Action,
    pub kind: FileSystemKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ToolError {
    #[error("required tool '{0}' is not installed")]
    Missing(String),
    #[error("failed to start '{command}': {reason}")]
    Spawn { command: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum OpenError {
    #[error("wrong passphrase or key")]
    WrongCredentials,
    #[error("required tool '{0}' is not installed")]
    ToolMissing(String),
    #[error("device {0} is busy")]
    DeviceBusy(String),
    #[error("{0} is not an encrypted container")]
    NotContainer(FileSystemKind),
    #[error("container is already open")]
    AlreadyOpen,
    #[error("unexpected failure opening container: {0}")]
    Unexpected(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum CloseError {
    #[error("container {0} is busy (inner filesystem mounted or in use)")]
    Busy(String),
    #[error("container is not open")]
    NotOpen,
    #[error("required tool '{0}' is not installed")]
    ToolMissing(String),
    #[error("unexpected failure closing container: {0}")]
    Unexpected(String),
}

/// Failure of a read-only probe (label, uuid, used capacity).
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ProbeError {
    #[error("container is not open")]
    NotOpen,
    #[error(transparent)]
    Unsupported(#[from] CapabilityError),
    #[error("required tool '{0}' is not installed")]
    ToolMissing(String),
    #[error("probe failed with exit code {exit_code}: {message}")]
    ToolFailed { exit_code: i32, message: String },
    #[error("unparseable probe output: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum JobError {
    #[error("required tool '{0}' is not installed")]
    ToolMissing(String),
    #[error("tool exited with code {exit_code}: {message}")]
    ToolFailed { exit_code: i32, message: String },
    #[error("device {0} is busy")]
    DeviceBusy(String),
    #[error(transparent)]
    Unsupported(#[from] CapabilityError),
    #[error("{0}")]
    Unexpected(String),
}

impl From<ToolError> for JobError {
    fn from(error: ToolError) -> Self {
        match error {
            ToolError::Missing(tool) => Self::ToolMissing(tool),
            ToolError::Spawn { .. } => Self::Unexpected(error.to_string()),
        }
    }
}

impl From<ToolError> for ProbeError {
    fn from(error: ToolError) -> Self {
        match error {
            ToolError::Missing(tool) => Self::ToolMissing(tool),
            ToolError::Spawn { reason, .. } => Self::ToolFailed {
                exit_code: -1,
                message: reason,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum CopyError {
    #[error("cannot open {path}: {reason}")]
    Open { path: String, reason: String },
    #[error("I/O error: {0}")]
    Io(String),
    #[error("short copy: expected {expected} bytes, copied {copied}")]
    Short { expected: u64, copied: u64 },
}

impl From<CopyError> for JobError {
    fn from(error: CopyError) -> Self {
        Self::Unexpected(error.to_string())
    }
}

/// An operation was submitted while another queued one already targets the
/// same device or an overlapping partition.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("conflicts with queued operation {queued} on {device}")]
pub struct ConflictError {
    pub queued: OperationId,
    pub device: String,
    pub partition: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_errors_map_into_job_errors() {
        let missing: JobError = ToolError::Missing("e2fsck".to_string()).into();
        assert_eq!(missing, JobError::ToolMissing("e2fsck".to_string()));

        let spawn: JobError = ToolError::Spawn {
            command: "e2fsck -f".to_string(),
            reason: "permission denied".to_string(),
        }
        .into();
        assert!(matches!(spawn, JobError::Unexpected(message) if message.contains("permission denied")));
    }

    #[test]
    fn capability_error_reads_naturally() {
        let error = CapabilityError {
            action: Action::CheckOnline,
            kind: FileSystemKind::Ext4,
        };
        assert_eq!(
            error.to_string(),
            "check-online is not supported for ext4 in its current state"
        );
    }

    #[test]
    fn job_error_roundtrips() {
        let error = JobError::ToolFailed {
            exit_code: 4,
            message: "filesystem still has errors".to_string(),
        };
        let json = serde_json::to_string(&error).expect("serialize error");
        let parsed: JobError = serde_json::from_str(&json).expect("deserialize error");
        assert_eq!(parsed, error);
    }
}
