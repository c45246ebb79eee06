// SPDX-License-Identifier: GPL-3.0-only

//! Operations: ordered job sequences for one user-visible action.
//!
//! An operation is built completely before it is submitted; its jobs and
//! targets never change afterwards.

mod predicates;

use std::fmt;

use partops_contracts::{OperationId, OperationKind};
use partops_types::{ByteRange, bytes_to_pretty};

use crate::device::{Partition, PartitionHandle};
use crate::jobs::{
    BackupFileSystemJob, CheckFileSystemJob, CopyFileSystemJob, Job, ResizeFileSystemJob,
    ResizeTarget, SetFileSystemLabelJob,
};

pub use predicates::{can_backup, can_check, can_copy, can_grow, can_paste, can_relabel, can_shrink};

/// A partition an operation modifies or reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationTarget {
    pub device: String,
    pub partition: String,
    pub range: ByteRange,
}

impl OperationTarget {
    pub fn of(partition: &Partition) -> Self {
        Self {
            device: partition.device_node().to_string(),
            partition: partition.node().to_string(),
            range: partition.range(),
        }
    }
}

pub struct Operation {
    id: OperationId,
    kind: OperationKind,
    description: String,
    targets: Vec<OperationTarget>,
    jobs: Vec<Box<dyn Job>>,
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("description", &self.description)
            .field("targets", &self.targets)
            .field(
                "jobs",
                &self.jobs.iter().map(|job| job.description()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Operation {
    pub fn new(
        kind: OperationKind,
        description: impl Into<String>,
        targets: Vec<OperationTarget>,
        jobs: Vec<Box<dyn Job>>,
    ) -> Self {
        Self {
            id: OperationId::new(),
            kind,
            description: description.into(),
            targets,
            jobs,
        }
    }

    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn targets(&self) -> &[OperationTarget] {
        &self.targets
    }

    /// Execution order equals insertion order.
    pub fn jobs(&self) -> &[Box<dyn Job>] {
        &self.jobs
    }

    pub fn targets_device(&self, device: &str) -> bool {
        self.targets.iter().any(|target| target.device == device)
    }

    /// Whether any target on `device` overlaps `range`.
    pub fn targets_partition(&self, device: &str, range: &ByteRange) -> bool {
        self.targets
            .iter()
            .any(|target| target.device == device && target.range.overlaps(range))
    }

    /// Sorted, deduplicated device nodes.
    pub fn devices(&self) -> Vec<String> {
        let mut devices: Vec<String> = self.targets.iter().map(|t| t.device.clone()).collect();
        devices.sort();
        devices.dedup();
        devices
    }

    /// Check and repair, then grow the filesystem back to the partition size.
    pub async fn check(partition: &PartitionHandle) -> Self {
        let (summary, target) = describe(partition).await;
        Self::new(
            OperationKind::Check,
            format!("Check and repair partition {summary}"),
            vec![target],
            vec![
                boxed(CheckFileSystemJob::new(partition.clone()).await),
                boxed(ResizeFileSystemJob::new(partition.clone(), ResizeTarget::Maximize).await),
            ],
        )
    }

    /// Check, then resize the filesystem to `length` bytes.
    pub async fn resize(partition: &PartitionHandle, length: u64) -> Self {
        let (summary, target) = describe(partition).await;
        Self::new(
            OperationKind::Resize,
            format!(
                "Resize file system on partition {summary} to {}",
                bytes_to_pretty(&length, false)
            ),
            vec![target],
            vec![
                boxed(CheckFileSystemJob::new(partition.clone()).await),
                boxed(
                    ResizeFileSystemJob::new(partition.clone(), ResizeTarget::Length(length)).await,
                ),
            ],
        )
    }

    pub async fn set_label(partition: &PartitionHandle, label: &str) -> Self {
        let (summary, target) = describe(partition).await;
        Self::new(
            OperationKind::SetLabel,
            format!("Set label for partition {summary} to \"{label}\""),
            vec![target],
            vec![boxed(SetFileSystemLabelJob::new(partition.clone(), label).await)],
        )
    }

    /// Copy `source` onto `destination`, then check and maximize the copy.
    pub async fn copy(source: &PartitionHandle, destination: &PartitionHandle) -> Self {
        let (source_summary, source_target) = describe(source).await;
        let (destination_summary, destination_target) = describe(destination).await;
        Self::new(
            OperationKind::Copy,
            format!("Copy partition {source_summary} to {destination_summary}"),
            vec![source_target, destination_target],
            vec![
                boxed(CopyFileSystemJob::new(source.clone(), destination.clone()).await),
                boxed(CheckFileSystemJob::new(destination.clone()).await),
                boxed(
                    ResizeFileSystemJob::new(destination.clone(), ResizeTarget::Maximize).await,
                ),
            ],
        )
    }

    pub async fn backup(partition: &PartitionHandle, path: &str) -> Self {
        let (summary, target) = describe(partition).await;
        Self::new(
            OperationKind::Backup,
            format!("Back up partition {summary} to {path}"),
            vec![target],
            vec![boxed(BackupFileSystemJob::new(partition.clone(), path).await)],
        )
    }
}

fn boxed(job: impl Job + 'static) -> Box<dyn Job> {
    Box::new(job)
}

async fn describe(partition: &PartitionHandle) -> (String, OperationTarget) {
    let guard = partition.lock().await;
    (guard.summary(), OperationTarget::of(&guard))
}

#[cfg(test)]
mod tests {
    use partops_types::FileSystemKind;

    use super::*;

    fn ext4(device: &str, node: &str, first: u64, last: u64) -> PartitionHandle {
        Partition::new(device, node, first, last, FileSystemKind::Ext4).into_handle()
    }

    #[tokio::test]
    async fn check_is_check_then_maximize() {
        let partition = ext4("/dev/sda", "/dev/sda1", 0, 41_943_039);
        let operation = Operation::check(&partition).await;

        assert_eq!(operation.kind(), OperationKind::Check);
        assert_eq!(
            operation.description(),
            "Check and repair partition /dev/sda1 (20.00 GB, ext4)"
        );
        let jobs: Vec<&str> = operation.jobs().iter().map(|job| job.description()).collect();
        assert_eq!(
            jobs,
            vec![
                "Check file system on partition /dev/sda1",
                "Maximize file system on /dev/sda1 to fit the partition",
            ]
        );
    }

    #[tokio::test]
    async fn copy_targets_both_devices() {
        let source = ext4("/dev/sdb", "/dev/sdb1", 0, 99);
        let destination = ext4("/dev/sda", "/dev/sda1", 0, 99);
        let operation = Operation::copy(&source, &destination).await;

        assert_eq!(operation.jobs().len(), 3);
        assert_eq!(operation.devices(), vec!["/dev/sda", "/dev/sdb"]);
        assert!(operation.targets_device("/dev/sdb"));
        assert!(!operation.targets_device("/dev/sdc"));
        assert_eq!(
            operation.jobs()[1].target().partition.as_deref(),
            Some("/dev/sda1")
        );
    }

    #[tokio::test]
    async fn partition_targeting_uses_range_overlap() {
        let operation = Operation::set_label(&ext4("/dev/sda", "/dev/sda1", 2048, 4095), "x").await;
        assert!(operation.targets_partition("/dev/sda", &ByteRange::from_sectors(4000, 5000, 512)));
        assert!(!operation.targets_partition("/dev/sda", &ByteRange::from_sectors(4096, 5000, 512)));
        assert!(!operation.targets_partition("/dev/sdb", &ByteRange::from_sectors(2048, 4095, 512)));
    }
}
