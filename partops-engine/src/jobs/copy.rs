// SPDX-License-Identifier: GPL-3.0-only

use std::sync::Arc;

use async_trait::async_trait;
use partops_contracts::{CopyRequest, JobError};
use partops_types::{Action, ByteRange, bytes_to_pretty};
use tokio::sync::MutexGuard;
use tracing::info;

use super::{Job, JobContext, JobTarget, require_unmounted};
use crate::device::{Partition, PartitionHandle};
use crate::variant::FileSystemVariant;

/// Byte offset of the filesystem within its partition, and its length.
fn filesystem_extent(partition: &Partition) -> (u64, u64) {
    let range = partition.filesystem().info().range;
    (
        range.start.saturating_sub(partition.range().start),
        range.size(),
    )
}

/// Copy of `filesystem` as it will look at `start` once written there.
/// Containers arrive closed.
fn relocated(filesystem: &FileSystemVariant, start: u64) -> FileSystemVariant {
    let mut copy = filesystem.clone();
    if let Some(container) = copy.as_container_mut() {
        container.inner = None;
        container.mapper_name = None;
    }
    let info = copy.info_mut();
    info.range = ByteRange::new(start, start + info.range.size());
    copy
}

/// Byte-for-byte copy of a filesystem onto another partition.
pub struct CopyFileSystemJob {
    source: PartitionHandle,
    destination: PartitionHandle,
    target: JobTarget,
    source_first: bool,
    description: String,
}

impl CopyFileSystemJob {
    pub async fn new(source: PartitionHandle, destination: PartitionHandle) -> Self {
        let source_target = JobTarget::partition(&*source.lock().await);
        let target = JobTarget::partition(&*destination.lock().await);
        let description = format!(
            "Copy file system on {} to {}",
            source_target.partition.as_deref().unwrap_or(&source_target.device),
            target.partition.as_deref().unwrap_or(&target.device)
        );
        // lock both partitions in a stable order
        let source_first = (&source_target.device, &source_target.partition)
            <= (&target.device, &target.partition);
        Self {
            source,
            destination,
            target,
            source_first,
            description,
        }
    }

    async fn lock_both(&self) -> (MutexGuard<'_, Partition>, MutexGuard<'_, Partition>) {
        if self.source_first {
            let source = self.source.lock().await;
            let destination = self.destination.lock().await;
            (source, destination)
        } else {
            let destination = self.destination.lock().await;
            let source = self.source.lock().await;
            (source, destination)
        }
    }
}

#[async_trait]
impl Job for CopyFileSystemJob {
    fn description(&self) -> &str {
        &self.description
    }

    fn target(&self) -> &JobTarget {
        &self.target
    }

    async fn execute(&self, ctx: &JobContext) -> Result<String, JobError> {
        if Arc::ptr_eq(&self.source, &self.destination) {
            return Err(JobError::Unexpected(
                "source and target are the same partition".to_string(),
            ));
        }
        let (source, mut destination) = self.lock_both().await;
        source
            .filesystem()
            .require(Action::Copy, source.live_state(), &ctx.matrix)?;
        require_unmounted(&destination)?;
        if destination.is_crypt_open() {
            return Err(JobError::DeviceBusy(destination.node().to_string()));
        }

        let (offset, length) = filesystem_extent(&source);
        if length > destination.length() {
            return Err(JobError::Unexpected(format!(
                "{} is too small for {} of data",
                destination.node(),
                bytes_to_pretty(&length, false)
            )));
        }

        let request = CopyRequest {
            source: source.node().to_string(),
            source_offset: offset,
            target: destination.node().to_string(),
            target_offset: 0,
            length,
            create_target: false,
        };
        let copied = ctx.copier.copy(&request).await?;

        let start = destination.range().start;
        let copy = relocated(source.filesystem(), start);
        *destination.filesystem_mut() = copy;
        destination.set_crypt_open(false);
        info!(
            source = %request.source,
            target = %request.target,
            bytes = copied,
            "file system copied"
        );
        Ok(format!(
            "Copied {} from {} to {}",
            bytes_to_pretty(&copied, true),
            request.source,
            request.target
        ))
    }
}

/// Byte-for-byte copy of a filesystem into an image file.
pub struct BackupFileSystemJob {
    source: PartitionHandle,
    path: String,
    target: JobTarget,
    description: String,
}

impl BackupFileSystemJob {
    pub async fn new(source: PartitionHandle, path: impl Into<String>) -> Self {
        let path = path.into();
        let (target, description) = {
            let guard = source.lock().await;
            (
                JobTarget::partition(&guard),
                format!("Back up file system on {} to {path}", guard.node()),
            )
        };
        Self {
            source,
            path,
            target,
            description,
        }
    }
}

#[async_trait]
impl Job for BackupFileSystemJob {
    fn description(&self) -> &str {
        &self.description
    }

    fn target(&self) -> &JobTarget {
        &self.target
    }

    async fn execute(&self, ctx: &JobContext) -> Result<String, JobError> {
        let source = self.source.lock().await;
        source
            .filesystem()
            .require(Action::Backup, source.live_state(), &ctx.matrix)?;

        let (offset, length) = filesystem_extent(&source);
        let request = CopyRequest {
            source: source.node().to_string(),
            source_offset: offset,
            target: self.path.clone(),
            target_offset: 0,
            length,
            create_target: true,
        };
        let copied = ctx.copier.copy(&request).await?;
        info!(source = %request.source, image = %self.path, bytes = copied, "file system backed up");
        Ok(format!(
            "Backed up {} from {} to {}",
            bytes_to_pretty(&copied, true),
            request.source,
            self.path
        ))
    }
}
