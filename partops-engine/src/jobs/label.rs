// SPDX-License-Identifier: GPL-3.0-only

use async_trait::async_trait;
use partops_contracts::{JobError, ToolCommand};
use partops_types::{Action, FileSystemKind};
use tracing::info;

use super::{Job, JobContext, JobTarget, run_tool};
use crate::device::PartitionHandle;

pub struct SetFileSystemLabelJob {
    partition: PartitionHandle,
    label: String,
    target: JobTarget,
    description: String,
}

impl SetFileSystemLabelJob {
    pub async fn new(partition: PartitionHandle, label: impl Into<String>) -> Self {
        let label = label.into();
        let (target, description) = {
            let guard = partition.lock().await;
            (
                JobTarget::partition(&guard),
                format!("Set file system label on {} to \"{label}\"", guard.node()),
            )
        };
        Self {
            partition,
            label,
            target,
            description,
        }
    }
}

fn label_command(
    kind: FileSystemKind,
    node: &str,
    mount_point: Option<&str>,
    label: &str,
) -> Option<ToolCommand> {
    let command = match kind {
        FileSystemKind::Ext2 | FileSystemKind::Ext3 | FileSystemKind::Ext4 => {
            ToolCommand::new("e2label").args([node, label])
        }
        // xfs_admin clears the label with "--"
        FileSystemKind::Xfs => {
            let label = if label.is_empty() { "--" } else { label };
            ToolCommand::new("xfs_admin").args(["-L", label, node])
        }
        FileSystemKind::Btrfs => {
            ToolCommand::new("btrfs").args(["filesystem", "label", mount_point.unwrap_or(node), label])
        }
        FileSystemKind::Fat32 => ToolCommand::new("fatlabel").args([node, label]),
        FileSystemKind::Ntfs => ToolCommand::new("ntfslabel").args(["--force", node, label]),
        FileSystemKind::Exfat => ToolCommand::new("exfatlabel").args([node, label]),
        _ => return None,
    };
    Some(command)
}

#[async_trait]
impl Job for SetFileSystemLabelJob {
    fn description(&self) -> &str {
        &self.description
    }

    fn target(&self) -> &JobTarget {
        &self.target
    }

    async fn execute(&self, ctx: &JobContext) -> Result<String, JobError> {
        let mut partition = self.partition.lock().await;
        let live = partition.live_state();
        partition
            .filesystem()
            .require(Action::SetLabel, live, &ctx.matrix)?;

        let Some((node, filesystem)) = partition.filesystem().resolve(partition.node()) else {
            return Err(JobError::Unexpected(format!(
                "{} has no reachable file system",
                partition.node()
            )));
        };
        let kind = filesystem.kind();
        let Some(command) = label_command(kind, &node, partition.mount_point(), &self.label) else {
            return Err(JobError::Unexpected(format!("cannot label {kind}")));
        };
        run_tool(ctx, command, &[0]).await?;

        let partition_node = partition.node().to_string();
        if let Some((_, filesystem)) = partition.filesystem_mut().resolve_mut(&partition_node) {
            filesystem.info_mut().label = (!self.label.is_empty()).then(|| self.label.clone());
        }
        info!(node = %node, %kind, label = %self.label, "file system label set");
        Ok(format!("Label of {node} set to \"{}\"", self.label))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::capability::CapabilityMatrix;
    use crate::device::Partition;
    use crate::testing::{RecordingCopier, ScriptedRunner};

    fn context(runner: &ScriptedRunner) -> JobContext {
        JobContext {
            runner: Arc::new(runner.clone()),
            copier: Arc::new(RecordingCopier::new()),
            matrix: Arc::new(CapabilityMatrix::all_available()),
        }
    }

    #[tokio::test]
    async fn relabels_and_records_the_new_label() {
        let runner = ScriptedRunner::new();
        let handle =
            Partition::new("/dev/sda", "/dev/sda1", 0, 99, FileSystemKind::Ntfs).into_handle();
        let job = SetFileSystemLabelJob::new(handle.clone(), "Windows").await;

        job.execute(&context(&runner)).await.unwrap();
        assert_eq!(runner.rendered(), vec!["ntfslabel --force /dev/sda1 Windows".to_string()]);
        assert_eq!(
            handle.lock().await.filesystem().info().label.as_deref(),
            Some("Windows")
        );
    }

    #[tokio::test]
    async fn mounted_btrfs_is_labelled_through_its_mount_point() {
        let runner = ScriptedRunner::new();
        let mut partition = Partition::new("/dev/sdb", "/dev/sdb1", 0, 99, FileSystemKind::Btrfs);
        partition.set_mounted(Some("/srv".to_string()));
        let job = SetFileSystemLabelJob::new(partition.into_handle(), "pool").await;

        job.execute(&context(&runner)).await.unwrap();
        assert_eq!(runner.rendered(), vec!["btrfs filesystem label /srv pool".to_string()]);
    }

    #[tokio::test]
    async fn failure_keeps_old_label() {
        let runner = ScriptedRunner::new();
        runner.fail("e2label", 1, "Bad magic number in super-block");
        let mut partition = Partition::new("/dev/sda", "/dev/sda1", 0, 99, FileSystemKind::Ext4);
        partition.filesystem_mut().info_mut().label = Some("old".to_string());
        let handle = partition.into_handle();
        let job = SetFileSystemLabelJob::new(handle.clone(), "new").await;

        assert!(matches!(
            job.execute(&context(&runner)).await,
            Err(JobError::ToolFailed { exit_code: 1, .. })
        ));
        assert_eq!(handle.lock().await.filesystem().info().label.as_deref(), Some("old"));
    }
}
