// SPDX-License-Identifier: GPL-3.0-only

use async_trait::async_trait;
use partops_contracts::{JobError, ToolCommand};
use partops_types::{Action, FileSystemKind};
use tracing::info;

use super::{Job, JobContext, JobTarget, run_tool};
use crate::device::PartitionHandle;

/// Check and repair the filesystem on a partition. Uses the online check
/// when the filesystem is mounted.
pub struct CheckFileSystemJob {
    partition: PartitionHandle,
    target: JobTarget,
    description: String,
}

impl CheckFileSystemJob {
    pub async fn new(partition: PartitionHandle) -> Self {
        let (target, description) = {
            let guard = partition.lock().await;
            (
                JobTarget::partition(&guard),
                format!("Check file system on partition {}", guard.node()),
            )
        };
        Self {
            partition,
            target,
            description,
        }
    }
}

const CLEAN: &[i32] = &[0];
/// 1 means errors were found and corrected
const FIXED_OK: &[i32] = &[0, 1];
/// e2fsck: 2 means corrected, but a mounted system would need a reboot
const EXT_FIXED_OK: &[i32] = &[0, 1, 2];

/// Command and accepted exit codes for checking `kind`.
fn check_command(
    kind: FileSystemKind,
    node: &str,
    mount_point: Option<&str>,
) -> Option<(ToolCommand, &'static [i32])> {
    let command = match (kind, mount_point) {
        (FileSystemKind::Ext2 | FileSystemKind::Ext3 | FileSystemKind::Ext4, None) => {
            (ToolCommand::new("e2fsck").args(["-f", "-y", "-v", node]), EXT_FIXED_OK)
        }
        (FileSystemKind::Xfs, None) => (ToolCommand::new("xfs_repair").args(["-v", node]), CLEAN),
        (FileSystemKind::Btrfs, None) => {
            (ToolCommand::new("btrfs").args(["check", node]), CLEAN)
        }
        (FileSystemKind::Btrfs, Some(mount_point)) => (
            ToolCommand::new("btrfs").args(["scrub", "start", "-B", mount_point]),
            CLEAN,
        ),
        (FileSystemKind::Fat32, None) => (
            ToolCommand::new("fsck.fat").args(["-a", "-w", "-v", node]),
            FIXED_OK,
        ),
        (FileSystemKind::Ntfs, None) => (
            ToolCommand::new("ntfsresize").args(["-P", "-i", "-f", "-v", node]),
            CLEAN,
        ),
        (FileSystemKind::Exfat, None) => {
            (ToolCommand::new("fsck.exfat").args(["-y", node]), FIXED_OK)
        }
        _ => return None,
    };
    Some(command)
}

#[async_trait]
impl Job for CheckFileSystemJob {
    fn description(&self) -> &str {
        &self.description
    }

    fn target(&self) -> &JobTarget {
        &self.target
    }

    async fn execute(&self, ctx: &JobContext) -> Result<String, JobError> {
        let partition = self.partition.lock().await;
        let live = partition.live_state();
        let action = if live.mounted {
            Action::CheckOnline
        } else {
            Action::Check
        };
        partition.filesystem().require(action, live, &ctx.matrix)?;

        let Some((node, filesystem)) = partition.filesystem().resolve(partition.node()) else {
            return Err(JobError::Unexpected(format!(
                "{} has no reachable file system",
                partition.node()
            )));
        };
        let kind = filesystem.kind();
        let Some((command, accepted)) = check_command(kind, &node, partition.mount_point()) else {
            return Err(JobError::Unexpected(format!("no checker for {kind}")));
        };

        let output = run_tool(ctx, command, accepted).await?;
        info!(node = %node, %kind, exit_code = output.exit_code, "file system checked");
        Ok(if output.exit_code == 0 {
            format!("{kind} file system on {node} is clean")
        } else {
            format!("{kind} file system on {node} repaired")
        })
    }
}
