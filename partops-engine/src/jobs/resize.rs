// SPDX-License-Identifier: GPL-3.0-only

use async_trait::async_trait;
use partops_contracts::{JobError, ToolCommand};
use partops_types::{Action, FileSystemKind, bytes_to_pretty};
use tracing::info;

use super::{Job, JobContext, JobTarget, run_tool};
use crate::device::PartitionHandle;
use crate::variant::FileSystemVariant;

const CRYPTSETUP: &str = "cryptsetup";
const SECTOR: u64 = 512;

/// Length the partition's content should occupy after the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeTarget {
    /// Fill the whole partition
    Maximize,
    /// Explicit length in bytes, measured from the start of the partition
    Length(u64),
}

/// Grow or shrink the filesystem on a partition. For containers the mapping
/// is resized around the inner filesystem: first when growing, last when
/// shrinking.
pub struct ResizeFileSystemJob {
    partition: PartitionHandle,
    resize_to: ResizeTarget,
    target: JobTarget,
    description: String,
}

impl ResizeFileSystemJob {
    pub async fn new(partition: PartitionHandle, resize_to: ResizeTarget) -> Self {
        let (target, description) = {
            let guard = partition.lock().await;
            let description = match resize_to {
                ResizeTarget::Maximize => {
                    format!("Maximize file system on {} to fit the partition", guard.node())
                }
                ResizeTarget::Length(length) => format!(
                    "Resize file system on {} to {}",
                    guard.node(),
                    bytes_to_pretty(&length, false)
                ),
            };
            (JobTarget::partition(&guard), description)
        };
        Self {
            partition,
            resize_to,
            target,
            description,
        }
    }
}

/// Active mappings from the outermost inwards, each with the bytes its
/// payload needs beyond the innermost filesystem.
fn mapping_layers(variant: &FileSystemVariant) -> Vec<(String, u64)> {
    let mut layers = Vec::new();
    let mut current = variant;
    while let Some(container) = current.as_container() {
        let (Some(mapper), Some(inner)) = (&container.mapper_name, container.inner.as_deref())
        else {
            break;
        };
        layers.push((mapper.clone(), inner.payload_offset()));
        current = inner;
    }
    layers
}

/// `cryptsetup resize` for one mapping; without `--size` it fills its device.
fn mapping_resize(mapper: &str, payload: u64, fill: bool) -> ToolCommand {
    let command = ToolCommand::new(CRYPTSETUP).arg("resize");
    if fill {
        command.arg(mapper)
    } else {
        command.args([
            "--size".to_string(),
            payload.div_ceil(SECTOR).to_string(),
            mapper.to_string(),
        ])
    }
}

fn record_new_length(variant: &mut FileSystemVariant, length: u64) {
    match variant {
        FileSystemVariant::Container(container) => {
            if let Some(inner) = container.inner.as_deref_mut() {
                container.crypt.payload_size = Some(length + inner.payload_offset());
                record_new_length(inner, length);
            }
        }
        FileSystemVariant::Plain(info) | FileSystemVariant::Detected(info) => {
            info.range.end = info.range.start + length;
        }
    }
}

fn resize_command(
    kind: FileSystemKind,
    node: &str,
    mount_point: Option<&str>,
    length: u64,
) -> Option<ToolCommand> {
    let command = match (kind, mount_point) {
        (FileSystemKind::Ext2 | FileSystemKind::Ext3 | FileSystemKind::Ext4, _) => {
            ToolCommand::new("resize2fs").args([node.to_string(), format!("{}K", length / 1024)])
        }
        (FileSystemKind::Xfs, Some(mount_point)) => {
            ToolCommand::new("xfs_growfs").args(["-d", mount_point])
        }
        (FileSystemKind::Btrfs, Some(mount_point)) => ToolCommand::new("btrfs").args([
            "filesystem".to_string(),
            "resize".to_string(),
            length.to_string(),
            mount_point.to_string(),
        ]),
        (FileSystemKind::Fat32, None) => ToolCommand::new("fatresize").args([
            "-f".to_string(),
            "-s".to_string(),
            length.to_string(),
            node.to_string(),
        ]),
        (FileSystemKind::Ntfs, None) => ToolCommand::new("ntfsresize")
            .args(["-P", "-f", "-s", &length.to_string(), node])
            .stdin("y\n"),
        _ => return None,
    };
    Some(command)
}

#[async_trait]
impl Job for ResizeFileSystemJob {
    fn description(&self) -> &str {
        &self.description
    }

    fn target(&self) -> &JobTarget {
        &self.target
    }

    async fn execute(&self, ctx: &JobContext) -> Result<String, JobError> {
        let mut partition = self.partition.lock().await;
        let live = partition.live_state();
        let partition_length = partition.length();
        let outer_length = match self.resize_to {
            ResizeTarget::Maximize => partition_length,
            ResizeTarget::Length(length) => length,
        };
        if outer_length > partition_length {
            return Err(JobError::Unexpected(format!(
                "{} exceeds the partition size of {}",
                bytes_to_pretty(&outer_length, false),
                bytes_to_pretty(&partition_length, false)
            )));
        }

        let filesystem = partition.filesystem();
        let header = filesystem.payload_offset();
        if outer_length <= header {
            return Err(JobError::Unexpected(format!(
                "{} does not leave room past the {} container header",
                bytes_to_pretty(&outer_length, false),
                bytes_to_pretty(&header, false)
            )));
        }
        let desired = outer_length - header;
        let Some((node, inner)) = filesystem.resolve(partition.node()) else {
            // closed container: let the capability check name the problem
            filesystem.require(Action::Grow, live, &ctx.matrix)?;
            return Err(JobError::Unexpected(format!(
                "{} has no reachable file system",
                partition.node()
            )));
        };
        let kind = inner.kind();
        let current = inner.info().length();
        if current == desired {
            return Ok(format!("{kind} file system on {node} already has the requested size"));
        }

        let grow = desired > current;
        let action = match (grow, live.mounted) {
            (true, false) => Action::Grow,
            (true, true) => Action::GrowOnline,
            (false, false) => Action::Shrink,
            (false, true) => Action::ShrinkOnline,
        };
        filesystem.require(action, live, &ctx.matrix)?;

        let Some(command) = resize_command(kind, &node, partition.mount_point(), desired) else {
            return Err(JobError::Unexpected(format!("no resizer for {kind}")));
        };
        let layers = mapping_layers(filesystem);

        // Only a maximised mapping may fill the rest of the partition.
        let fill = self.resize_to == ResizeTarget::Maximize;
        if grow {
            for (mapper, below) in &layers {
                run_tool(ctx, mapping_resize(mapper, desired + below, fill), &[0]).await?;
            }
            run_tool(ctx, command, &[0]).await?;
        } else {
            run_tool(ctx, command, &[0]).await?;
            for (mapper, below) in layers.iter().rev() {
                run_tool(ctx, mapping_resize(mapper, desired + below, false), &[0]).await?;
            }
        }

        record_new_length(partition.filesystem_mut(), desired);
        info!(node = %node, %kind, from = current, to = desired, "file system resized");
        Ok(format!(
            "Resized {kind} file system on {node} from {} to {}",
            bytes_to_pretty(&current, false),
            bytes_to_pretty(&desired, false)
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::capability::CapabilityMatrix;
    use crate::container::{Credentials, open};
    use crate::device::Partition;
    use crate::testing::{RecordingCopier, ScriptedRunner};

    fn context(runner: &ScriptedRunner) -> JobContext {
        JobContext {
            runner: Arc::new(runner.clone()),
            copier: Arc::new(RecordingCopier::new()),
            matrix: Arc::new(CapabilityMatrix::all_available()),
        }
    }

    /// ext4 occupying the first half of a 1 MiB partition
    fn half_full_ext4() -> Partition {
        let mut partition = Partition::new("/dev/sda", "/dev/sda1", 0, 2047, FileSystemKind::Ext4);
        partition.filesystem_mut().info_mut().range.end = 512 * 1024;
        partition
    }

    #[tokio::test]
    async fn maximize_grows_to_partition_length() {
        let runner = ScriptedRunner::new();
        let handle = half_full_ext4().into_handle();
        let job = ResizeFileSystemJob::new(handle.clone(), ResizeTarget::Maximize).await;

        job.execute(&context(&runner)).await.unwrap();
        assert_eq!(runner.rendered(), vec!["resize2fs /dev/sda1 1024K".to_string()]);
        assert_eq!(handle.lock().await.filesystem().info().length(), 1024 * 1024);
    }

    #[tokio::test]
    async fn already_at_target_runs_nothing() {
        let runner = ScriptedRunner::new();
        let handle = half_full_ext4().into_handle();
        let job = ResizeFileSystemJob::new(handle, ResizeTarget::Length(512 * 1024)).await;

        let message = job.execute(&context(&runner)).await.unwrap();
        assert!(message.contains("already"));
        assert!(runner.take_calls().is_empty());
    }

    #[tokio::test]
    async fn target_beyond_partition_is_rejected() {
        let runner = ScriptedRunner::new();
        let job =
            ResizeFileSystemJob::new(half_full_ext4().into_handle(), ResizeTarget::Length(1 << 30))
                .await;
        assert!(matches!(
            job.execute(&context(&runner)).await,
            Err(JobError::Unexpected(_))
        ));
    }

    #[tokio::test]
    async fn failed_resize_keeps_recorded_length() {
        let runner = ScriptedRunner::new();
        runner.fail("resize2fs", 1, "Please run 'e2fsck -f /dev/sda1' first.");
        let handle = half_full_ext4().into_handle();
        let job = ResizeFileSystemJob::new(handle.clone(), ResizeTarget::Maximize).await;

        assert_eq!(
            job.execute(&context(&runner)).await.unwrap_err(),
            JobError::ToolFailed {
                exit_code: 1,
                message: "Please run 'e2fsck -f /dev/sda1' first.".to_string()
            }
        );
        assert_eq!(handle.lock().await.filesystem().info().length(), 512 * 1024);
    }

    #[tokio::test]
    async fn open_container_shrink_resizes_mapping_last() {
        let runner = ScriptedRunner::new();
        runner
            .succeed("cryptsetup", "")
            .succeed("cryptsetup", "Version: 1\nPayload offset: 4096\n")
            .succeed("cryptsetup", "")
            .succeed("blkid", "TYPE=ext4\n");
        let mut partition = Partition::new("/dev/sda", "/dev/sda2", 0, 8191, FileSystemKind::Luks);
        open(&mut partition, &Credentials::new("pw"), &runner)
            .await
            .unwrap();
        runner.take_calls();

        let handle = partition.into_handle();
        // 4 MiB partition, 2 MiB header: shrink the whole thing to 3 MiB
        let job = ResizeFileSystemJob::new(handle.clone(), ResizeTarget::Length(3 << 20)).await;
        job.execute(&context(&runner)).await.unwrap();

        assert_eq!(
            runner.rendered(),
            vec![
                "resize2fs /dev/mapper/luks-sda2 1024K".to_string(),
                "cryptsetup resize --size 2048 luks-sda2".to_string(),
            ]
        );
        let guard = handle.lock().await;
        let container = guard.filesystem().as_container().unwrap();
        assert_eq!(container.crypt.payload_size, Some(1 << 20));
        assert_eq!(container.inner.as_ref().unwrap().info().length(), 1 << 20);
    }

    /// LUKS1 on an 8 MiB partition with a 2 MiB header and a 1 MiB ext4 inside
    async fn open_small_container(runner: &ScriptedRunner) -> PartitionHandle {
        runner
            .succeed("cryptsetup", "")
            .succeed("cryptsetup", "Version: 1\nPayload offset: 4096\n")
            .succeed("cryptsetup", "  type:    LUKS1\n  size:    2048 sectors\n")
            .succeed("blkid", "TYPE=ext4\n");
        let mut partition =
            Partition::new("/dev/sda", "/dev/sda2", 0, 16383, FileSystemKind::Luks);
        open(&mut partition, &Credentials::new("pw"), runner)
            .await
            .unwrap();
        runner.take_calls();
        partition.into_handle()
    }

    #[tokio::test]
    async fn open_container_grow_sizes_mapping_first() {
        let runner = ScriptedRunner::new();
        let handle = open_small_container(&runner).await;
        let job = ResizeFileSystemJob::new(handle.clone(), ResizeTarget::Length(4 << 20)).await;
        job.execute(&context(&runner)).await.unwrap();

        assert_eq!(
            runner.rendered(),
            vec![
                "cryptsetup resize --size 4096 luks-sda2".to_string(),
                "resize2fs /dev/mapper/luks-sda2 2048K".to_string(),
            ]
        );
        let guard = handle.lock().await;
        let container = guard.filesystem().as_container().unwrap();
        assert_eq!(container.crypt.payload_size, Some(2 << 20));
    }

    #[tokio::test]
    async fn open_container_maximize_fills_the_partition() {
        let runner = ScriptedRunner::new();
        let handle = open_small_container(&runner).await;
        let job = ResizeFileSystemJob::new(handle.clone(), ResizeTarget::Maximize).await;
        job.execute(&context(&runner)).await.unwrap();

        assert_eq!(
            runner.rendered(),
            vec![
                "cryptsetup resize luks-sda2".to_string(),
                "resize2fs /dev/mapper/luks-sda2 6144K".to_string(),
            ]
        );
        let guard = handle.lock().await;
        let container = guard.filesystem().as_container().unwrap();
        assert_eq!(container.crypt.payload_size, Some(6 << 20));
    }

    #[tokio::test]
    async fn length_inside_the_header_is_rejected() {
        for length in [1 << 20, 2 << 20] {
            let runner = ScriptedRunner::new();
            let handle = open_small_container(&runner).await;
            let job = ResizeFileSystemJob::new(handle.clone(), ResizeTarget::Length(length)).await;

            assert!(matches!(
                job.execute(&context(&runner)).await,
                Err(JobError::Unexpected(_))
            ));
            assert!(runner.take_calls().is_empty());
            let guard = handle.lock().await;
            let container = guard.filesystem().as_container().unwrap();
            assert_eq!(container.crypt.payload_size, Some(1 << 20));
        }
    }

    #[tokio::test]
    async fn closed_container_cannot_be_resized() {
        let runner = ScriptedRunner::new();
        let handle =
            Partition::new("/dev/sda", "/dev/sda2", 0, 8191, FileSystemKind::Luks).into_handle();
        let job = ResizeFileSystemJob::new(handle, ResizeTarget::Maximize).await;
        assert!(matches!(
            job.execute(&context(&runner)).await,
            Err(JobError::Unsupported(_))
        ));
        assert!(runner.take_calls().is_empty());
    }
}
