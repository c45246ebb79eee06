// SPDX-License-Identifier: GPL-3.0-only

//! Read-only probes: label, UUID and used capacity.
//!
//! Containers answer through their mapper node and fail with
//! [`ProbeError::NotOpen`] while closed.

use partops_contracts::{CapabilityError, ProbeError, ToolCommand, ToolRunner};
use partops_sys::parse::{parse_btrfs_used, parse_dumpe2fs_used};
use partops_types::{Action, FileSystemKind, VariantTag};

use crate::capability::CapabilityMatrix;
use crate::device::Partition;
use crate::variant::{FileSystemVariant, LiveState};

/// Node and variant a probe for `action` should read.
fn probe_target<'a>(
    partition: &'a Partition,
    action: Action,
    matrix: &CapabilityMatrix,
) -> Result<(String, &'a FileSystemVariant), ProbeError> {
    let live = partition.live_state();
    let filesystem = partition.filesystem();
    if filesystem.tag() == VariantTag::Container && !live.crypt_open {
        return Err(ProbeError::NotOpen);
    }
    filesystem.require(action, live, matrix)?;

    let (node, target) = filesystem
        .resolve(partition.node())
        .ok_or(ProbeError::NotOpen)?;
    target.require(
        action,
        LiveState {
            mounted: live.mounted,
            crypt_open: false,
        },
        matrix,
    )?;
    Ok((node, target))
}

async fn run_probe(runner: &dyn ToolRunner, command: ToolCommand) -> Result<String, ProbeError> {
    let output = runner.run(&command).await?;
    if output.success() {
        Ok(output.stdout)
    } else {
        Err(ProbeError::ToolFailed {
            exit_code: output.exit_code,
            message: output.diagnostic(),
        })
    }
}

/// `blkid` exits 2 when the tag is absent, which is not an error here.
async fn blkid_tag(
    runner: &dyn ToolRunner,
    node: &str,
    tag: &str,
) -> Result<Option<String>, ProbeError> {
    let output = runner
        .run(&ToolCommand::new("blkid").args(["-s", tag, "-o", "value", node]))
        .await?;
    match output.exit_code {
        0 => {
            let value = output.stdout.trim();
            Ok((!value.is_empty()).then(|| value.to_string()))
        }
        2 => Ok(None),
        exit_code => Err(ProbeError::ToolFailed {
            exit_code,
            message: output.diagnostic(),
        }),
    }
}

pub async fn read_label(
    partition: &Partition,
    runner: &dyn ToolRunner,
    matrix: &CapabilityMatrix,
) -> Result<Option<String>, ProbeError> {
    let (node, _) = probe_target(partition, Action::GetLabel, matrix)?;
    blkid_tag(runner, &node, "LABEL").await
}

pub async fn read_uuid(
    partition: &Partition,
    runner: &dyn ToolRunner,
    matrix: &CapabilityMatrix,
) -> Result<Option<String>, ProbeError> {
    let (node, _) = probe_target(partition, Action::GetUuid, matrix)?;
    blkid_tag(runner, &node, "UUID").await
}

/// Used bytes of the (inner) filesystem.
pub async fn read_used_capacity(
    partition: &Partition,
    runner: &dyn ToolRunner,
    matrix: &CapabilityMatrix,
) -> Result<u64, ProbeError> {
    let (node, target) = probe_target(partition, Action::GetUsed, matrix)?;
    let kind = target.kind();
    let parsed = if kind.is_ext() {
        let stdout = run_probe(runner, ToolCommand::new("dumpe2fs").args(["-h", &node])).await?;
        parse_dumpe2fs_used(&stdout)
    } else if kind == FileSystemKind::Btrfs {
        let stdout = run_probe(
            runner,
            ToolCommand::new("btrfs").args(["filesystem", "show", "--raw", &node]),
        )
        .await?;
        parse_btrfs_used(&stdout)
    } else {
        return Err(ProbeError::Unsupported(CapabilityError {
            action: Action::GetUsed,
            kind,
        }));
    };
    parsed.map_err(|error| ProbeError::Parse(error.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{Credentials, open};
    use crate::testing::ScriptedRunner;

    const DUMPE2FS: &str = "\
Block count:              262144
Free blocks:              200000
Block size:               4096
";

    #[tokio::test]
    async fn plain_probes_read_the_partition_node() {
        let runner = ScriptedRunner::new();
        runner.succeed("blkid", "root\n").succeed("dumpe2fs", DUMPE2FS);
        let matrix = CapabilityMatrix::all_available();
        let partition = Partition::new("/dev/sda", "/dev/sda1", 0, 99, FileSystemKind::Ext4);

        assert_eq!(
            read_label(&partition, &runner, &matrix).await.unwrap().as_deref(),
            Some("root")
        );
        assert_eq!(
            read_used_capacity(&partition, &runner, &matrix).await.unwrap(),
            (262_144 - 200_000) * 4096
        );
        assert_eq!(
            runner.rendered(),
            vec![
                "blkid -s LABEL -o value /dev/sda1".to_string(),
                "dumpe2fs -h /dev/sda1".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn missing_tag_is_none() {
        let runner = ScriptedRunner::new();
        runner.fail("blkid", 2, "");
        let matrix = CapabilityMatrix::all_available();
        let partition = Partition::new("/dev/sda", "/dev/sda1", 0, 99, FileSystemKind::Xfs);
        assert_eq!(read_uuid(&partition, &runner, &matrix).await.unwrap(), None);
    }

    #[tokio::test]
    async fn closed_container_is_not_open() {
        let runner = ScriptedRunner::new();
        let matrix = CapabilityMatrix::all_available();
        let partition = Partition::new("/dev/sda", "/dev/sda2", 0, 99, FileSystemKind::Luks);

        assert_eq!(
            read_label(&partition, &runner, &matrix).await.unwrap_err(),
            ProbeError::NotOpen
        );
        assert_eq!(
            read_used_capacity(&partition, &runner, &matrix).await.unwrap_err(),
            ProbeError::NotOpen
        );
        assert!(runner.take_calls().is_empty());
    }

    #[tokio::test]
    async fn open_container_forwards_to_mapper() {
        let runner = ScriptedRunner::new();
        runner
            .succeed("cryptsetup", "")
            .succeed("blkid", "TYPE=btrfs\n");
        let matrix = CapabilityMatrix::all_available();
        let mut partition = Partition::new("/dev/sda", "/dev/sda2", 0, 99, FileSystemKind::Luks);
        open(&mut partition, &Credentials::new("pw"), &runner)
            .await
            .unwrap();
        runner.take_calls();

        runner.succeed("btrfs", "Label: none  uuid: 1\n\tTotal devices 1 FS bytes used 1048576\n");
        assert_eq!(
            read_used_capacity(&partition, &runner, &matrix).await.unwrap(),
            1_048_576
        );
        assert_eq!(
            runner.rendered(),
            vec!["btrfs filesystem show --raw /dev/mapper/luks-sda2".to_string()]
        );
    }

    #[tokio::test]
    async fn unsupported_probe_is_a_capability_error() {
        let runner = ScriptedRunner::new();
        let matrix = CapabilityMatrix::all_available();
        let partition = Partition::new("/dev/sda", "/dev/sda1", 0, 99, FileSystemKind::Fat32);
        assert!(matches!(
            read_used_capacity(&partition, &runner, &matrix).await,
            Err(ProbeError::Unsupported(_))
        ));
    }
}
