// SPDX-License-Identifier: GPL-3.0-only

//! Build the device/partition model from an `lsblk` scan.

use partops_contracts::ToolRunner;
use partops_sys::{
    BlockDeviceRow, MountEntry, Result, mount_point_in, read_mounts, scan_block_devices,
};
use partops_types::{ByteRange, DEFAULT_SECTOR_SIZE, FileSystemKind};
use tracing::{debug, warn};

use crate::device::{Device, Partition};
use crate::variant::{FileSystemInfo, FileSystemVariant};

/// lsblk START is always in 512-byte units
const LSBLK_UNIT: u64 = 512;

#[derive(Debug, Clone)]
pub struct ScannedDevice {
    pub device: Device,
    pub partitions: Vec<Partition>,
}

/// Variant for `row` spanning `range`, plus the mount point of the innermost
/// filesystem. Active crypt children become the container's inner variant.
fn variant_for(row: &BlockDeviceRow, range: ByteRange) -> (FileSystemVariant, Option<String>) {
    let kind = FileSystemKind::from_probe(
        row.fstype.as_deref().unwrap_or(""),
        row.fsver.as_deref(),
    );
    let mut info = FileSystemInfo::new(kind, range);
    info.label = row.label.clone();
    info.uuid = row.uuid.clone();
    let mut variant = FileSystemVariant::from_info(info);

    let mapping = row.children.iter().find(|child| child.kind == "crypt");
    let mount_point = match (variant.as_container_mut(), mapping) {
        (Some(container), Some(child)) => {
            let inner_size = child.size.unwrap_or(range.size()).min(range.size());
            let inner_range = ByteRange::new(range.end - inner_size, range.end);
            let (inner, mount_point) = variant_for(child, inner_range);
            container.crypt.payload_offset = Some(range.size() - inner_size);
            container.crypt.payload_size = Some(inner_size);
            container.mapper_name = Some(child.name.clone());
            container.inner = Some(Box::new(inner));
            mount_point
        }
        _ => row.mountpoint.clone(),
    };
    (variant, mount_point)
}

/// `None` for rows without usable geometry.
pub fn partition_from_row(disk: &BlockDeviceRow, row: &BlockDeviceRow) -> Option<Partition> {
    let sector_size = disk
        .log_sec
        .or(row.log_sec)
        .filter(|size| *size > 0)
        .unwrap_or(DEFAULT_SECTOR_SIZE);
    let first_sector = row.start? * LSBLK_UNIT / sector_size;
    let sectors = row.size? / sector_size;
    if sectors == 0 {
        return None;
    }
    let last_sector = first_sector + sectors - 1;

    let partition = Partition::new(
        disk.path.clone(),
        row.path.clone(),
        first_sector,
        last_sector,
        FileSystemKind::Unformatted,
    )
    .with_sector_size(sector_size);

    let (filesystem, mount_point) = variant_for(row, partition.range());
    let crypt_open = filesystem
        .as_container()
        .is_some_and(|container| container.inner.is_some());
    let mut partition = partition.with_filesystem(filesystem);
    partition.set_crypt_open(crypt_open);
    partition.set_mounted(mount_point);
    Some(partition)
}

pub fn devices_from_rows(rows: &[BlockDeviceRow]) -> Vec<ScannedDevice> {
    rows.iter()
        .filter(|row| row.kind == "disk")
        .map(|disk| {
            let mut device = Device::new(disk.path.clone(), disk.size.unwrap_or(0));
            device.sector_size = disk.log_sec.unwrap_or(DEFAULT_SECTOR_SIZE);
            let partitions = disk
                .children
                .iter()
                .filter(|row| row.is_partition())
                .filter_map(|row| partition_from_row(disk, row))
                .collect();
            ScannedDevice { device, partitions }
        })
        .collect()
}

/// Fill in mount points `lsblk` left empty from the kernel mount table.
/// Containers are looked up through their mapper node; closed ones are skipped.
pub fn apply_mount_table(devices: &mut [ScannedDevice], mounts: &[MountEntry]) {
    let partitions = devices
        .iter_mut()
        .flat_map(|scanned| scanned.partitions.iter_mut());
    for partition in partitions {
        if partition.is_mounted() {
            continue;
        }
        let Some((node, _)) = partition.filesystem().resolve(partition.node()) else {
            continue;
        };
        if let Some(mount_point) = mount_point_in(mounts, &node) {
            debug!(node = %node, mount_point = %mount_point, "mount found in mount table");
            partition.set_mounted(Some(mount_point));
        }
    }
}

pub async fn scan(runner: &dyn ToolRunner) -> Result<Vec<ScannedDevice>> {
    let mut devices = devices_from_rows(&scan_block_devices(runner).await?);
    match read_mounts().await {
        Ok(mounts) => apply_mount_table(&mut devices, &mounts),
        Err(e) => warn!("cannot read the mount table: {e}"),
    }
    Ok(devices)
}

/// Locate the partition with device node `node` among `devices`.
pub fn find_partition(devices: &[ScannedDevice], node: &str) -> Option<Partition> {
    devices
        .iter()
        .flat_map(|scanned| scanned.partitions.iter())
        .find(|partition| partition.node() == node)
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRunner;
    use partops_sys::lsblk::parse_lsblk;

    const SAMPLE: &str = r#"{"blockdevices": [
      {"name":"sda", "path":"/dev/sda", "pkname":null, "type":"disk", "fstype":null, "fsver":null, "label":null, "uuid":null, "start":null, "size":64424509440, "mountpoint":null, "log-sec":512,
       "children": [
          {"name":"sda1", "path":"/dev/sda1", "pkname":"sda", "type":"part", "fstype":"ext4", "fsver":"1.0", "label":"root", "uuid":"abcd", "start":2048, "size":1073741824, "mountpoint":"/", "log-sec":512},
          {"name":"sda2", "path":"/dev/sda2", "pkname":"sda", "type":"part", "fstype":"crypto_LUKS", "fsver":"2", "label":null, "uuid":"ef01", "start":2099200, "size":2147483648, "mountpoint":null, "log-sec":512,
           "children": [
              {"name":"luks-ef01", "path":"/dev/mapper/luks-ef01", "pkname":"sda2", "type":"crypt", "fstype":"btrfs", "fsver":null, "label":"data", "uuid":"9999", "start":null, "size":2130706432, "mountpoint":"/data", "log-sec":512}
           ]},
          {"name":"sda3", "path":"/dev/sda3", "pkname":"sda", "type":"part", "fstype":"crypto_LUKS", "fsver":"1", "label":null, "uuid":"aa", "start":6293504, "size":1048576, "mountpoint":null, "log-sec":512}
       ]}
    ]}"#;

    fn scanned() -> Vec<ScannedDevice> {
        devices_from_rows(&parse_lsblk(SAMPLE).unwrap())
    }

    #[test]
    fn plain_partition_geometry_and_mount() {
        let devices = scanned();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].device.length, 64_424_509_440);

        let root = find_partition(&devices, "/dev/sda1").unwrap();
        assert_eq!(root.first_sector(), 2048);
        assert_eq!(root.length(), 1_073_741_824);
        assert_eq!(root.kind(), FileSystemKind::Ext4);
        assert_eq!(root.mount_point(), Some("/"));
        assert_eq!(root.filesystem().info().label.as_deref(), Some("root"));
    }

    #[test]
    fn active_mapping_becomes_open_container() {
        let devices = scanned();
        let data = find_partition(&devices, "/dev/sda2").unwrap();
        assert_eq!(data.kind(), FileSystemKind::Luks2);
        assert!(data.is_crypt_open());
        assert_eq!(data.mount_point(), Some("/data"));

        let container = data.filesystem().as_container().unwrap();
        assert_eq!(container.mapper_name.as_deref(), Some("luks-ef01"));
        assert_eq!(container.crypt.payload_offset, Some(16 * 1024 * 1024));
        let (node, inner) = data.filesystem().resolve(data.node()).unwrap();
        assert_eq!(node, "/dev/mapper/luks-ef01");
        assert_eq!(inner.kind(), FileSystemKind::Btrfs);
    }

    #[test]
    fn closed_container_has_no_inner() {
        let devices = scanned();
        let closed = find_partition(&devices, "/dev/sda3").unwrap();
        assert_eq!(closed.kind(), FileSystemKind::Luks);
        assert!(!closed.is_crypt_open());
        assert!(closed.filesystem().as_container().unwrap().inner.is_none());
        assert!(find_partition(&devices, "/dev/sdz1").is_none());
    }

    #[test]
    fn mount_table_fills_missing_mount_points() {
        let mut devices = scanned();
        devices[0].partitions[1].set_mounted(None);
        let mounts = partops_sys::mounts::parse_mounts(
            "/dev/mapper/luks-ef01 /srv/data btrfs rw 0 0\n/dev/sda3 /mnt/odd ext4 rw 0 0\n",
        );

        apply_mount_table(&mut devices, &mounts);

        let data = find_partition(&devices, "/dev/sda2").unwrap();
        assert_eq!(data.mount_point(), Some("/srv/data"));
        let root = find_partition(&devices, "/dev/sda1").unwrap();
        assert_eq!(root.mount_point(), Some("/"));
        // closed container: nothing reachable to be mounted
        let closed = find_partition(&devices, "/dev/sda3").unwrap();
        assert!(!closed.is_mounted());
    }

    #[tokio::test]
    async fn block_devices_are_listed_through_the_runner() {
        let runner = ScriptedRunner::new();
        runner.succeed("lsblk", SAMPLE);

        let rows = scan_block_devices(&runner).await.unwrap();
        assert_eq!(devices_from_rows(&rows)[0].partitions.len(), 3);
        let calls = runner.rendered();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].starts_with("lsblk --json --bytes --output NAME,PATH"));
    }

    #[tokio::test]
    async fn failing_or_missing_lsblk_is_an_error() {
        let runner = ScriptedRunner::new();
        runner.fail("lsblk", 32, "lsblk: unknown column");
        assert!(scan_block_devices(&runner).await.is_err());

        let runner = ScriptedRunner::new();
        runner.mark_missing("lsblk");
        assert!(scan(&runner).await.is_err());
    }
}
