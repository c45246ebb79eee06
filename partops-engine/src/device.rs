// SPDX-License-Identifier: GPL-3.0-only

//! Device/Partition model
//!
//! Read-only geometry plus the two live-state mutators (`set_mounted`,
//! `set_crypt_open`) that containers and jobs call to reflect transitions.

use std::sync::Arc;

use partops_types::{
    Action, ByteRange, DEFAULT_SECTOR_SIZE, FileSystemKind, SupportLevel, bytes_to_pretty,
};
use serde::{Deserialize, Serialize};

use crate::capability::CapabilityMatrix;
use crate::variant::{FileSystemVariant, LiveState};

/// Shared handle jobs hold on a partition. Jobs, container open/close and
/// rescans serialize through this lock.
pub type PartitionHandle = Arc<tokio::sync::Mutex<Partition>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub node: String,
    pub sector_size: u64,
    /// Total size in bytes
    pub length: u64,
}

impl Device {
    pub fn new(node: impl Into<String>, length: u64) -> Self {
        Self {
            node: node.into(),
            sector_size: DEFAULT_SECTOR_SIZE,
            length,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    device_node: String,
    node: String,
    first_sector: u64,
    /// Inclusive
    last_sector: u64,
    sector_size: u64,
    mount_point: Option<String>,
    crypt_open: bool,
    filesystem: FileSystemVariant,
}

impl Partition {
    /// A partition whose filesystem of `kind` spans the whole partition.
    pub fn new(
        device_node: impl Into<String>,
        node: impl Into<String>,
        first_sector: u64,
        last_sector: u64,
        kind: FileSystemKind,
    ) -> Self {
        let range = ByteRange::from_sectors(first_sector, last_sector, DEFAULT_SECTOR_SIZE);
        Self {
            device_node: device_node.into(),
            node: node.into(),
            first_sector,
            last_sector,
            sector_size: DEFAULT_SECTOR_SIZE,
            mount_point: None,
            crypt_open: false,
            filesystem: FileSystemVariant::new(kind, range),
        }
    }

    pub fn with_sector_size(mut self, sector_size: u64) -> Self {
        self.sector_size = sector_size;
        self.filesystem.info_mut().range = self.range();
        self
    }

    pub fn with_filesystem(mut self, filesystem: FileSystemVariant) -> Self {
        self.filesystem = filesystem;
        self
    }

    pub fn into_handle(self) -> PartitionHandle {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    pub fn device_node(&self) -> &str {
        &self.device_node
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn first_sector(&self) -> u64 {
        self.first_sector
    }

    pub fn last_sector(&self) -> u64 {
        self.last_sector
    }

    pub fn sector_size(&self) -> u64 {
        self.sector_size
    }

    /// Absolute byte range on the device
    pub fn range(&self) -> ByteRange {
        ByteRange::from_sectors(self.first_sector, self.last_sector, self.sector_size)
    }

    pub fn length(&self) -> u64 {
        self.range().size()
    }

    pub fn mount_point(&self) -> Option<&str> {
        self.mount_point.as_deref()
    }

    pub fn is_mounted(&self) -> bool {
        self.mount_point.is_some()
    }

    pub fn is_crypt_open(&self) -> bool {
        self.crypt_open
    }

    pub fn set_mounted(&mut self, mount_point: Option<String>) {
        self.mount_point = mount_point;
    }

    pub fn set_crypt_open(&mut self, open: bool) {
        self.crypt_open = open;
    }

    pub fn live_state(&self) -> LiveState {
        LiveState {
            mounted: self.is_mounted(),
            crypt_open: self.crypt_open,
        }
    }

    pub fn filesystem(&self) -> &FileSystemVariant {
        &self.filesystem
    }

    pub fn filesystem_mut(&mut self) -> &mut FileSystemVariant {
        &mut self.filesystem
    }

    pub fn kind(&self) -> FileSystemKind {
        self.filesystem.kind()
    }

    pub fn capability(&self, action: Action, matrix: &CapabilityMatrix) -> SupportLevel {
        self.filesystem.capability(action, self.live_state(), matrix)
    }

    /// "/dev/sda1 (10.00 GB, ext4)"
    pub fn summary(&self) -> String {
        format!(
            "{} ({}, {})",
            self.node,
            bytes_to_pretty(&self.length(), false),
            self.kind()
        )
    }
}
