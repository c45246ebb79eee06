//! Filesystem kinds
//!
//! A kind names what was detected on a partition. Its [`VariantTag`] decides
//! which capability rules apply to it.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Filesystem kind (e.g. "ext4", "luks2")
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileSystemKind {
    Ext2,
    Ext3,
    Ext4,
    Xfs,
    Btrfs,
    Fat32,
    Ntfs,
    Exfat,
    Luks,
    Luks2,
    BitLocker,
    Unknown,
    Unformatted,
}

/// Which family of capability rules a kind follows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantTag {
    /// A filesystem that can be inspected and modified directly
    Plain,
    /// A wrapper that exposes an inner filesystem once opened
    Container,
    /// Recognised but not manageable beyond raw copies
    Detected,
}

impl FileSystemKind {
    pub fn tag(self) -> VariantTag {
        match self {
            Self::Ext2
            | Self::Ext3
            | Self::Ext4
            | Self::Xfs
            | Self::Btrfs
            | Self::Fat32
            | Self::Ntfs
            | Self::Exfat => VariantTag::Plain,
            Self::Luks | Self::Luks2 => VariantTag::Container,
            Self::BitLocker | Self::Unknown | Self::Unformatted => VariantTag::Detected,
        }
    }

    pub fn is_ext(self) -> bool {
        matches!(self, Self::Ext2 | Self::Ext3 | Self::Ext4)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Ext2 => "ext2",
            Self::Ext3 => "ext3",
            Self::Ext4 => "ext4",
            Self::Xfs => "xfs",
            Self::Btrfs => "btrfs",
            Self::Fat32 => "fat32",
            Self::Ntfs => "ntfs",
            Self::Exfat => "exfat",
            Self::Luks => "luks",
            Self::Luks2 => "luks2",
            Self::BitLocker => "bitlocker",
            Self::Unknown => "unknown",
            Self::Unformatted => "unformatted",
        }
    }

    /// Map a `blkid`/`lsblk` TYPE value to a kind.
    ///
    /// `version` is the blkid VERSION field, which distinguishes LUKS1 from LUKS2.
    pub fn from_probe(fs_type: &str, version: Option<&str>) -> Self {
        match fs_type.trim().to_ascii_lowercase().as_str() {
            "" => Self::Unformatted,
            "ext2" => Self::Ext2,
            "ext3" => Self::Ext3,
            "ext4" => Self::Ext4,
            "xfs" => Self::Xfs,
            "btrfs" => Self::Btrfs,
            "vfat" | "fat32" | "fat16" => Self::Fat32,
            "ntfs" | "ntfs3" => Self::Ntfs,
            "exfat" => Self::Exfat,
            "crypto_luks" | "luks" => match version.map(str::trim) {
                Some("2") => Self::Luks2,
                _ => Self::Luks,
            },
            "luks2" => Self::Luks2,
            "bitlocker" => Self::BitLocker,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for FileSystemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
