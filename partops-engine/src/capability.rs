// SPDX-License-Identifier: GPL-3.0-only

//! Capability Matrix
//!
//! A static (kind, action) table of how each action is carried out, plus the
//! tool availability probed once for this process. The static table is never
//! touched at runtime; a missing tool only downgrades the answer given by a
//! [`CapabilityMatrix`] instance.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use partops_types::{Action, FileSystemKind, MountRequirement, SupportLevel, ToolAvailability};

/// One cell of the static table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry {
    Unsupported,
    Core,
    External {
        tool: &'static str,
        package_hint: &'static str,
    },
}

const E2FSPROGS: &str = "e2fsprogs";
const XFSPROGS: &str = "xfsprogs";
const BTRFS_PROGS: &str = "btrfs-progs";
const DOSFSTOOLS: &str = "dosfstools";
const FATRESIZE: &str = "fatresize";
const NTFS_3G: &str = "ntfs-3g / ntfsprogs";
const EXFATPROGS: &str = "exfatprogs";
const CRYPTSETUP: &str = "cryptsetup";
const UTIL_LINUX: &str = "util-linux";

const fn tool(tool: &'static str, package_hint: &'static str) -> Entry {
    Entry::External { tool, package_hint }
}

type Profile = BTreeMap<Action, Entry>;

fn profile(entries: &[(Action, Entry)]) -> Profile {
    entries.iter().copied().collect()
}

fn ext_profile(mkfs: &'static str, online_grow: bool) -> Profile {
    use Action::*;
    let mut entries = vec![
        (Create, tool(mkfs, E2FSPROGS)),
        (Grow, tool("resize2fs", E2FSPROGS)),
        (Shrink, tool("resize2fs", E2FSPROGS)),
        (Move, Entry::Core),
        (Check, tool("e2fsck", E2FSPROGS)),
        (Copy, Entry::Core),
        (Backup, Entry::Core),
        (SetLabel, tool("e2label", E2FSPROGS)),
        (UpdateUuid, tool("tune2fs", E2FSPROGS)),
        (GetUuid, tool("blkid", UTIL_LINUX)),
        (GetUsed, tool("dumpe2fs", E2FSPROGS)),
        (GetLabel, tool("blkid", UTIL_LINUX)),
    ];
    if online_grow {
        entries.push((GrowOnline, tool("resize2fs", E2FSPROGS)));
    }
    profile(&entries)
}

static CAPABILITY_TABLE: LazyLock<BTreeMap<FileSystemKind, Profile>> = LazyLock::new(|| {
    use Action::*;

    let relocatable = [
        (Move, Entry::Core),
        (Copy, Entry::Core),
        (Backup, Entry::Core),
    ];

    let mut table = BTreeMap::new();
    table.insert(FileSystemKind::Ext2, ext_profile("mkfs.ext2", false));
    table.insert(FileSystemKind::Ext3, ext_profile("mkfs.ext3", true));
    table.insert(FileSystemKind::Ext4, ext_profile("mkfs.ext4", true));

    let mut xfs = profile(&[
        (Create, tool("mkfs.xfs", XFSPROGS)),
        (GrowOnline, tool("xfs_growfs", XFSPROGS)),
        (Check, tool("xfs_repair", XFSPROGS)),
        (SetLabel, tool("xfs_admin", XFSPROGS)),
        (UpdateUuid, tool("xfs_admin", XFSPROGS)),
        (GetUuid, tool("blkid", UTIL_LINUX)),
        (GetLabel, tool("blkid", UTIL_LINUX)),
    ]);
    xfs.extend(relocatable);
    table.insert(FileSystemKind::Xfs, xfs);

    let mut btrfs = profile(&[
        (Create, tool("mkfs.btrfs", BTRFS_PROGS)),
        (GrowOnline, tool("btrfs", BTRFS_PROGS)),
        (ShrinkOnline, tool("btrfs", BTRFS_PROGS)),
        (Check, tool("btrfs", BTRFS_PROGS)),
        (CheckOnline, tool("btrfs", BTRFS_PROGS)),
        (SetLabel, tool("btrfs", BTRFS_PROGS)),
        (UpdateUuid, tool("btrfstune", BTRFS_PROGS)),
        (GetUuid, tool("blkid", UTIL_LINUX)),
        (GetUsed, tool("btrfs", BTRFS_PROGS)),
        (GetLabel, tool("blkid", UTIL_LINUX)),
    ]);
    btrfs.extend(relocatable);
    table.insert(FileSystemKind::Btrfs, btrfs);

    let mut fat = profile(&[
        (Create, tool("mkfs.fat", DOSFSTOOLS)),
        (Grow, tool("fatresize", FATRESIZE)),
        (Shrink, tool("fatresize", FATRESIZE)),
        (Check, tool("fsck.fat", DOSFSTOOLS)),
        (SetLabel, tool("fatlabel", DOSFSTOOLS)),
        (GetUuid, tool("blkid", UTIL_LINUX)),
        (GetLabel, tool("blkid", UTIL_LINUX)),
    ]);
    fat.extend(relocatable);
    table.insert(FileSystemKind::Fat32, fat);

    let mut ntfs = profile(&[
        (Create, tool("mkfs.ntfs", NTFS_3G)),
        (Grow, tool("ntfsresize", NTFS_3G)),
        (Shrink, tool("ntfsresize", NTFS_3G)),
        (Check, tool("ntfsresize", NTFS_3G)),
        (SetLabel, tool("ntfslabel", NTFS_3G)),
        (GetUuid, tool("blkid", UTIL_LINUX)),
        (GetLabel, tool("blkid", UTIL_LINUX)),
    ]);
    ntfs.extend(relocatable);
    table.insert(FileSystemKind::Ntfs, ntfs);

    let mut exfat = profile(&[
        (Create, tool("mkfs.exfat", EXFATPROGS)),
        (Check, tool("fsck.exfat", EXFATPROGS)),
        (SetLabel, tool("exfatlabel", EXFATPROGS)),
        (GetUuid, tool("blkid", UTIL_LINUX)),
        (GetLabel, tool("blkid", UTIL_LINUX)),
    ]);
    exfat.extend(relocatable);
    table.insert(FileSystemKind::Exfat, exfat);

    // Inner-filesystem actions of a container are never read from here.
    let mut luks = profile(&[
        (Create, tool("cryptsetup", CRYPTSETUP)),
        (UpdateUuid, tool("cryptsetup", CRYPTSETUP)),
        (GetUuid, tool("blkid", UTIL_LINUX)),
        (GetUsed, Entry::Core),
        (GetLabel, tool("blkid", UTIL_LINUX)),
    ]);
    luks.extend(relocatable);
    table.insert(FileSystemKind::Luks, luks.clone());
    table.insert(FileSystemKind::Luks2, luks);

    table.insert(FileSystemKind::BitLocker, profile(&relocatable));
    table.insert(FileSystemKind::Unknown, Profile::new());
    table.insert(FileSystemKind::Unformatted, Profile::new());
    table
});

/// Tools the containers need for open/close/resize regardless of the table.
const CONTAINER_TOOLS: [(&str, &str); 2] = [("cryptsetup", CRYPTSETUP), ("blkid", UTIL_LINUX)];

/// Static table entry for `(kind, action)`.
pub fn entry(kind: FileSystemKind, action: Action) -> Entry {
    CAPABILITY_TABLE
        .get(&kind)
        .and_then(|profile| profile.get(&action))
        .copied()
        .unwrap_or(Entry::Unsupported)
}

/// Every (tool, package hint) pair any capability can depend on, deduplicated.
pub fn requirements() -> Vec<(&'static str, &'static str)> {
    let mut seen = BTreeSet::new();
    CAPABILITY_TABLE
        .values()
        .flat_map(|profile| profile.values())
        .filter_map(|entry| match entry {
            Entry::External { tool, package_hint } => Some((*tool, *package_hint)),
            _ => None,
        })
        .chain(CONTAINER_TOOLS)
        .filter(|(tool, _)| seen.insert(*tool))
        .collect()
}

pub fn all_tools() -> Vec<&'static str> {
    requirements().into_iter().map(|(tool, _)| tool).collect()
}

/// Static table plus this process's tool availability.
///
/// Built once at start-up and shared read-only (`Arc`) by variants, jobs
/// and the scheduler.
#[derive(Debug, Clone, Default)]
pub struct CapabilityMatrix {
    tools: ToolAvailability,
}

impl CapabilityMatrix {
    pub fn new(tools: ToolAvailability) -> Self {
        Self { tools }
    }

    /// Every tool present.
    pub fn all_available() -> Self {
        Self::new(ToolAvailability::from_found(all_tools()))
    }

    pub fn tools(&self) -> &ToolAvailability {
        &self.tools
    }

    pub fn has_tool(&self, tool: &str) -> bool {
        self.tools.is_available(tool)
    }

    /// Table level after the per-process tool downgrade, ignoring live state.
    pub fn level(&self, kind: FileSystemKind, action: Action) -> SupportLevel {
        match entry(kind, action) {
            Entry::Unsupported => SupportLevel::Unsupported,
            Entry::Core => SupportLevel::Core,
            Entry::External { tool, .. } if self.tools.is_available(tool) => {
                SupportLevel::ExternalTool
            }
            Entry::External { .. } => SupportLevel::Unsupported,
        }
    }

    /// Base case of a capability query: the table level, unless the action's
    /// mount requirement does not match `mounted`.
    pub fn evaluate(&self, kind: FileSystemKind, action: Action, mounted: bool) -> SupportLevel {
        let fits = match action.mount_requirement() {
            MountRequirement::Mounted => mounted,
            MountRequirement::Unmounted => !mounted,
            MountRequirement::Any => true,
        };
        if fits {
            self.level(kind, action)
        } else {
            SupportLevel::Unsupported
        }
    }

    pub fn tool_for(&self, kind: FileSystemKind, action: Action) -> Option<&'static str> {
        match entry(kind, action) {
            Entry::External { tool, .. } => Some(tool),
            _ => None,
        }
    }
}
