// SPDX-License-Identifier: GPL-3.0-only

//! Filesystem Variant
//!
//! A tagged model of what lives on a partition. Capability dispatch is a pure
//! function of the tag, the variant's own data and an explicit [`LiveState`];
//! nothing here mutates while answering a query.

use std::collections::BTreeMap;

use partops_contracts::CapabilityError;
use partops_types::{Action, ByteRange, CryptParams, FileSystemKind, SupportLevel, VariantTag};
use serde::{Deserialize, Serialize};

use crate::capability::CapabilityMatrix;

/// Live state of the outermost layer on a partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveState {
    /// The filesystem (for containers: the inner filesystem) is mounted
    pub mounted: bool,
    /// The container mapping is active
    pub crypt_open: bool,
}

impl LiveState {
    pub fn offline() -> Self {
        Self::default()
    }

    pub fn mounted() -> Self {
        Self {
            mounted: true,
            crypt_open: false,
        }
    }
}

/// Attributes common to every variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSystemInfo {
    pub kind: FileSystemKind,
    pub label: Option<String>,
    pub uuid: Option<String>,
    /// Absolute byte range occupied on the device
    pub range: ByteRange,
    /// Estimated used bytes, when known
    pub used: Option<u64>,
    /// Feature flags (option -> value)
    #[serde(default)]
    pub features: BTreeMap<String, String>,
}

impl FileSystemInfo {
    pub fn new(kind: FileSystemKind, range: ByteRange) -> Self {
        Self {
            kind,
            label: None,
            uuid: None,
            range,
            used: None,
            features: BTreeMap::new(),
        }
    }

    pub fn length(&self) -> u64 {
        self.range.size()
    }
}

/// A container (LUKS) and, once opened, the filesystem it exposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerFileSystem {
    pub info: FileSystemInfo,
    /// Present only while the mapping is active
    pub inner: Option<Box<FileSystemVariant>>,
    /// Filled by a successful open/inspect
    pub crypt: CryptParams,
    pub mapper_name: Option<String>,
}

impl ContainerFileSystem {
    pub fn new(info: FileSystemInfo) -> Self {
        Self {
            info,
            inner: None,
            crypt: CryptParams::default(),
            mapper_name: None,
        }
    }

    pub fn mapper_node(&self) -> Option<String> {
        self.mapper_name
            .as_ref()
            .map(|name| format!("/dev/mapper/{name}"))
    }

    /// Mapper name to use when opening: `luks-<uuid>`, else `luks-<node basename>`.
    pub fn suggest_mapper_name(&self, partition_node: &str) -> String {
        match self.info.uuid.as_deref().filter(|uuid| !uuid.is_empty()) {
            Some(uuid) => format!("luks-{uuid}"),
            None => {
                let base = partition_node.rsplit('/').next().unwrap_or(partition_node);
                format!("luks-{base}")
            }
        }
    }

    fn capability(
        &self,
        action: Action,
        live: LiveState,
        matrix: &CapabilityMatrix,
    ) -> SupportLevel {
        if action.needs_inner_filesystem() {
            if !live.crypt_open {
                return SupportLevel::Unsupported;
            }
            return match &self.inner {
                Some(inner) => inner.capability(
                    action,
                    LiveState {
                        mounted: live.mounted,
                        crypt_open: inner.has_open_inner(),
                    },
                    matrix,
                ),
                None => SupportLevel::Unsupported,
            };
        }

        if action.relocates_backing_store() && live.crypt_open {
            return SupportLevel::Unsupported;
        }

        matrix.evaluate(self.info.kind, action, live.mounted)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "variant")]
pub enum FileSystemVariant {
    Plain(FileSystemInfo),
    Container(ContainerFileSystem),
    /// Recognised but not manageable beyond raw copies
    Detected(FileSystemInfo),
}

impl FileSystemVariant {
    /// Variant matching the kind's tag, with no inner filesystem.
    pub fn from_info(info: FileSystemInfo) -> Self {
        match info.kind.tag() {
            VariantTag::Plain => Self::Plain(info),
            VariantTag::Container => Self::Container(ContainerFileSystem::new(info)),
            VariantTag::Detected => Self::Detected(info),
        }
    }

    pub fn new(kind: FileSystemKind, range: ByteRange) -> Self {
        Self::from_info(FileSystemInfo::new(kind, range))
    }

    pub fn tag(&self) -> VariantTag {
        match self {
            Self::Plain(_) => VariantTag::Plain,
            Self::Container(_) => VariantTag::Container,
            Self::Detected(_) => VariantTag::Detected,
        }
    }

    pub fn info(&self) -> &FileSystemInfo {
        match self {
            Self::Plain(info) | Self::Detected(info) => info,
            Self::Container(container) => &container.info,
        }
    }

    pub fn info_mut(&mut self) -> &mut FileSystemInfo {
        match self {
            Self::Plain(info) | Self::Detected(info) => info,
            Self::Container(container) => &mut container.info,
        }
    }

    pub fn kind(&self) -> FileSystemKind {
        self.info().kind
    }

    pub fn as_container(&self) -> Option<&ContainerFileSystem> {
        match self {
            Self::Container(container) => Some(container),
            _ => None,
        }
    }

    pub fn as_container_mut(&mut self) -> Option<&mut ContainerFileSystem> {
        match self {
            Self::Container(container) => Some(container),
            _ => None,
        }
    }

    /// Open state of a nested container: the presence of its inner variant.
    fn has_open_inner(&self) -> bool {
        self.as_container()
            .is_some_and(|container| container.inner.is_some())
    }

    /// How `action` can be carried out right now.
    pub fn capability(
        &self,
        action: Action,
        live: LiveState,
        matrix: &CapabilityMatrix,
    ) -> SupportLevel {
        match self {
            Self::Plain(info) | Self::Detected(info) => {
                matrix.evaluate(info.kind, action, live.mounted)
            }
            Self::Container(container) => container.capability(action, live, matrix),
        }
    }

    /// [`capability`](Self::capability), with `Unsupported` as an error for `?`.
    pub fn require(
        &self,
        action: Action,
        live: LiveState,
        matrix: &CapabilityMatrix,
    ) -> Result<SupportLevel, CapabilityError> {
        match self.capability(action, live, matrix) {
            SupportLevel::Unsupported => Err(CapabilityError {
                action,
                kind: self.kind(),
            }),
            level => Ok(level),
        }
    }

    /// The innermost reachable filesystem and the node it is accessed
    /// through. `None` when a container on the way is closed.
    pub fn resolve<'a>(&'a self, node: &str) -> Option<(String, &'a FileSystemVariant)> {
        match self {
            Self::Container(container) => {
                let inner = container.inner.as_deref()?;
                let mapper = container.mapper_node()?;
                inner.resolve(&mapper)
            }
            _ => Some((node.to_string(), self)),
        }
    }

    pub fn resolve_mut<'a>(
        &'a mut self,
        node: &str,
    ) -> Option<(String, &'a mut FileSystemVariant)> {
        match self {
            Self::Container(container) => {
                let mapper = container.mapper_node()?;
                let inner = container.inner.as_deref_mut()?;
                inner.resolve_mut(&mapper)
            }
            _ => Some((node.to_string(), self)),
        }
    }

    /// Bytes between the start of this layer and the innermost filesystem.
    pub fn payload_offset(&self) -> u64 {
        match self {
            Self::Container(container) => {
                let own = container.crypt.payload_offset.unwrap_or(0);
                own + container
                    .inner
                    .as_deref()
                    .map_or(0, FileSystemVariant::payload_offset)
            }
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ext4() -> FileSystemVariant {
        FileSystemVariant::new(FileSystemKind::Ext4, ByteRange::new(0, 1 << 30))
    }

    fn luks_around(inner: Option<FileSystemVariant>) -> FileSystemVariant {
        let mut container =
            ContainerFileSystem::new(FileSystemInfo::new(FileSystemKind::Luks2, ByteRange::new(0, 1 << 30)));
        container.inner = inner.map(Box::new);
        container.mapper_name = Some("luks-test".to_string());
        FileSystemVariant::Container(container)
    }

    const OPEN: LiveState = LiveState {
        mounted: false,
        crypt_open: true,
    };

    #[test]
    fn closed_container_hides_inner_actions() {
        let matrix = CapabilityMatrix::all_available();
        let closed = luks_around(Some(ext4()));
        for action in Action::ALL.into_iter().filter(|a| a.needs_inner_filesystem()) {
            assert_eq!(
                closed.capability(action, LiveState::offline(), &matrix),
                SupportLevel::Unsupported,
                "{action}"
            );
        }
    }

    #[test]
    fn open_container_delegates_to_inner() {
        let matrix = CapabilityMatrix::all_available();
        let inner = ext4();
        let open = luks_around(Some(inner.clone()));
        for action in Action::ALL.into_iter().filter(|a| a.needs_inner_filesystem()) {
            for mounted in [false, true] {
                let live = LiveState {
                    mounted,
                    crypt_open: true,
                };
                assert_eq!(
                    open.capability(action, live, &matrix),
                    inner.capability(action, LiveState { mounted, crypt_open: false }, &matrix),
                    "{action} mounted={mounted}"
                );
            }
        }
    }

    #[test]
    fn open_container_cannot_be_relocated() {
        let matrix = CapabilityMatrix::all_available();
        let container = luks_around(Some(ext4()));
        assert_eq!(container.capability(Action::Move, OPEN, &matrix), SupportLevel::Unsupported);
        assert_eq!(container.capability(Action::Copy, OPEN, &matrix), SupportLevel::Unsupported);
        assert_eq!(
            container.capability(Action::Copy, LiveState::offline(), &matrix),
            SupportLevel::Core
        );
        // backup follows the container's own entry whatever the open state
        assert_eq!(container.capability(Action::Backup, OPEN, &matrix), SupportLevel::Core);
    }

    #[test]
    fn nested_container_uses_presence_of_its_inner() {
        let matrix = CapabilityMatrix::all_available();
        let nested_closed = luks_around(Some(luks_around(None)));
        assert_eq!(
            nested_closed.capability(Action::Check, OPEN, &matrix),
            SupportLevel::Unsupported
        );

        let nested_open = luks_around(Some(luks_around(Some(ext4()))));
        assert_eq!(
            nested_open.capability(Action::Check, OPEN, &matrix),
            SupportLevel::ExternalTool
        );
    }

    #[test]
    fn require_reports_kind_and_action() {
        let matrix = CapabilityMatrix::all_available();
        let error = luks_around(None)
            .require(Action::Grow, LiveState::offline(), &matrix)
            .unwrap_err();
        assert_eq!(error.action, Action::Grow);
        assert_eq!(error.kind, FileSystemKind::Luks2);
    }

    #[test]
    fn resolve_walks_through_open_containers() {
        let open = luks_around(Some(ext4()));
        let (node, inner) = open.resolve("/dev/sda2").unwrap();
        assert_eq!(node, "/dev/mapper/luks-test");
        assert_eq!(inner.kind(), FileSystemKind::Ext4);

        assert!(luks_around(None).resolve("/dev/sda2").is_none());
        assert_eq!(ext4().resolve("/dev/sda1").unwrap().0, "/dev/sda1");
    }

    #[test]
    fn mapper_name_prefers_uuid() {
        let mut container =
            ContainerFileSystem::new(FileSystemInfo::new(FileSystemKind::Luks, ByteRange::new(0, 10)));
        assert_eq!(container.suggest_mapper_name("/dev/sdb3"), "luks-sdb3");
        container.info.uuid = Some("1234-abcd".to_string());
        assert_eq!(container.suggest_mapper_name("/dev/sdb3"), "luks-1234-abcd");
    }
}
