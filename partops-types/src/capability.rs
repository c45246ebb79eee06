//! Action and support-level vocabulary
//!
//! An [`Action`] is something a caller may ask of a filesystem; a
//! [`SupportLevel`] says whether and how it can be carried out.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How an action is supported for a filesystem kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupportLevel {
    /// The action cannot be performed
    Unsupported,
    /// Performed by a built-in algorithm (e.g. byte copy)
    Core,
    /// Performed by invoking an external utility
    ExternalTool,
}

impl SupportLevel {
    pub fn is_supported(self) -> bool {
        self != Self::Unsupported
    }
}

/// Mount state an action needs before it may run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountRequirement {
    Mounted,
    Unmounted,
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    Grow,
    GrowOnline,
    Shrink,
    ShrinkOnline,
    Move,
    Check,
    CheckOnline,
    Copy,
    Backup,
    SetLabel,
    UpdateUuid,
    GetUuid,
    GetUsed,
    GetLabel,
}

impl Action {
    pub const ALL: [Action; 15] = [
        Action::Create,
        Action::Grow,
        Action::GrowOnline,
        Action::Shrink,
        Action::ShrinkOnline,
        Action::Move,
        Action::Check,
        Action::CheckOnline,
        Action::Copy,
        Action::Backup,
        Action::SetLabel,
        Action::UpdateUuid,
        Action::GetUuid,
        Action::GetUsed,
        Action::GetLabel,
    ];

    pub fn mount_requirement(self) -> MountRequirement {
        match self {
            Self::GrowOnline | Self::ShrinkOnline | Self::CheckOnline => MountRequirement::Mounted,
            Self::Create
            | Self::Grow
            | Self::Shrink
            | Self::Check
            | Self::Move
            | Self::Copy
            | Self::Backup
            | Self::UpdateUuid => MountRequirement::Unmounted,
            Self::SetLabel | Self::GetUuid | Self::GetUsed | Self::GetLabel => {
                MountRequirement::Any
            }
        }
    }

    /// Actions that inspect or modify the filesystem inside a container.
    pub fn needs_inner_filesystem(self) -> bool {
        matches!(
            self,
            Self::Grow
                | Self::GrowOnline
                | Self::Shrink
                | Self::ShrinkOnline
                | Self::Check
                | Self::CheckOnline
                | Self::SetLabel
        )
    }

    /// Actions that relocate a container's backing store.
    pub fn relocates_backing_store(self) -> bool {
        matches!(self, Self::Move | Self::Copy)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Grow => "grow",
            Self::GrowOnline => "grow-online",
            Self::Shrink => "shrink",
            Self::ShrinkOnline => "shrink-online",
            Self::Move => "move",
            Self::Check => "check",
            Self::CheckOnline => "check-online",
            Self::Copy => "copy",
            Self::Backup => "backup",
            Self::SetLabel => "set-label",
            Self::UpdateUuid => "update-uuid",
            Self::GetUuid => "get-uuid",
            Self::GetUsed => "get-used",
            Self::GetLabel => "get-label",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
