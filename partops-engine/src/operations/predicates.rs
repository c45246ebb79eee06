// SPDX-License-Identifier: GPL-3.0-only

//! Whether offering an action is valid right now.
//!
//! Pure checks over the current variant capability and mount state, meant
//! to run before an operation is built. An absent partition is always false.

use partops_types::Action;

use crate::capability::CapabilityMatrix;
use crate::device::Partition;

fn online_or_offline(
    partition: Option<&Partition>,
    matrix: &CapabilityMatrix,
    online: Action,
    offline: Action,
) -> bool {
    let Some(partition) = partition else {
        return false;
    };
    let action = if partition.is_mounted() { online } else { offline };
    partition.capability(action, matrix).is_supported()
}

fn supports(partition: Option<&Partition>, matrix: &CapabilityMatrix, action: Action) -> bool {
    partition.is_some_and(|partition| partition.capability(action, matrix).is_supported())
}

pub fn can_check(partition: Option<&Partition>, matrix: &CapabilityMatrix) -> bool {
    online_or_offline(partition, matrix, Action::CheckOnline, Action::Check)
}

pub fn can_grow(partition: Option<&Partition>, matrix: &CapabilityMatrix) -> bool {
    online_or_offline(partition, matrix, Action::GrowOnline, Action::Grow)
}

pub fn can_shrink(partition: Option<&Partition>, matrix: &CapabilityMatrix) -> bool {
    online_or_offline(partition, matrix, Action::ShrinkOnline, Action::Shrink)
}

pub fn can_relabel(partition: Option<&Partition>, matrix: &CapabilityMatrix) -> bool {
    supports(partition, matrix, Action::SetLabel)
}

pub fn can_copy(source: Option<&Partition>, matrix: &CapabilityMatrix) -> bool {
    supports(source, matrix, Action::Copy)
}

pub fn can_backup(partition: Option<&Partition>, matrix: &CapabilityMatrix) -> bool {
    supports(partition, matrix, Action::Backup)
}

/// `source` can be pasted over `target`: a different, unmounted, closed
/// partition at least as large as the source filesystem.
pub fn can_paste(
    target: Option<&Partition>,
    source: Option<&Partition>,
    matrix: &CapabilityMatrix,
) -> bool {
    let (Some(target), Some(source)) = (target, source) else {
        return false;
    };
    if !can_copy(Some(source), matrix) {
        return false;
    }
    let same = target.device_node() == source.device_node() && target.node() == source.node();
    !same
        && !target.is_mounted()
        && !target.is_crypt_open()
        && target.length() >= source.filesystem().info().length()
}
