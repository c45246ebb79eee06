// SPDX-License-Identifier: GPL-3.0-only

//! Partition and filesystem orchestration
//!
//! - [`capability`]: the static capability table and per-process tool downgrade
//! - [`variant`]: plain, container and detected filesystem variants
//! - [`device`]: partitions and their live state
//! - [`container`]: opening and closing encrypted containers
//! - [`jobs`], [`operations`], [`scheduler`]: executing user-visible actions
//!
//! Capability queries are pure; everything that touches a device goes through
//! a [`ToolRunner`](partops_contracts::ToolRunner) or a
//! [`BlockCopier`](partops_contracts::BlockCopier).

pub mod capability;
pub mod container;
pub mod device;
pub mod jobs;
pub mod operations;
pub mod probe;
pub mod scan;
pub mod scheduler;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod variant;

pub use capability::CapabilityMatrix;
pub use container::Credentials;
pub use device::{Device, Partition, PartitionHandle};
pub use jobs::{Job, JobContext, JobRecord, JobState, JobTarget};
pub use operations::{Operation, OperationTarget};
pub use scheduler::{FailedJob, OperationResult, OperationStatus, Scheduler, SchedulerConfig};
pub use variant::{ContainerFileSystem, FileSystemInfo, FileSystemVariant, LiveState};
