// SPDX-License-Identifier: GPL-3.0-only

pub mod ids;
pub mod operations;

pub use ids::OperationId;
pub use operations::{JobProgress, OperationEvent, OperationKind};
