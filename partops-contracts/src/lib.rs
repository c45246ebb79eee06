// SPDX-License-Identifier: GPL-3.0-only

pub mod error;
pub mod protocol;
pub mod traits;

pub use error::{
    CapabilityError, CloseError, ConflictError, CopyError, JobError, OpenError, ProbeError,
    ToolError,
};
pub use protocol::{JobProgress, OperationEvent, OperationId, OperationKind};
pub use traits::{
    BlockCopier, CopyRequest, ProgressObserver, ToolCommand, ToolOutput, ToolRunner,
};
