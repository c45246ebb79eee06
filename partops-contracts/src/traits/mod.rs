// SPDX-License-Identifier: GPL-3.0-only

pub mod copier;
pub mod observer;
pub mod runner;

pub use copier::{BlockCopier, CopyRequest};
pub use observer::ProgressObserver;
pub use runner::{ToolCommand, ToolOutput, ToolRunner};
