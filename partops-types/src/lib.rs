// SPDX-License-Identifier: GPL-3.0-only

//! Canonical data models for partition and filesystem operations
//!
//! This crate holds plain data only. Behaviour lives elsewhere in the stack:
//!
//! - **partops-contracts**: collaborator traits and the error taxonomy
//! - **partops-sys**: real process execution, probing and parsing
//! - **partops-engine**: capability evaluation, jobs, operations, scheduling
//!
//! Everything here is `serde`-serializable so results can be logged or handed
//! to a presentation layer unchanged.

pub mod capability;
pub mod common;
pub mod encryption;
pub mod filesystem;
pub mod tools;

pub use capability::{Action, MountRequirement, SupportLevel};
pub use common::{ByteRange, DEFAULT_SECTOR_SIZE, bytes_to_pretty, pretty_to_bytes};
pub use encryption::{CryptParams, LuksVersion};
pub use filesystem::{FileSystemKind, VariantTag};
pub use tools::{FsToolInfo, ToolAvailability};
