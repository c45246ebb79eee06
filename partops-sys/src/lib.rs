// SPDX-License-Identifier: GPL-3.0-only

//! Low-level system collaborators for partition operations
//!
//! This crate talks to the real machine:
//! - Running external utilities (`SystemToolRunner`)
//! - Probing `PATH` for the utilities each capability needs
//! - Reading `/proc/mounts` and `lsblk` output
//! - Parsing `cryptsetup`, `blkid`, `dumpe2fs` and `btrfs` output
//! - Raw byte copies between devices and image files
//!
//! Mutating calls require elevated privileges.

pub mod error;
pub mod image;
pub mod lsblk;
pub mod mounts;
pub mod parse;
pub mod probe;
pub mod runner;

pub use error::{Result, SysError};
pub use image::FileBlockCopier;
pub use lsblk::{BlockDeviceRow, scan_block_devices};
pub use mounts::{MountEntry, mount_point_in, read_mounts};
pub use probe::{describe_tools, probe_tools};
pub use runner::SystemToolRunner;
