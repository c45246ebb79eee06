// SPDX-License-Identifier: GPL-3.0-only

//! Raw byte copies using direct file I/O
//!
//! Copies a byte range between block devices and image files. This is the
//! built-in algorithm behind copy and backup.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};

use async_trait::async_trait;
use partops_contracts::{BlockCopier, CopyError, CopyRequest};
use tracing::debug;

use crate::error::{Result, SysError};

const BUFFER_SIZE: usize = 1024 * 1024;

fn open_source(path: &str) -> Result<File> {
    OpenOptions::new().read(true).open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            SysError::PermissionDenied(format!("Cannot open {} for reading", path))
        } else if e.kind() == std::io::ErrorKind::NotFound {
            SysError::DeviceNotFound(path.to_string())
        } else {
            SysError::Io(e)
        }
    })
}

fn open_target(path: &str, create: bool) -> Result<File> {
    OpenOptions::new()
        .write(true)
        .create(create)
        .truncate(create)
        .open(path)
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                SysError::PermissionDenied(format!("Cannot open {} for writing", path))
            } else if e.kind() == std::io::ErrorKind::NotFound {
                SysError::DeviceNotFound(path.to_string())
            } else {
                SysError::Io(e)
            }
        })
}

/// Copy `request.length` bytes, calling `progress_callback` with the running total.
pub fn copy_range<F>(request: &CopyRequest, mut progress_callback: Option<F>) -> Result<u64>
where
    F: FnMut(u64),
{
    let mut source = open_source(&request.source)?;
    let mut dest = open_target(&request.target, request.create_target)?;
    source.seek(SeekFrom::Start(request.source_offset))?;
    dest.seek(SeekFrom::Start(request.target_offset))?;

    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut total_copied: u64 = 0;

    while total_copied < request.length {
        let want = (request.length - total_copied).min(BUFFER_SIZE as u64) as usize;
        let bytes_read = source.read(&mut buffer[..want])?;
        if bytes_read == 0 {
            break;
        }

        dest.write_all(&buffer[..bytes_read])?;
        total_copied += bytes_read as u64;

        if let Some(ref mut callback) = progress_callback {
            callback(total_copied);
        }
    }

    dest.sync_all()?;
    Ok(total_copied)
}

/// [`BlockCopier`] over local files and device nodes.
#[derive(Debug, Clone, Default)]
pub struct FileBlockCopier;

#[async_trait]
impl BlockCopier for FileBlockCopier {
    async fn copy(&self, request: &CopyRequest) -> std::result::Result<u64, CopyError> {
        let owned = request.clone();
        let copied = tokio::task::spawn_blocking(move || {
            copy_range(
                &owned,
                Some(|bytes: u64| {
                    if bytes % (256 * BUFFER_SIZE as u64) == 0 {
                        debug!(bytes, target = %owned.target, "copy progress");
                    }
                }),
            )
        })
        .await
        .map_err(|e| CopyError::Io(format!("Task join error: {e}")))?
        .map_err(|e| {
            let reason = e.to_string();
            match e {
                SysError::PermissionDenied(path) | SysError::DeviceNotFound(path) => {
                    CopyError::Open { path, reason }
                }
                _ => CopyError::Io(reason),
            }
        })?;

        if copied != request.length {
            return Err(CopyError::Short {
                expected: request.length,
                copied,
            });
        }
        Ok(copied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn copies_a_range_between_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.img");
        let target = dir.path().join("target.img");
        let data: Vec<u8> = (0..=255u8).cycle().take(8192).collect();
        std::fs::write(&source, &data).unwrap();
        std::fs::write(&target, vec![0u8; 8192]).unwrap();

        let request = CopyRequest {
            source: source.display().to_string(),
            source_offset: 1024,
            target: target.display().to_string(),
            target_offset: 4096,
            length: 2048,
            create_target: false,
        };
        let copied = FileBlockCopier.copy(&request).await.unwrap();

        assert_eq!(copied, 2048);
        let written = std::fs::read(&target).unwrap();
        assert_eq!(written.len(), 8192);
        assert_eq!(&written[4096..6144], &data[1024..3072]);
        assert!(written[..4096].iter().all(|byte| *byte == 0));
    }

    #[tokio::test]
    async fn short_source_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("small.img");
        std::fs::write(&source, [1u8; 100]).unwrap();

        let request = CopyRequest {
            source: source.display().to_string(),
            source_offset: 0,
            target: dir.path().join("backup.img").display().to_string(),
            target_offset: 0,
            length: 4096,
            create_target: true,
        };
        let error = FileBlockCopier.copy(&request).await.unwrap_err();

        assert_eq!(
            error,
            CopyError::Short {
                expected: 4096,
                copied: 100
            }
        );
    }

    #[tokio::test]
    async fn missing_source_reports_open_failure() {
        let request = CopyRequest {
            source: "/nonexistent/partops/source".to_string(),
            source_offset: 0,
            target: "/nonexistent/partops/target".to_string(),
            target_offset: 0,
            length: 1,
            create_target: true,
        };
        let error = FileBlockCopier.copy(&request).await.unwrap_err();
        assert!(matches!(error, CopyError::Open { .. }));
    }
}
