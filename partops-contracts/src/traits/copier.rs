// SPDX-License-Identifier: GPL-3.0-only

use async_trait::async_trait;

use crate::CopyError;

/// Raw byte copy between block devices and/or image files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyRequest {
    pub source: String,
    pub source_offset: u64,
    pub target: String,
    pub target_offset: u64,
    pub length: u64,
    /// Create/truncate the target (image files); block devices are never truncated.
    pub create_target: bool,
}

#[async_trait]
pub trait BlockCopier: Send + Sync {
    /// Returns the number of bytes copied, which equals `length` on success.
    async fn copy(&self, request: &CopyRequest) -> Result<u64, CopyError>;
}
