// SPDX-License-Identifier: GPL-3.0-only

use std::path::Path;

use crate::error::Result;

const PROC_MOUNTS: &str = "/proc/mounts";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub source: String,
    pub target: String,
    pub fs_type: String,
}

/// Unescape octal sequences in /proc/mounts paths (e.g. `\040` -> ` `)
fn unescape_mount_path(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            let mut octal = String::with_capacity(3);
            for _ in 0..3 {
                if let Some(&next) = chars.as_str().as_bytes().first() {
                    if (b'0'..=b'7').contains(&next) {
                        octal.push(next as char);
                        chars.next();
                    } else {
                        break;
                    }
                }
            }
            if octal.len() == 3 {
                if let Ok(byte) = u8::from_str_radix(&octal, 8) {
                    result.push(byte as char);
                } else {
                    result.push('\\');
                    result.push_str(&octal);
                }
            } else {
                result.push('\\');
                result.push_str(&octal);
            }
        } else {
            result.push(c);
        }
    }
    result
}

pub fn parse_mounts(content: &str) -> Vec<MountEntry> {
    content
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let source = fields.next()?;
            let target = fields.next()?;
            let fs_type = fields.next()?;
            Some(MountEntry {
                source: unescape_mount_path(source),
                target: unescape_mount_path(target),
                fs_type: fs_type.to_string(),
            })
        })
        .collect()
}

pub async fn read_mounts() -> Result<Vec<MountEntry>> {
    let content = tokio::fs::read_to_string(PROC_MOUNTS).await?;
    Ok(parse_mounts(&content))
}

/// First mount point of `device_node` in `entries`, resolving symlinks such
/// as `/dev/mapper/*` and `/dev/disk/by-uuid/*` on both sides.
pub fn mount_point_in(entries: &[MountEntry], device_node: &str) -> Option<String> {
    let wanted = canonical(device_node);
    entries
        .iter()
        .find(|entry| entry.source == device_node || canonical(&entry.source) == wanted)
        .map(|entry| entry.target.clone())
}

fn canonical(node: &str) -> String {
    Path::new(node)
        .canonicalize()
        .map(|path| path.to_string_lossy().to_string())
        .unwrap_or_else(|_| node.to_string())
}
