// SPDX-License-Identifier: GPL-3.0-only

//! Parsers for the text output of the utilities the engine drives.
//!
//! All of them are pure so they can be fed captured output in tests.

use std::collections::BTreeMap;

use partops_types::{CryptParams, LuksVersion};

use crate::{Result, SysError};

const SECTOR: u64 = 512;

fn field<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let (name, value) = line.split_once(':')?;
    if name.trim().eq_ignore_ascii_case(key) {
        Some(value.trim())
    } else {
        None
    }
}

fn leading_number(value: &str) -> Option<u64> {
    value.split_whitespace().next()?.parse().ok()
}

/// Parse `cryptsetup luksDump` output (LUKS1 and LUKS2 layouts).
pub fn parse_luks_dump(output: &str) -> CryptParams {
    let mut params = CryptParams::default();

    for line in output.lines() {
        let line = line.trim();
        if let Some(value) = field(line, "Version") {
            params.version = LuksVersion::parse(value);
        } else if let Some(value) = field(line, "Cipher name") {
            params.cipher_name = Some(value.to_string());
        } else if let Some(value) = field(line, "Cipher mode") {
            params.cipher_mode = Some(value.to_string());
        } else if let Some(value) = field(line, "Hash spec") {
            params.hash_name = Some(value.to_string());
        } else if let Some(value) = field(line, "MK bits") {
            params.key_size = leading_number(value);
        } else if let Some(value) = field(line, "Payload offset") {
            // LUKS1 reports sectors.
            params.payload_offset = leading_number(value).map(|sectors| sectors * SECTOR);
        } else if let Some(value) = field(line, "cipher") {
            // LUKS2 data segment: "aes-xts-plain64"
            if params.cipher_name.is_none() {
                match value.split_once('-') {
                    Some((name, mode)) => {
                        params.cipher_name = Some(name.to_string());
                        params.cipher_mode = Some(mode.to_string());
                    }
                    None => params.cipher_name = Some(value.to_string()),
                }
            }
        } else if let Some(value) = field(line, "offset") {
            if params.payload_offset.is_none() && value.contains("[bytes]") {
                params.payload_offset = leading_number(value);
            }
        } else if let Some(value) = field(line, "Key") {
            if params.key_size.is_none() {
                params.key_size = leading_number(value);
            }
        } else if let Some(value) = field(line, "Hash")
            && params.hash_name.is_none()
        {
            params.hash_name = Some(value.to_string());
        }
    }

    params
}

/// Payload size in bytes from `cryptsetup status <mapper>`.
pub fn parse_crypt_status_size(output: &str) -> Option<u64> {
    output
        .lines()
        .find_map(|line| field(line.trim(), "size"))
        .and_then(leading_number)
        .map(|sectors| sectors * SECTOR)
}

/// Parse `blkid -o export` KEY=VALUE lines.
pub fn parse_blkid_export(output: &str) -> BTreeMap<String, String> {
    output
        .lines()
        .filter_map(|line| {
            let (key, value) = line.trim().split_once('=')?;
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

/// Used bytes from `dumpe2fs -h`.
pub fn parse_dumpe2fs_used(output: &str) -> Result<u64> {
    let mut block_count = None;
    let mut free_blocks = None;
    let mut block_size = None;

    for line in output.lines() {
        let line = line.trim();
        if let Some(value) = field(line, "Block count") {
            block_count = leading_number(value);
        } else if let Some(value) = field(line, "Free blocks") {
            free_blocks = leading_number(value);
        } else if let Some(value) = field(line, "Block size") {
            block_size = leading_number(value);
        }
    }

    match (block_count, free_blocks, block_size) {
        (Some(count), Some(free), Some(size)) => Ok(count.saturating_sub(free) * size),
        _ => Err(SysError::Parse(
            "dumpe2fs output lacks block count, free blocks or block size".to_string(),
        )),
    }
}

/// Used bytes from `btrfs filesystem show --raw`.
pub fn parse_btrfs_used(output: &str) -> Result<u64> {
    output
        .lines()
        .find_map(|line| {
            let (_, rest) = line.split_once("FS bytes used")?;
            leading_number(rest)
        })
        .ok_or_else(|| SysError::Parse("btrfs output lacks 'FS bytes used'".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const LUKS1_DUMP: &str = "\
LUKS header information for /dev/sdb1

Version:       \t1
Cipher name:   \taes
Cipher mode:   \txts-plain64
Hash spec:     \tsha256
Payload offset:\t4096
MK bits:       \t512
UUID:          \t0b4f1c7e-5d0c-4a55-9c1b-1f2e3d4c5b6a
";

    const LUKS2_DUMP: &str = "\
LUKS header information
Version:       \t2
Epoch:         \t3
UUID:          \t7d1e...

Data segments:
  0: crypt
\toffset: 16777216 [bytes]
\tlength: (whole device)
\tcipher: aes-xts-plain64
\tsector: 512 [bytes]

Keyslots:
  0: luks2
\tKey:        512 bits
\tPriority:   normal
\tCipher:     aes-xts-plain64
\tPBKDF:      argon2id
Digests:
  0: pbkdf2
\tHash:       sha256
";

    #[test]
    fn parses_luks1_header() {
        let params = parse_luks_dump(LUKS1_DUMP);
        assert_eq!(params.version, Some(LuksVersion::Luks1));
        assert_eq!(params.cipher_name.as_deref(), Some("aes"));
        assert_eq!(params.cipher_mode.as_deref(), Some("xts-plain64"));
        assert_eq!(params.hash_name.as_deref(), Some("sha256"));
        assert_eq!(params.key_size, Some(512));
        assert_eq!(params.payload_offset, Some(4096 * 512));
        assert!(params.is_populated());
    }

    #[test]
    fn parses_luks2_segments_and_keyslots() {
        let params = parse_luks_dump(LUKS2_DUMP);
        assert_eq!(params.version, Some(LuksVersion::Luks2));
        assert_eq!(params.cipher_name.as_deref(), Some("aes"));
        assert_eq!(params.cipher_mode.as_deref(), Some("xts-plain64"));
        assert_eq!(params.key_size, Some(512));
        assert_eq!(params.hash_name.as_deref(), Some("sha256"));
        assert_eq!(params.payload_offset, Some(16_777_216));
    }

    #[test]
    fn parses_status_and_blkid() {
        let status = "/dev/mapper/luks-x is active.\n  type:    LUKS2\n  offset:  32768 sectors\n  size:    2064384 sectors\n";
        assert_eq!(parse_crypt_status_size(status), Some(2_064_384 * 512));

        let blkid = parse_blkid_export("DEVNAME=/dev/mapper/luks-x\nTYPE=ext4\nLABEL=home\n");
        assert_eq!(blkid.get("TYPE").map(String::as_str), Some("ext4"));
        assert_eq!(blkid.get("LABEL").map(String::as_str), Some("home"));
    }

    #[test]
    fn parses_usage_outputs() {
        let dumpe2fs = "Block count:              262144\nFree blocks:              249189\nBlock size:               4096\n";
        assert_eq!(parse_dumpe2fs_used(dumpe2fs).unwrap(), (262_144 - 249_189) * 4096);
        assert!(parse_dumpe2fs_used("Block size: 4096").is_err());

        let btrfs = "Label: 'data'  uuid: 1\n\tTotal devices 1 FS bytes used 196608\n";
        assert_eq!(parse_btrfs_used(btrfs).unwrap(), 196_608);
    }
}
