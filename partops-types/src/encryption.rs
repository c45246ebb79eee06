//! Encryption types (LUKS)

use serde::{Deserialize, Serialize};

/// LUKS version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LuksVersion {
    /// LUKS version 1
    Luks1,

    /// LUKS version 2
    Luks2,
}

impl LuksVersion {
    /// Convert to cryptsetup `--type` string format
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Luks1 => "luks1",
            Self::Luks2 => "luks2",
        }
    }

    /// Parse from a luksDump "Version:" value or a type string
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "luks1" | "1" => Some(Self::Luks1),
            "luks2" | "2" => Some(Self::Luks2),
            _ => None,
        }
    }
}

/// Cryptographic parameters of an opened container.
///
/// Only populated after a successful open/inspect; every field stays unset
/// until the header has actually been read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptParams {
    pub version: Option<LuksVersion>,

    /// Cipher algorithm (e.g. "aes")
    pub cipher_name: Option<String>,

    /// Cipher mode (e.g. "xts-plain64")
    pub cipher_mode: Option<String>,

    /// Hash spec (e.g. "sha256")
    pub hash_name: Option<String>,

    /// Key size in bits
    pub key_size: Option<u64>,

    /// Payload offset in bytes from the start of the container
    pub payload_offset: Option<u64>,

    /// Payload size in bytes, as reported by the active mapping
    pub payload_size: Option<u64>,
}

impl CryptParams {
    pub fn is_populated(&self) -> bool {
        self.cipher_name.is_some() && self.payload_offset.is_some()
    }
}
