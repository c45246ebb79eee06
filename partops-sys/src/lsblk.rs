// SPDX-License-Identifier: GPL-3.0-only

use partops_contracts::{ToolCommand, ToolRunner};
use serde::{Deserialize, Deserializer};

use crate::{Result, SysError};

const LSBLK_COLUMNS: &str = "NAME,PATH,PKNAME,TYPE,FSTYPE,FSVER,LABEL,UUID,START,SIZE,MOUNTPOINT,LOG-SEC";

/// One block device as reported by `lsblk --json --bytes`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BlockDeviceRow {
    pub name: String,
    pub path: String,
    pub pkname: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub fstype: Option<String>,
    pub fsver: Option<String>,
    pub label: Option<String>,
    pub uuid: Option<String>,
    /// First sector for partitions
    #[serde(default, deserialize_with = "lenient_u64")]
    pub start: Option<u64>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub size: Option<u64>,
    pub mountpoint: Option<String>,
    #[serde(rename = "log-sec", default, deserialize_with = "lenient_u64")]
    pub log_sec: Option<u64>,
    #[serde(default)]
    pub children: Vec<BlockDeviceRow>,
}

#[derive(Debug, Deserialize)]
struct LsblkOutput {
    blockdevices: Vec<BlockDeviceRow>,
}

/// Older util-linux releases print numbers as strings even with `--bytes`.
fn lenient_u64<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(u64),
        Text(String),
    }

    Ok(
        match Option::<NumberOrString>::deserialize(deserializer)? {
            Some(NumberOrString::Number(value)) => Some(value),
            Some(NumberOrString::Text(text)) => text.trim().parse().ok(),
            None => None,
        },
    )
}

pub fn parse_lsblk(output: &str) -> Result<Vec<BlockDeviceRow>> {
    let parsed: LsblkOutput =
        serde_json::from_str(output).map_err(|e| SysError::Parse(format!("lsblk: {e}")))?;
    Ok(parsed.blockdevices)
}

/// Run `lsblk` through `runner` and return the top-level devices with their
/// children nested.
pub async fn scan_block_devices(runner: &dyn ToolRunner) -> Result<Vec<BlockDeviceRow>> {
    let command = ToolCommand::new("lsblk").args(["--json", "--bytes", "--output", LSBLK_COLUMNS]);
    let output = runner
        .run(&command)
        .await
        .map_err(|e| SysError::OperationFailed(e.to_string()))?;
    if !output.success() {
        return Err(SysError::OperationFailed(format!(
            "lsblk failed: {}",
            output.diagnostic()
        )));
    }
    parse_lsblk(&output.stdout)
}

impl BlockDeviceRow {
    pub fn is_partition(&self) -> bool {
        self.kind == "part"
    }
}
