// SPDX-License-Identifier: GPL-3.0-only

//! Opening and closing encrypted containers
//!
//! `Closed --open(ok)--> Open --close(ok)--> Closed`. A failed open or a busy
//! close leaves the partition exactly as it was.

use std::fmt;

use partops_contracts::{CloseError, OpenError, ToolCommand, ToolError, ToolRunner};
use partops_sys::parse::{parse_blkid_export, parse_crypt_status_size, parse_luks_dump};
use partops_types::{ByteRange, CryptParams, FileSystemKind};
use tracing::{debug, info, warn};

use crate::device::Partition;
use crate::variant::{FileSystemInfo, FileSystemVariant};

const CRYPTSETUP: &str = "cryptsetup";

/// Exit code cryptsetup uses for a wrong passphrase.
const EXIT_WRONG_PASSPHRASE: i32 = 2;
/// Exit code cryptsetup uses when the device or mapping is in use.
const EXIT_BUSY: i32 = 5;

#[derive(Clone)]
pub struct Credentials {
    passphrase: String,
    pbkdf: Option<String>,
}

impl Credentials {
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self {
            passphrase: passphrase.into(),
            pbkdf: None,
        }
    }

    /// Key-derivation function forwarded as `--pbkdf`.
    pub fn with_pbkdf(mut self, pbkdf: Option<String>) -> Self {
        self.pbkdf = pbkdf.filter(|name| !name.trim().is_empty());
        self
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("passphrase", &"<redacted>")
            .field("pbkdf", &self.pbkdf)
            .finish()
    }
}

fn open_error(error: ToolError) -> OpenError {
    match error {
        ToolError::Missing(tool) => OpenError::ToolMissing(tool),
        other => OpenError::Unexpected(other.to_string()),
    }
}

fn close_error(error: ToolError) -> CloseError {
    match error {
        ToolError::Missing(tool) => CloseError::ToolMissing(tool),
        other => CloseError::Unexpected(other.to_string()),
    }
}

/// Unlock the container on `partition` and scan the filesystem inside it.
///
/// Returns the new inner variant. The partition's crypt-open flag is only set
/// once everything succeeded.
pub async fn open<'a>(
    partition: &'a mut Partition,
    credentials: &Credentials,
    runner: &dyn ToolRunner,
) -> Result<&'a FileSystemVariant, OpenError> {
    let node = partition.node().to_string();
    let container = partition
        .filesystem()
        .as_container()
        .ok_or(OpenError::NotContainer(partition.kind()))?;
    if partition.is_crypt_open() {
        return Err(OpenError::AlreadyOpen);
    }
    if !runner.has_tool(CRYPTSETUP) {
        return Err(OpenError::ToolMissing(CRYPTSETUP.to_string()));
    }

    let mapper_name = container.suggest_mapper_name(&node);
    let mut command = ToolCommand::new(CRYPTSETUP).args(["open", &node, &mapper_name]);
    if let Some(pbkdf) = &credentials.pbkdf {
        command = command.args(["--pbkdf", pbkdf]);
    }
    let command = command.stdin(format!("{}\n", credentials.passphrase));

    info!(node = %node, mapper = %mapper_name, "opening container");
    let output = runner.run(&command).await.map_err(open_error)?;
    match output.exit_code {
        0 => {}
        EXIT_WRONG_PASSPHRASE => return Err(OpenError::WrongCredentials),
        EXIT_BUSY => return Err(OpenError::DeviceBusy(node)),
        _ => return Err(OpenError::Unexpected(output.diagnostic())),
    }

    let mapper_node = format!("/dev/mapper/{mapper_name}");
    let crypt = inspect_header(runner, &node, &mapper_node).await;
    let partition_range = partition.range();
    let inner = scan_inner(runner, &mapper_node, partition_range, &crypt).await;
    info!(
        node = %node,
        mapper = %mapper_name,
        inner = %inner.kind(),
        "container opened"
    );

    let Some(container) = partition.filesystem_mut().as_container_mut() else {
        return Err(OpenError::Unexpected("partition changed while opening".to_string()));
    };
    container.crypt = crypt;
    container.mapper_name = Some(mapper_name);
    container.inner = Some(Box::new(inner));
    partition.set_crypt_open(true);

    partition
        .filesystem()
        .as_container()
        .and_then(|container| container.inner.as_deref())
        .ok_or_else(|| OpenError::Unexpected("inner filesystem missing after open".to_string()))
}

/// `luksDump` for the header fields, `status` for the active payload size.
/// Failures here do not undo the open; the fields just stay unset.
async fn inspect_header(runner: &dyn ToolRunner, node: &str, mapper_node: &str) -> CryptParams {
    let mut crypt = match runner
        .run(&ToolCommand::new(CRYPTSETUP).args(["luksDump", node]))
        .await
    {
        Ok(output) if output.success() => parse_luks_dump(&output.stdout),
        Ok(output) => {
            warn!(node, exit_code = output.exit_code, "luksDump failed: {}", output.diagnostic());
            CryptParams::default()
        }
        Err(error) => {
            warn!(node, %error, "luksDump failed");
            CryptParams::default()
        }
    };

    match runner
        .run(&ToolCommand::new(CRYPTSETUP).args(["status", mapper_node]))
        .await
    {
        Ok(output) if output.success() => {
            crypt.payload_size = parse_crypt_status_size(&output.stdout);
        }
        Ok(output) => debug!(mapper_node, "cryptsetup status failed: {}", output.diagnostic()),
        Err(error) => debug!(mapper_node, %error, "cryptsetup status failed"),
    }

    crypt
}

async fn scan_inner(
    runner: &dyn ToolRunner,
    mapper_node: &str,
    partition_range: ByteRange,
    crypt: &CryptParams,
) -> FileSystemVariant {
    let start = partition_range.start + crypt.payload_offset.unwrap_or(0);
    let end = crypt
        .payload_size
        .map_or(partition_range.end, |size| start + size)
        .min(partition_range.end);

    // `blkid` exits 2 when it finds nothing, which means an empty mapping.
    let values = match runner
        .run(&ToolCommand::new("blkid").args(["-p", "-o", "export", mapper_node]))
        .await
    {
        Ok(output) if output.success() => parse_blkid_export(&output.stdout),
        Ok(_) => Default::default(),
        Err(error) => {
            warn!(mapper_node, %error, "could not identify inner filesystem");
            Default::default()
        }
    };

    let kind = FileSystemKind::from_probe(
        values.get("TYPE").map(String::as_str).unwrap_or(""),
        values.get("VERSION").map(String::as_str),
    );
    let mut info = FileSystemInfo::new(kind, ByteRange::new(start, end));
    info.label = values.get("LABEL").cloned();
    info.uuid = values.get("UUID").cloned();
    FileSystemVariant::from_info(info)
}

/// Deactivate the container mapping and drop the inner variant.
pub async fn close(partition: &mut Partition, runner: &dyn ToolRunner) -> Result<(), CloseError> {
    let Some(container) = partition.filesystem().as_container() else {
        return Err(CloseError::NotOpen);
    };
    if !partition.is_crypt_open() {
        return Err(CloseError::NotOpen);
    }
    let mapper_name = container
        .mapper_name
        .clone()
        .unwrap_or_else(|| container.suggest_mapper_name(partition.node()));
    if partition.is_mounted() {
        return Err(CloseError::Busy(mapper_name));
    }

    info!(node = %partition.node(), mapper = %mapper_name, "closing container");
    let output = runner
        .run(&ToolCommand::new(CRYPTSETUP).args(["close", &mapper_name]))
        .await
        .map_err(close_error)?;
    match output.exit_code {
        0 => {}
        EXIT_BUSY => return Err(CloseError::Busy(mapper_name)),
        _ => return Err(CloseError::Unexpected(output.diagnostic())),
    }

    if let Some(container) = partition.filesystem_mut().as_container_mut() {
        container.inner = None;
        container.mapper_name = None;
    }
    partition.set_crypt_open(false);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRunner;

    const LUKS2_DUMP: &str = "\
Version:       \t2
Data segments:
  0: crypt
\toffset: 16777216 [bytes]
\tcipher: aes-xts-plain64
Keyslots:
  0: luks2
\tKey:        512 bits
Digests:
  0: pbkdf2
\tHash:       sha256
";

    fn locked() -> Partition {
        let mut partition =
            Partition::new("/dev/sda", "/dev/sda2", 2048, 4_196_351, FileSystemKind::Luks2);
        partition.filesystem_mut().info_mut().uuid = Some("ef01".to_string());
        partition
    }

    fn script_successful_open(runner: &ScriptedRunner) {
        runner
            .succeed(CRYPTSETUP, "")
            .succeed(CRYPTSETUP, LUKS2_DUMP)
            .succeed(CRYPTSETUP, "  type:    LUKS2\n  size:    4161536 sectors\n")
            .succeed("blkid", "TYPE=ext4\nLABEL=home\nUUID=9999\n");
    }

    #[tokio::test]
    async fn open_scans_inner_filesystem() {
        let runner = ScriptedRunner::new();
        script_successful_open(&runner);
        let mut partition = locked();

        let inner = open(&mut partition, &Credentials::new("secret"), &runner)
            .await
            .unwrap();
        assert_eq!(inner.kind(), FileSystemKind::Ext4);
        assert_eq!(inner.info().label.as_deref(), Some("home"));
        assert_eq!(inner.info().range.start, 2048 * 512 + 16_777_216);
        assert_eq!(inner.info().length(), 4_161_536 * 512);

        assert!(partition.is_crypt_open());
        let container = partition.filesystem().as_container().unwrap();
        assert_eq!(container.mapper_name.as_deref(), Some("luks-ef01"));
        assert_eq!(container.crypt.cipher_name.as_deref(), Some("aes"));
        assert_eq!(container.crypt.key_size, Some(512));

        let calls = runner.take_calls();
        assert_eq!(calls[0].render(), "cryptsetup open /dev/sda2 luks-ef01");
        assert_eq!(calls[0].stdin.as_deref(), Some("secret\n"));
        assert_eq!(calls[3].render(), "blkid -p -o export /dev/mapper/luks-ef01");
    }

    #[tokio::test]
    async fn pbkdf_is_forwarded() {
        let runner = ScriptedRunner::new();
        script_successful_open(&runner);
        let mut partition = locked();
        let credentials = Credentials::new("secret").with_pbkdf(Some("argon2id".to_string()));

        open(&mut partition, &credentials, &runner).await.unwrap();
        assert_eq!(
            runner.take_calls()[0].render(),
            "cryptsetup open /dev/sda2 luks-ef01 --pbkdf argon2id"
        );
    }

    #[tokio::test]
    async fn failed_open_leaves_state_unchanged() {
        let runner = ScriptedRunner::new();
        runner.fail(CRYPTSETUP, EXIT_WRONG_PASSPHRASE, "No key available with this passphrase.");
        let mut partition = locked();
        let before = partition.clone();

        let error = open(&mut partition, &Credentials::new("wrong"), &runner)
            .await
            .unwrap_err();
        assert_eq!(error, OpenError::WrongCredentials);
        assert_eq!(partition, before);
        assert_eq!(runner.take_calls().len(), 1);
    }

    #[tokio::test]
    async fn busy_and_missing_tool_are_reported() {
        let runner = ScriptedRunner::new();
        runner.fail(CRYPTSETUP, EXIT_BUSY, "Device already exists.");
        let mut partition = locked();
        assert_eq!(
            open(&mut partition, &Credentials::new("x"), &runner).await.unwrap_err(),
            OpenError::DeviceBusy("/dev/sda2".to_string())
        );

        let runner = ScriptedRunner::new();
        runner.mark_missing(CRYPTSETUP);
        assert_eq!(
            open(&mut partition, &Credentials::new("x"), &runner).await.unwrap_err(),
            OpenError::ToolMissing(CRYPTSETUP.to_string())
        );
        assert!(!partition.is_crypt_open());
    }

    #[tokio::test]
    async fn plain_filesystem_is_not_a_container() {
        let runner = ScriptedRunner::new();
        let mut partition = Partition::new("/dev/sda", "/dev/sda1", 0, 99, FileSystemKind::Ext4);
        assert_eq!(
            open(&mut partition, &Credentials::new("x"), &runner).await.unwrap_err(),
            OpenError::NotContainer(FileSystemKind::Ext4)
        );
        assert!(runner.take_calls().is_empty());
    }

    #[tokio::test]
    async fn close_refuses_while_inner_is_mounted() {
        let runner = ScriptedRunner::new();
        script_successful_open(&runner);
        let mut partition = locked();
        open(&mut partition, &Credentials::new("secret"), &runner)
            .await
            .unwrap();
        runner.take_calls();

        partition.set_mounted(Some("/home".to_string()));
        assert_eq!(
            close(&mut partition, &runner).await.unwrap_err(),
            CloseError::Busy("luks-ef01".to_string())
        );
        assert!(partition.is_crypt_open());
        assert!(runner.take_calls().is_empty());

        partition.set_mounted(None);
        let runner = ScriptedRunner::new();
        close(&mut partition, &runner).await.unwrap();
        assert!(!partition.is_crypt_open());
        assert!(partition.filesystem().as_container().unwrap().inner.is_none());
        assert_eq!(runner.rendered(), vec!["cryptsetup close luks-ef01".to_string()]);
    }

    #[tokio::test]
    async fn close_maps_busy_exit_code() {
        let runner = ScriptedRunner::new();
        script_successful_open(&runner);
        let mut partition = locked();
        open(&mut partition, &Credentials::new("secret"), &runner)
            .await
            .unwrap();

        let runner = ScriptedRunner::new();
        runner.fail(CRYPTSETUP, EXIT_BUSY, "Device luks-ef01 is still in use.");
        assert!(matches!(
            close(&mut partition, &runner).await,
            Err(CloseError::Busy(_))
        ));
        assert!(partition.is_crypt_open());
    }

    #[tokio::test]
    async fn close_of_closed_container_is_not_open() {
        let runner = ScriptedRunner::new();
        let mut partition = locked();
        assert_eq!(close(&mut partition, &runner).await.unwrap_err(), CloseError::NotOpen);
    }
}
