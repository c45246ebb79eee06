// SPDX-License-Identifier: GPL-3.0-only

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, SystemTime};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingLevel;

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

const LOG_PREFIX: &str = "partops.log";
const KEEP_DAYS: u64 = 7;

/// `RUST_LOG` wins over `level`. Progress goes to stdout, so logs use stderr.
pub(crate) fn init(level: LoggingLevel, log_to_disk: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_directive()));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_timer(tracing_subscriber::fmt::time::SystemTime);

    if !log_to_disk {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
        return;
    }

    match file_writer() {
        Ok((writer, guard)) => {
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(false)
                .with_timer(tracing_subscriber::fmt::time::SystemTime);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .with(file_layer)
                .init();

            // Keep the background logging worker alive for the duration of the process.
            let _ = LOG_GUARD.set(guard);
        }
        Err(e) => {
            eprintln!("partops: failed to initialize file logging: {e:#}");
            tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .init();
        }
    }
}

fn file_writer() -> anyhow::Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    let dir = log_dir(
        std::env::var_os("PARTOPS_LOG_DIR"),
        std::env::var_os("XDG_STATE_HOME"),
        std::env::var_os("HOME"),
    );
    let prefix = OsString::from(LOG_PREFIX);

    if let Err(e) = fs::create_dir_all(&dir) {
        return Err(anyhow::anyhow!(
            "create log directory failed: {} ({})",
            dir.display(),
            e
        ));
    }

    cleanup_old_logs(&dir, &prefix, KEEP_DAYS);

    let appender = tracing_appender::rolling::daily(&dir, &prefix);
    Ok(tracing_appender::non_blocking(appender))
}

fn log_dir(
    override_dir: Option<OsString>,
    xdg_state: Option<OsString>,
    home: Option<OsString>,
) -> PathBuf {
    if let Some(dir) = override_dir {
        return PathBuf::from(dir);
    }
    if let Some(xdg_state) = xdg_state {
        return PathBuf::from(xdg_state).join("partops").join("logs");
    }
    if let Some(home) = home {
        return PathBuf::from(home)
            .join(".local")
            .join("state")
            .join("partops")
            .join("logs");
    }
    PathBuf::from("/tmp").join("partops").join("logs")
}

fn cleanup_old_logs(dir: &Path, prefix: &OsString, keep_days: u64) {
    let cutoff = SystemTime::now().checked_sub(Duration::from_secs(keep_days * 24 * 60 * 60));
    let Some(cutoff) = cutoff else { return };

    let prefix = prefix.to_string_lossy();

    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };

    for entry in entries.flatten() {
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if !file_type.is_file() {
            continue;
        }

        // Only touch files created by our rolling appender.
        if !entry.file_name().to_string_lossy().starts_with(prefix.as_ref()) {
            continue;
        }

        let Ok(modified) = entry.metadata().and_then(|metadata| metadata.modified()) else {
            continue;
        };
        if modified >= cutoff {
            continue;
        }

        let _ = fs::remove_file(entry.path());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_dir_prefers_override_then_state_home() {
        assert_eq!(
            log_dir(Some("/var/log/partops".into()), Some("/state".into()), None),
            PathBuf::from("/var/log/partops")
        );
        assert_eq!(
            log_dir(None, Some("/state".into()), Some("/home/u".into())),
            PathBuf::from("/state/partops/logs")
        );
        assert_eq!(
            log_dir(None, None, Some("/home/u".into())),
            PathBuf::from("/home/u/.local/state/partops/logs")
        );
    }

    #[test]
    fn cleanup_only_removes_our_files() {
        let dir = tempfile::tempdir().unwrap();
        let ours = dir.path().join("partops.log.2026-01-01");
        let foreign = dir.path().join("other.log");
        fs::write(&ours, "old").unwrap();
        fs::write(&foreign, "keep").unwrap();

        // A zero-day window expires every file written before the call.
        std::thread::sleep(Duration::from_millis(20));
        cleanup_old_logs(dir.path(), &OsString::from(LOG_PREFIX), 0);

        assert!(!ours.exists());
        assert!(foreign.exists());
    }
}
