// SPDX-License-Identifier: GPL-3.0-only

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

const CONFIG_DIR: &str = "partops";
const CONFIG_FILE: &str = "config.toml";

#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum LoggingLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LoggingLevel {
    pub fn as_directive(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct Config {
    pub log_level: LoggingLevel,
    pub log_to_disk: bool,
    pub max_parallel_devices: usize,
    /// Tools treated as missing even when installed
    pub disabled_tools: Vec<String>,
    /// Key derivation passed to `cryptsetup open --pbkdf`
    pub pbkdf: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: LoggingLevel::default(),
            log_to_disk: false,
            max_parallel_devices: 4,
            disabled_tools: Vec::new(),
            pbkdf: None,
        }
    }
}

impl Config {
    pub fn from_toml(raw: &str) -> anyhow::Result<Self> {
        let mut config: Config = toml::from_str(raw)?;
        config.max_parallel_devices = config.max_parallel_devices.max(1);
        Ok(config)
    }

    /// Read `path`; a file that does not exist yields the defaults.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", path.display()));
            }
        };
        Self::from_toml(&raw).with_context(|| format!("invalid config {}", path.display()))
    }

    /// Load from `explicit`, or from the first default location.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        match explicit {
            Some(path) => Self::load_from(path),
            None => match default_config_path() {
                Some(path) => Self::load_from(&path),
                None => Ok(Self::default()),
            },
        }
    }
}

fn default_config_path() -> Option<PathBuf> {
    config_path_from(
        std::env::var_os("PARTOPS_CONFIG"),
        std::env::var_os("XDG_CONFIG_HOME"),
        std::env::var_os("HOME"),
    )
}

fn config_path_from(
    explicit: Option<OsString>,
    xdg_config: Option<OsString>,
    home: Option<OsString>,
) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(PathBuf::from(path));
    }
    if let Some(dir) = xdg_config {
        return Some(PathBuf::from(dir).join(CONFIG_DIR).join(CONFIG_FILE));
    }
    home.map(|home| {
        PathBuf::from(home)
            .join(".config")
            .join(CONFIG_DIR)
            .join(CONFIG_FILE)
    })
}
