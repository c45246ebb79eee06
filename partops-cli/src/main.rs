// SPDX-License-Identifier: GPL-3.0-only

//! `partops`: check, resize, relabel, copy and back up partition filesystems.

mod commands;
mod config;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::commands::Session;
use crate::config::{Config, LoggingLevel};

#[derive(Debug, Parser)]
#[command(name = "partops", version)]
#[command(about = "Check, resize, relabel, copy and back up partition filesystems")]
struct Cli {
    /// Configuration file (default: $XDG_CONFIG_HOME/partops/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true, value_enum)]
    log_level: Option<LoggingLevel>,
    /// Print the jobs of an operation instead of running them
    #[arg(long, global = true)]
    dry_run: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the external tools and whether they were found
    Tools,
    /// Show a partition and what can be done with it
    Inspect { node: String },
    /// Check and repair a filesystem, then grow it to fill its partition
    Check { node: String },
    /// Resize a filesystem to a new length
    Resize {
        node: String,
        /// New length in bytes, or a size such as "20 GB"
        #[arg(long, value_parser = commands::parse_size)]
        bytes: u64,
    },
    /// Set a filesystem label
    Label { node: String, label: String },
    /// Copy a filesystem onto another partition
    Copy { source: String, target: String },
    /// Write a raw image of a filesystem to a file
    Backup { node: String, file: PathBuf },
    /// Unlock an encrypted container
    Open {
        node: String,
        /// Read from stdin when unset
        #[arg(long, env = "PARTOPS_PASSPHRASE", hide_env_values = true)]
        passphrase: Option<String>,
    },
    /// Lock an encrypted container
    Close { node: String },
}

impl Command {
    fn touches_devices(&self) -> bool {
        !matches!(self, Self::Tools)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    logging::init(config.log_level, config.log_to_disk);

    tracing::debug!("Starting partops v{}", env!("CARGO_PKG_VERSION"));

    if cli.command.touches_devices() && unsafe { libc::geteuid() } != 0 {
        tracing::warn!("not running as root; device access will likely be denied");
    }

    let session = Session::new(&config, cli.dry_run);

    match cli.command {
        Command::Tools => {
            commands::tools(&session);
            Ok(())
        }
        Command::Inspect { node } => commands::inspect(&session, &node).await,
        Command::Check { node } => commands::check(&session, &node).await,
        Command::Resize { node, bytes } => commands::resize(&session, &node, bytes).await,
        Command::Label { node, label } => commands::label(&session, &node, &label).await,
        Command::Copy { source, target } => commands::copy(&session, &source, &target).await,
        Command::Backup { node, file } => commands::backup(&session, &node, &file).await,
        Command::Open { node, passphrase } => commands::open(&session, &node, passphrase).await,
        Command::Close { node } => commands::close(&session, &node).await,
    }
}
