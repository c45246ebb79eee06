// SPDX-License-Identifier: GPL-3.0-only

use std::io::{BufRead, IsTerminal, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, anyhow, bail};
use partops_contracts::{OperationEvent, OperationKind};
use partops_engine::operations::{
    can_backup, can_check, can_copy, can_grow, can_paste, can_relabel, can_shrink,
};
use partops_engine::{
    CapabilityMatrix, Credentials, JobContext, Operation, OperationResult, OperationStatus,
    Partition, Scheduler, SchedulerConfig, capability, container, probe, scan,
};
use partops_sys::{FileBlockCopier, SystemToolRunner, describe_tools, probe_tools};
use partops_types::{
    Action, CryptParams, FsToolInfo, SupportLevel, bytes_to_pretty, pretty_to_bytes,
};
use tokio::sync::mpsc::unbounded_channel;
use tracing::{debug, warn};

use crate::config::Config;

/// Collaborators shared by every subcommand of one invocation.
pub(crate) struct Session {
    ctx: JobContext,
    scheduler: SchedulerConfig,
    pbkdf: Option<String>,
}

impl Session {
    /// Probes `PATH` once; disabled tools stay missing for the whole process.
    pub(crate) fn new(config: &Config, dry_run: bool) -> Self {
        let tools = probe_tools(capability::all_tools(), &config.disabled_tools);
        let ctx = JobContext {
            runner: Arc::new(SystemToolRunner::with_disabled(
                config.disabled_tools.iter().cloned(),
            )),
            copier: Arc::new(FileBlockCopier),
            matrix: Arc::new(CapabilityMatrix::new(tools)),
        };
        Self {
            ctx,
            scheduler: SchedulerConfig {
                max_parallel_devices: config.max_parallel_devices,
                dry_run,
            },
            pbkdf: config.pbkdf.clone(),
        }
    }

    fn matrix(&self) -> &CapabilityMatrix {
        &self.ctx.matrix
    }
}

/// `--bytes` accepts a plain byte count or a size such as "20 GB".
pub(crate) fn parse_size(value: &str) -> Result<u64, String> {
    pretty_to_bytes(value).map_err(|e| format!("invalid size '{value}': {e}"))
}

async fn locate(session: &Session, node: &str) -> anyhow::Result<Partition> {
    let devices = scan::scan(session.ctx.runner.as_ref())
        .await
        .context("scanning block devices")?;
    scan::find_partition(&devices, node).ok_or_else(|| anyhow!("{node} is not a known partition"))
}

fn level_label(level: SupportLevel) -> &'static str {
    match level {
        SupportLevel::Unsupported => "-",
        SupportLevel::Core => "built-in",
        SupportLevel::ExternalTool => "external tool",
    }
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

fn kind_label(kind: OperationKind) -> &'static str {
    match kind {
        OperationKind::Check => "check",
        OperationKind::Resize => "resize",
        OperationKind::SetLabel => "set label",
        OperationKind::Copy => "copy",
        OperationKind::Backup => "backup",
    }
}

fn tool_lines(report: &[FsToolInfo]) -> Vec<String> {
    report
        .iter()
        .map(|tool| {
            if tool.available {
                format!("{:<14} found", tool.command)
            } else {
                format!("{:<14} missing (install {})", tool.command, tool.package_hint)
            }
        })
        .collect()
}

/// Tool that carries out `action`, looking through an open container for
/// inner-filesystem actions.
fn tool_for(partition: &Partition, action: Action, matrix: &CapabilityMatrix) -> Option<&'static str> {
    let inner = partition
        .filesystem()
        .as_container()
        .and_then(|container| container.inner.as_deref())
        .filter(|_| action.needs_inner_filesystem());
    let kind = inner.map_or(partition.kind(), |inner| inner.kind());
    matrix.tool_for(kind, action)
}

fn capability_lines(partition: &Partition, matrix: &CapabilityMatrix) -> Vec<String> {
    Action::ALL
        .iter()
        .map(|&action| {
            let level = partition.capability(action, matrix);
            match level {
                SupportLevel::ExternalTool => match tool_for(partition, action, matrix) {
                    Some(tool) => format!("  {:<14} {} ({tool})", action, level_label(level)),
                    None => format!("  {:<14} {}", action, level_label(level)),
                },
                _ => format!("  {:<14} {}", action, level_label(level)),
            }
        })
        .collect()
}

/// "luks2 aes-xts-plain64 sha256 512-bit", from whatever the header revealed.
fn crypt_line(crypt: &CryptParams) -> Option<String> {
    let cipher = match (&crypt.cipher_name, &crypt.cipher_mode) {
        (Some(name), Some(mode)) => Some(format!("{name}-{mode}")),
        (Some(name), None) => Some(name.clone()),
        _ => None,
    };
    let parts: Vec<String> = [
        crypt.version.map(|version| version.as_str().to_string()),
        cipher,
        crypt.hash_name.clone(),
        crypt.key_size.map(|bits| format!("{bits}-bit")),
    ]
    .into_iter()
    .flatten()
    .collect();
    (!parts.is_empty()).then(|| parts.join(" "))
}

fn format_event(event: &OperationEvent) -> String {
    match event {
        OperationEvent::Started {
            operation,
            job_total,
            ..
        } => format!("{} started, {job_total} job(s)", kind_label(*operation)),
        OperationEvent::JobFinished(progress) => format!(
            "  [{}/{}] {} {}",
            progress.job_index + 1,
            progress.job_total,
            if progress.succeeded { "ok" } else { "FAILED" },
            progress.message
        ),
        OperationEvent::Completed { operation, .. } => {
            format!("{} completed", kind_label(*operation))
        }
        OperationEvent::Failed {
            operation,
            job_index,
            error,
            ..
        } => format!(
            "{} failed at job {}: {error}",
            kind_label(*operation),
            job_index + 1
        ),
        OperationEvent::Cancelled {
            operation,
            completed_jobs,
            ..
        } => format!(
            "{} cancelled after {completed_jobs} job(s)",
            kind_label(*operation)
        ),
    }
}

fn outcome(result: &OperationResult) -> anyhow::Result<()> {
    match (result.status, &result.failed_at) {
        (OperationStatus::Completed, _) => Ok(()),
        (OperationStatus::Failed, Some(failed)) => Err(anyhow!(
            "{}: '{}' failed: {}",
            result.description,
            failed.description,
            failed.error
        )),
        (OperationStatus::Failed, None) => Err(anyhow!("{} failed", result.description)),
        (OperationStatus::Cancelled, _) => Err(anyhow!(
            "{} cancelled, {} job(s) not run",
            result.description,
            result.skipped_jobs()
        )),
    }
}

/// Queue `operation`, run it and print its progress. Ctrl-C stops it
/// between jobs.
async fn execute(session: &Session, operation: Operation) -> anyhow::Result<()> {
    let (tx, mut rx) = unbounded_channel::<OperationEvent>();
    let mut scheduler =
        Scheduler::new(session.ctx.clone(), session.scheduler).with_observer(Arc::new(tx));

    let cancel = scheduler.cancellation_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, stopping after the current job");
            cancel.cancel();
        }
    });

    println!("{}", operation.description());
    scheduler.submit(operation)?;

    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            println!("{}", format_event(&event));
        }
    });

    let results = scheduler.run_all().await;
    // Dropping the scheduler drops the last sender and ends the printer.
    drop(scheduler);
    interrupt.abort();
    if let Err(e) = printer.await {
        debug!("progress printer stopped: {e}");
    }

    results.iter().try_for_each(outcome)
}

pub(crate) fn tools(session: &Session) {
    let report = describe_tools(capability::requirements(), session.matrix().tools());
    for line in tool_lines(&report) {
        println!("{line}");
    }
}

pub(crate) async fn inspect(session: &Session, node: &str) -> anyhow::Result<()> {
    let partition = locate(session, node).await?;
    let matrix = session.matrix();
    let info = partition.filesystem().info();

    println!("{}", partition.summary());
    println!("  label:   {}", info.label.as_deref().unwrap_or("-"));
    println!("  uuid:    {}", info.uuid.as_deref().unwrap_or("-"));
    println!("  mounted: {}", partition.mount_point().unwrap_or("no"));
    if let Some(container) = partition.filesystem().as_container() {
        match (&container.inner, container.mapper_node()) {
            (Some(inner), Some(mapper)) => {
                println!("  opened:  {mapper} ({})", inner.kind());
            }
            _ => println!("  opened:  no"),
        }
        if let Some(line) = crypt_line(&container.crypt) {
            println!("  crypt:   {line}");
        }
    }
    match probe::read_used_capacity(&partition, session.ctx.runner.as_ref(), matrix).await {
        Ok(used) => println!("  used:    {}", bytes_to_pretty(&used, true)),
        Err(e) => debug!(node, "used capacity unavailable: {e}"),
    }

    let part = Some(&partition);
    println!(
        "  check: {}  grow: {}  shrink: {}  relabel: {}  copy: {}  backup: {}",
        yes_no(can_check(part, matrix)),
        yes_no(can_grow(part, matrix)),
        yes_no(can_shrink(part, matrix)),
        yes_no(can_relabel(part, matrix)),
        yes_no(can_copy(part, matrix)),
        yes_no(can_backup(part, matrix)),
    );
    println!("capabilities:");
    for line in capability_lines(&partition, matrix) {
        println!("{line}");
    }
    Ok(())
}

pub(crate) async fn check(session: &Session, node: &str) -> anyhow::Result<()> {
    let partition = locate(session, node).await?;
    if !can_check(Some(&partition), session.matrix()) {
        bail!("cannot check {}", partition.summary());
    }
    let handle = partition.into_handle();
    execute(session, Operation::check(&handle).await).await
}

pub(crate) async fn resize(session: &Session, node: &str, length: u64) -> anyhow::Result<()> {
    let partition = locate(session, node).await?;
    let current = partition.filesystem().info().length();
    let allowed = if length >= current {
        can_grow(Some(&partition), session.matrix())
    } else {
        can_shrink(Some(&partition), session.matrix())
    };
    if !allowed {
        bail!(
            "cannot resize {} to {}",
            partition.summary(),
            bytes_to_pretty(&length, false)
        );
    }
    let handle = partition.into_handle();
    execute(session, Operation::resize(&handle, length).await).await
}

pub(crate) async fn label(session: &Session, node: &str, label: &str) -> anyhow::Result<()> {
    let partition = locate(session, node).await?;
    if !can_relabel(Some(&partition), session.matrix()) {
        bail!("cannot set the label of {}", partition.summary());
    }
    let handle = partition.into_handle();
    execute(session, Operation::set_label(&handle, label).await).await
}

pub(crate) async fn copy(session: &Session, source: &str, target: &str) -> anyhow::Result<()> {
    if source == target {
        bail!("source and target are both {source}");
    }
    let source = locate(session, source).await?;
    let target = locate(session, target).await?;
    if !can_paste(Some(&target), Some(&source), session.matrix()) {
        bail!(
            "cannot copy {} onto {}",
            source.summary(),
            target.summary()
        );
    }
    let source = source.into_handle();
    let target = target.into_handle();
    execute(session, Operation::copy(&source, &target).await).await
}

pub(crate) async fn backup(session: &Session, node: &str, file: &Path) -> anyhow::Result<()> {
    let partition = locate(session, node).await?;
    if !can_backup(Some(&partition), session.matrix()) {
        bail!("cannot back up {}", partition.summary());
    }
    let path = file
        .to_str()
        .ok_or_else(|| anyhow!("backup path {} is not valid UTF-8", file.display()))?;
    let handle = partition.into_handle();
    execute(session, Operation::backup(&handle, path).await).await
}

fn read_passphrase() -> anyhow::Result<String> {
    let stdin = std::io::stdin();
    if stdin.is_terminal() {
        eprint!("Passphrase: ");
        std::io::stderr().flush()?;
    }
    let mut line = String::new();
    stdin.lock().read_line(&mut line)?;
    let passphrase = line.trim_end_matches(['\n', '\r']).to_string();
    if passphrase.is_empty() {
        bail!("no passphrase given");
    }
    Ok(passphrase)
}

pub(crate) async fn open(
    session: &Session,
    node: &str,
    passphrase: Option<String>,
) -> anyhow::Result<()> {
    let mut partition = locate(session, node).await?;
    let passphrase = match passphrase {
        Some(passphrase) => passphrase,
        None => read_passphrase()?,
    };
    let credentials = Credentials::new(passphrase).with_pbkdf(session.pbkdf.clone());

    let inner = container::open(&mut partition, &credentials, session.ctx.runner.as_ref())
        .await?
        .kind();
    let mapper = partition
        .filesystem()
        .as_container()
        .and_then(|container| container.mapper_node())
        .unwrap_or_default();
    println!("opened {node} as {mapper} ({inner})");
    Ok(())
}

pub(crate) async fn close(session: &Session, node: &str) -> anyhow::Result<()> {
    let mut partition = locate(session, node).await?;
    container::close(&mut partition, session.ctx.runner.as_ref()).await?;
    println!("closed {node}");
    Ok(())
}
