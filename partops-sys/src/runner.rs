// SPDX-License-Identifier: GPL-3.0-only

use std::collections::BTreeSet;
use std::process::Stdio;

use async_trait::async_trait;
use partops_contracts::{ToolCommand, ToolError, ToolOutput, ToolRunner};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Runs utilities as child processes with `LC_ALL=C`.
#[derive(Debug, Clone, Default)]
pub struct SystemToolRunner {
    disabled: BTreeSet<String>,
}

impl SystemToolRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat the given tools as missing even when they are on `PATH`.
    pub fn with_disabled<I, S>(tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            disabled: tools.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl ToolRunner for SystemToolRunner {
    async fn run(&self, command: &ToolCommand) -> Result<ToolOutput, ToolError> {
        if self.disabled.contains(&command.program) {
            return Err(ToolError::Missing(command.program.clone()));
        }

        let rendered = command.render();
        debug!(command = %rendered, "running external tool");
        let failed = |reason: String| ToolError::Spawn {
            command: rendered.clone(),
            reason,
        };

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .env("LC_ALL", "C")
            .stdin(if command.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ToolError::Missing(command.program.clone())
                } else {
                    failed(e.to_string())
                }
            })?;

        if let Some(input) = command.stdin.as_deref()
            && let Some(mut stdin) = child.stdin.take()
        {
            stdin
                .write_all(input.as_bytes())
                .await
                .map_err(|e| failed(format!("writing stdin: {e}")))?;
            // Dropping the handle closes the pipe so the child sees EOF.
            drop(stdin);
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| failed(e.to_string()))?;
        let output = ToolOutput {
            // Killed by a signal: no exit code.
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };

        debug!(
            command = %rendered,
            exit_code = output.exit_code,
            "external tool finished"
        );
        Ok(output)
    }

    fn has_tool(&self, tool: &str) -> bool {
        !self.disabled.contains(tool) && which::which(tool).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_exit_code_and_output() {
        let runner = SystemToolRunner::new();
        let output = runner
            .run(&ToolCommand::new("sh").args(["-c", "echo out; echo err >&2; exit 3"]))
            .await
            .expect("sh should start");

        assert_eq!(output.exit_code, 3);
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[tokio::test]
    async fn feeds_stdin_to_the_child() {
        let runner = SystemToolRunner::new();
        let output = runner
            .run(&ToolCommand::new("cat").stdin("secret\n"))
            .await
            .expect("cat should start");

        assert!(output.success());
        assert_eq!(output.stdout, "secret\n");
    }

    #[tokio::test]
    async fn missing_and_disabled_tools_report_missing() {
        let runner = SystemToolRunner::with_disabled(["sh"]);

        let disabled = runner.run(&ToolCommand::new("sh")).await.unwrap_err();
        assert_eq!(disabled, ToolError::Missing("sh".to_string()));
        assert!(!runner.has_tool("sh"));

        let missing = runner
            .run(&ToolCommand::new("partops-definitely-not-installed"))
            .await
            .unwrap_err();
        assert!(matches!(missing, ToolError::Missing(_)));
    }
}
