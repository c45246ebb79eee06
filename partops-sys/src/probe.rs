// SPDX-License-Identifier: GPL-3.0-only

//! External tool detection
//!
//! Probes `PATH` once for every utility the capability table can ask for.

use partops_types::{FsToolInfo, ToolAvailability};
use tracing::{debug, warn};

/// Check if a command is available in PATH
fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Probe each tool; anything in `disabled` is reported missing regardless.
pub fn probe_tools<'a, I>(tools: I, disabled: &[String]) -> ToolAvailability
where
    I: IntoIterator<Item = &'a str>,
{
    let found: Vec<&str> = tools
        .into_iter()
        .filter(|tool| {
            if disabled.iter().any(|name| name == tool) {
                debug!(tool, "tool disabled by configuration");
                return false;
            }
            let exists = command_exists(tool);
            if !exists {
                warn!(tool, "external tool not found; dependent actions disabled");
            }
            exists
        })
        .collect();

    ToolAvailability::from_found(found)
}

/// Availability report for display, one entry per (tool, package hint).
pub fn describe_tools<'a, I>(requirements: I, availability: &ToolAvailability) -> Vec<FsToolInfo>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    requirements
        .into_iter()
        .map(|(command, package_hint)| FsToolInfo {
            command: command.to_string(),
            package_hint: package_hint.to_string(),
            available: availability.is_available(command),
        })
        .collect()
}
