//! External tool availability
//!
//! Filled once per process by probing `PATH` and then only read.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Information about an external tool requirement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsToolInfo {
    /// Command that must be present
    pub command: String,
    /// Package name hint (for common distros)
    pub package_hint: String,
    /// Whether this tool is currently available
    pub available: bool,
}

/// Set of external tool names found on this system
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolAvailability {
    found: BTreeSet<String>,
}

impl ToolAvailability {
    /// Nothing available; every external-tool action degrades to unsupported.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn from_found<I, S>(tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            found: tools.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_available(&self, tool: &str) -> bool {
        self.found.contains(tool)
    }

    pub fn mark_missing(&mut self, tool: &str) {
        self.found.remove(tool);
    }

    pub fn found(&self) -> impl Iterator<Item = &str> {
        self.found.iter().map(String::as_str)
    }
}
