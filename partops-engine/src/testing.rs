// SPDX-License-Identifier: GPL-3.0-only

//! In-memory collaborators for tests: a scripted tool runner and a recording
//! block copier. Both record every call and never touch the system.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use partops_contracts::{
    BlockCopier, CopyError, CopyRequest, ToolCommand, ToolError, ToolOutput, ToolRunner,
};

/// Returns scripted outputs per program; unscripted programs succeed with
/// empty output. The last scripted output for a program is sticky.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRunner {
    calls: Arc<Mutex<Vec<ToolCommand>>>,
    scripts: Arc<Mutex<HashMap<String, VecDeque<ToolOutput>>>>,
    missing: Arc<Mutex<BTreeSet<String>>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, program: &str, exit_code: i32, stdout: &str, stderr: &str) -> &Self {
        self.scripts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(program.to_string())
            .or_default()
            .push_back(ToolOutput {
                exit_code,
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            });
        self
    }

    pub fn succeed(&self, program: &str, stdout: &str) -> &Self {
        self.script(program, 0, stdout, "")
    }

    pub fn fail(&self, program: &str, exit_code: i32, stderr: &str) -> &Self {
        self.script(program, exit_code, "", stderr)
    }

    /// The program behaves as if uninstalled.
    pub fn mark_missing(&self, program: &str) -> &Self {
        self.missing
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(program.to_string());
        self
    }

    pub fn take_calls(&self) -> Vec<ToolCommand> {
        std::mem::take(&mut *self.calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner()))
    }

    /// Rendered argv of every call so far, without draining them.
    pub fn rendered(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(ToolCommand::render)
            .collect()
    }

    pub fn programs(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|call| call.program.clone())
            .collect()
    }

    fn next_output(&self, program: &str) -> ToolOutput {
        let mut scripts = self
            .scripts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let output = match scripts.get_mut(program) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        output.unwrap_or_else(default_output)
    }
}

fn default_output() -> ToolOutput {
    ToolOutput {
        exit_code: 0,
        stdout: String::new(),
        stderr: String::new(),
    }
}

#[async_trait]
impl ToolRunner for ScriptedRunner {
    async fn run(&self, command: &ToolCommand) -> Result<ToolOutput, ToolError> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(command.clone());
        if !self.has_tool(&command.program) {
            return Err(ToolError::Missing(command.program.clone()));
        }
        Ok(self.next_output(&command.program))
    }

    fn has_tool(&self, tool: &str) -> bool {
        !self
            .missing
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(tool)
    }
}

/// Records copy requests and reports full copies unless told to fail.
#[derive(Debug, Clone, Default)]
pub struct RecordingCopier {
    calls: Arc<Mutex<Vec<CopyRequest>>>,
    failure: Arc<Mutex<Option<CopyError>>>,
}

impl RecordingCopier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_with(&self, error: CopyError) {
        *self
            .failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(error);
    }

    pub fn take_calls(&self) -> Vec<CopyRequest> {
        std::mem::take(&mut *self.calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner()))
    }
}

#[async_trait]
impl BlockCopier for RecordingCopier {
    async fn copy(&self, request: &CopyRequest) -> Result<u64, CopyError> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(request.clone());
        match self
            .failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
        {
            Some(error) => Err(error),
            None => Ok(request.length),
        }
    }
}
