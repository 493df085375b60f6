// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::host::output::Output;

#[derive(Debug)]
pub struct CommandFailureInfo {
    pub command: String,
    pub status: std::process::ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandFailureInfo {
    /// The exit code of the failed command, or `1` if it was terminated by a
    /// signal.
    pub fn exit_code(&self) -> i32 {
        self.status.code().unwrap_or(1)
    }
}

impl std::fmt::Display for CommandFailureInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "Command [{}] executed and failed with status: {}",
            self.command, self.status
        )?;
        write!(f, "  stdout: {}", self.stdout)?;
        write!(f, "  stderr: {}", self.stderr)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ExecutionError {
    #[error("Failed to start execution of [{command}]: {err}")]
    ExecutionStart { command: String, err: std::io::Error },

    #[error("{0}")]
    CommandFailure(Box<CommandFailureInfo>),
}

impl ExecutionError {
    /// Returns the failure details if the command ran and exited
    /// unsuccessfully.
    pub fn failure_info(&self) -> Option<&CommandFailureInfo> {
        match self {
            ExecutionError::CommandFailure(info) => Some(info),
            ExecutionError::ExecutionStart { .. } => None,
        }
    }
}

pub fn output_to_exec_error(
    command_str: String,
    output: &Output,
) -> ExecutionError {
    ExecutionError::CommandFailure(Box::new(CommandFailureInfo {
        command: command_str,
        status: output.status,
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    }))
}
