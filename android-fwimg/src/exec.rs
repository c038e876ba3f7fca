//! Running external programs.

use crate::error::{Error, Result};
use std::process::{Command, Stdio};
use tracing::debug;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Turns a non-zero exit into [`Error::ToolFailed`].
    pub fn check(self, program: &str) -> Result<Self> {
        if self.success() {
            return Ok(self);
        }
        Err(Error::ToolFailed {
            program: program.to_string(),
            exit_code: self.exit_code,
            stderr: self.stderr.trim().to_string(),
        })
    }
}

/// Runs a command line and reports how it went. A program that cannot be
/// started is an error; a non-zero exit is not, callers decide with
/// [`CommandOutput::check`].
pub trait CommandRunner {
    fn execute(&self, argv: &[String]) -> Result<CommandOutput>;
}

/// Runs commands as child processes.
#[derive(Debug, Default, Copy, Clone)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn execute(&self, argv: &[String]) -> Result<CommandOutput> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| Error::invalid("empty command line"))?;
        debug!(?argv, "running");

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| Error::ToolMissing {
                program: program.clone(),
                source,
            })?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            // Killed by a signal.
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}
