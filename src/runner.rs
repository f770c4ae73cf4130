//
// runner.rs
// reproin
//
// Thin subprocess layer: runs shell command lines in an explicit directory and captures their output.
//
// Thales Matheus Mendonça Santos - November 2025

use std::path::Path;
use std::process::{Command, Stdio};

use anyhow::{Context, Result};
use tracing::debug;

use crate::error::ReproinError;

/// Captured result of one external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// Some tools report on stderr only (`dcm2niix -v`, older `heudiconv --version`).
    pub fn stdout_or_stderr(&self) -> &str {
        if self.stdout.trim().is_empty() {
            &self.stderr
        } else {
            &self.stdout
        }
    }
}

/// Every external tool invocation goes through this seam.
pub trait CommandRunner {
    /// Run `command` through the shell inside `cwd`, capturing output.
    fn run(&self, command: &str, cwd: &Path) -> Result<CommandOutput>;

    /// Run a program attached to the terminal, returning only its status.
    fn run_interactive(&self, program: &str, args: &[&str], cwd: &Path) -> Result<i32>;

    /// Like [`CommandRunner::run`] but a nonzero status becomes an error carrying the code.
    fn run_checked(&self, command: &str, cwd: &Path) -> Result<CommandOutput> {
        let output = self.run(command, cwd)?;
        if !output.success() {
            return Err(ReproinError::CommandFailed {
                command: command.to_string(),
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            }
            .into());
        }
        Ok(output)
    }
}

/// Runs commands through `sh -c`, blocking until they finish.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellRunner;

impl CommandRunner for ShellRunner {
    fn run(&self, command: &str, cwd: &Path) -> Result<CommandOutput> {
        debug!(%command, cwd = %cwd.display(), "running command");
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("Failed to spawn `{command}`"))?;

        // A signal-terminated child has no code; report it as a generic failure.
        let code = output.status.code().unwrap_or(-1);
        Ok(CommandOutput {
            code,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn run_interactive(&self, program: &str, args: &[&str], cwd: &Path) -> Result<i32> {
        debug!(program, ?args, "running interactively");
        let status = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .status()
            .with_context(|| format!("Failed to spawn `{program}`"))?;
        Ok(status.code().unwrap_or(-1))
    }
}

/// Quote a value for inclusion in a `sh -c` command line.
pub fn shell_quote(value: &str) -> String {
    let safe = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if safe {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}
