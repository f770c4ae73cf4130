//
// error.rs
// reproin
//
// Error type shared by the workflows; each variant knows which process exit code it maps to.
//
// Thales Matheus Mendonça Santos - November 2025

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReproinError {
    /// An external tool returned a nonzero status; its code is forwarded.
    #[error("command `{command}` failed with exit code {code}: {stderr}")]
    CommandFailed {
        command: String,
        code: i32,
        stderr: String,
    },
    #[error("study directory {} does not exist", .0.display())]
    StudyNotFound(PathBuf),
    #[error("{study} already exists, nothing todo")]
    StudyExists { study: String },
    #[error("{} does not exist", .0.display())]
    MissingPath(PathBuf),
    #[error("{0}")]
    Precondition(String),
}

impl ReproinError {
    pub fn exit_code(&self) -> i32 {
        match self {
            ReproinError::CommandFailed { code, .. } if *code != 0 => *code,
            _ => 1,
        }
    }
}

/// Exit code for an arbitrary error bubbling out of a handler.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<ReproinError>())
        .map(ReproinError::exit_code)
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn command_failure_forwards_its_code_through_context() {
        let err: anyhow::Result<()> = Err(ReproinError::CommandFailed {
            command: "datalad save".into(),
            code: 3,
            stderr: String::new(),
        })
        .context("saving study");
        assert_eq!(exit_code_for(&err.unwrap_err()), 3);
    }

    #[test]
    fn other_errors_exit_with_one() {
        let err = anyhow::Error::new(ReproinError::Precondition("nope".into()));
        assert_eq!(exit_code_for(&err), 1);
        assert_eq!(exit_code_for(&anyhow::anyhow!("plain")), 1);
    }
}
