//! Process error types.

use std::path::{Path, PathBuf};

/// Errors from launching and supervising external processes.
#[derive(thiserror::Error, Debug)]
pub enum ProcessError {
    /// The program could not be executed.
    #[error("Failed to start {program}: {reason}")]
    StartFailed { program: String, reason: String },

    /// The process ended with a non-zero or unknown exit status.
    #[error("Process crashed ({})", describe_exit(.exit_code))]
    Crashed { exit_code: Option<i32> },

    /// A bot folder without an entry script.
    #[error("No Python (.py) file found in {}", .folder.display())]
    NoPythonFile { folder: PathBuf },

    /// No interpreter configured and none on `PATH`.
    #[error("Python interpreter not found")]
    PythonNotFound,

    /// A bot folder without `requirements.txt`.
    #[error("No requirements.txt found in {}", .folder.display())]
    NoRequirements { folder: PathBuf },

    /// Other I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProcessError {
    /// Create a `StartFailed` error from a spawn failure, classifying common cases.
    #[must_use]
    pub fn start_failed(program: &Path, err: &std::io::Error) -> Self {
        let reason = match err.kind() {
            std::io::ErrorKind::NotFound => "program not found".to_string(),
            std::io::ErrorKind::PermissionDenied => "permission denied".to_string(),
            _ => err.to_string(),
        };
        Self::StartFailed {
            program: program.display().to_string(),
            reason,
        }
    }
}

#[allow(clippy::ref_option)]
fn describe_exit(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    }
}
