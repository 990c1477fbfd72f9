//! Supervised process state.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::LaunchSpec;

/// Lifecycle of a supervised process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    #[default]
    Idle,
    Running,
    Exited,
}

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    /// Exit code 0.
    Clean,
    /// Ended after a stop request.
    Stopped,
    /// Non-zero exit code, or killed by a signal nobody asked for.
    Crashed,
}

/// Classify an exit.
///
/// `exit_code` is `None` when the process was terminated by a signal.
#[must_use]
pub fn classify_exit(exit_code: Option<i32>, stop_requested: bool) -> ExitKind {
    match exit_code {
        Some(0) => ExitKind::Clean,
        _ if stop_requested => ExitKind::Stopped,
        _ => ExitKind::Crashed,
    }
}

/// Snapshot of one supervised process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessHandle {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_directory: Option<PathBuf>,
    pub pid: Option<u32>,
    pub state: ProcessState,
    /// `None` until exit, and after exit when killed by a signal.
    pub exit_code: Option<i32>,
    pub started_at: Option<DateTime<Utc>>,
    pub stop_requested: bool,
}

impl ProcessHandle {
    /// A handle for a process that was just spawned.
    #[must_use]
    pub fn running(spec: &LaunchSpec, pid: u32) -> Self {
        Self {
            program: spec.program().to_path_buf(),
            args: spec.get_args().to_vec(),
            working_directory: spec.get_working_directory().map(PathBuf::from),
            pid: Some(pid),
            state: ProcessState::Running,
            exit_code: None,
            started_at: Some(Utc::now()),
            stop_requested: false,
        }
    }

    /// Record the exit.
    pub fn mark_exited(&mut self, exit_code: Option<i32>, stop_requested: bool) {
        self.state = ProcessState::Exited;
        self.exit_code = exit_code;
        self.stop_requested = stop_requested;
    }

    /// Classification of the exit, once exited.
    #[must_use]
    pub fn exit_kind(&self) -> Option<ExitKind> {
        (self.state == ProcessState::Exited)
            .then(|| classify_exit(self.exit_code, self.stop_requested))
    }
}
