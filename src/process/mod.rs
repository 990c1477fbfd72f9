//! Launching and supervising external processes.

mod command;
mod error;
mod handle;
mod output;
mod spec;
mod supervisor;

pub use command::{CommandEvent, CommandOutput, CommandRun, CommandRunner, Shell};
pub use error::ProcessError;
pub use handle::{classify_exit, ExitKind, ProcessHandle, ProcessState};
pub use output::OutputLine;
pub use spec::{resolve_python, LaunchSpec};
pub use supervisor::{ProcessEvent, ProcessSupervisor, SupervisorChannels};
