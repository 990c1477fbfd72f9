//! Supervisor for a single external process.
//!
//! The supervisor owns at most one live process. Output is delivered line by
//! line on two channels (stdout and stderr) and lifecycle changes on a third.
//! A monitor task owns the OS child: it waits for exit, terminates on request,
//! flushes the readers and then reports how the process ended.

use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::Child;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::output::{drain_readers, read_lines, OUTPUT_DRAIN_TIMEOUT};
use super::{
    classify_exit, ExitKind, LaunchSpec, OutputLine, ProcessError, ProcessHandle, ProcessState,
};
use crate::config::BotConfig;

/// Lifecycle notifications from the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// A process was launched.
    Started { pid: u32, program: PathBuf },
    /// A stop was requested; the process may still be shutting down.
    Stopping { pid: u32 },
    /// The process ended cleanly or after a stop request.
    Exited {
        pid: u32,
        exit_code: Option<i32>,
        stop_requested: bool,
    },
    /// The process ended on its own with a non-zero or unknown status.
    Crashed { pid: u32, exit_code: Option<i32> },
}

impl ProcessEvent {
    /// The error to surface to the user, if this event is a failure.
    #[must_use]
    pub fn as_error(&self) -> Option<ProcessError> {
        match self {
            Self::Crashed { exit_code, .. } => Some(ProcessError::Crashed {
                exit_code: *exit_code,
            }),
            _ => None,
        }
    }
}

/// Receiving ends of the supervisor's output and event channels.
#[derive(Debug)]
pub struct SupervisorChannels {
    pub stdout: mpsc::UnboundedReceiver<OutputLine>,
    pub stderr: mpsc::UnboundedReceiver<OutputLine>,
    pub events: mpsc::UnboundedReceiver<ProcessEvent>,
}

#[derive(Debug, Clone)]
struct Sinks {
    stdout: mpsc::UnboundedSender<OutputLine>,
    stderr: mpsc::UnboundedSender<OutputLine>,
    events: mpsc::UnboundedSender<ProcessEvent>,
}

impl Sinks {
    fn event(&self, event: ProcessEvent) {
        // The host may have stopped listening; supervision carries on.
        let _ = self.events.send(event);
    }
}

#[derive(Debug)]
struct Supervised {
    pid: u32,
    handle: watch::Receiver<ProcessHandle>,
    terminate: CancellationToken,
    monitor: Option<JoinHandle<()>>,
    stop_requested: bool,
}

impl Supervised {
    fn is_active(&self) -> bool {
        !self.stop_requested && self.handle.borrow().state == ProcessState::Running
    }

    fn request_stop(&mut self, sinks: &Sinks) {
        self.stop_requested = true;
        self.terminate.cancel();
        sinks.event(ProcessEvent::Stopping { pid: self.pid });
    }

    async fn join(&mut self) {
        if let Some(monitor) = self.monitor.take() {
            if let Err(e) = monitor.await {
                tracing::warn!(pid = self.pid, error = %e, "Process monitor ended abnormally");
            }
        }
    }
}

/// Supervises at most one external process at a time.
#[derive(Debug)]
pub struct ProcessSupervisor {
    config: BotConfig,
    sinks: Sinks,
    current: Option<Supervised>,
}

impl ProcessSupervisor {
    /// Create a supervisor and the channels its output is delivered on.
    #[must_use]
    pub fn new(config: BotConfig) -> (Self, SupervisorChannels) {
        let (stdout_tx, stdout) = mpsc::unbounded_channel();
        let (stderr_tx, stderr) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();

        let supervisor = Self {
            config,
            sinks: Sinks {
                stdout: stdout_tx,
                stderr: stderr_tx,
                events: events_tx,
            },
            current: None,
        };
        let channels = SupervisorChannels {
            stdout,
            stderr,
            events,
        };
        (supervisor, channels)
    }

    /// Snapshot of the current or most recent process.
    #[must_use]
    pub fn handle(&self) -> Option<ProcessHandle> {
        self.current.as_ref().map(|current| {
            let mut handle = current.handle.borrow().clone();
            handle.stop_requested |= current.stop_requested;
            handle
        })
    }

    /// State of the current or most recent process.
    #[must_use]
    pub fn state(&self) -> ProcessState {
        self.current
            .as_ref()
            .map_or(ProcessState::Idle, |current| current.handle.borrow().state)
    }

    /// Whether a process is running and no stop was requested for it.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.current.as_ref().is_some_and(Supervised::is_active)
    }

    /// Launch a process, stopping the running one first.
    ///
    /// If a process is running it is sent a terminate request, and this call
    /// waits until it has exited (force-killing it after the configured
    /// timeout) before the new process is spawned.
    ///
    /// # Errors
    ///
    /// Returns `ProcessError::StartFailed` if the program cannot be executed.
    pub async fn start(&mut self, spec: LaunchSpec) -> Result<u32, ProcessError> {
        if let Some(mut previous) = self.current.take() {
            if previous.is_active() {
                tracing::info!(pid = previous.pid, "Stopping running process before starting a new one");
                previous.request_stop(&self.sinks);
            }
            previous.join().await;
        }

        let mut child = spec
            .command()
            .spawn()
            .map_err(|e| ProcessError::start_failed(spec.program(), &e))?;
        let pid = child.id().unwrap_or_default();

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            let sink = self.sinks.stdout.clone();
            readers.push(tokio::spawn(read_lines(stdout, move |text| {
                let _ = sink.send(OutputLine { pid, text });
            })));
        }
        if let Some(stderr) = child.stderr.take() {
            let sink = self.sinks.stderr.clone();
            readers.push(tokio::spawn(read_lines(stderr, move |text| {
                let _ = sink.send(OutputLine { pid, text });
            })));
        }

        tracing::info!(
            pid,
            program = %spec.program().display(),
            args = ?spec.get_args(),
            "Process started"
        );
        self.sinks.event(ProcessEvent::Started {
            pid,
            program: spec.program().to_path_buf(),
        });

        let (handle_tx, handle) = watch::channel(ProcessHandle::running(&spec, pid));
        let terminate = CancellationToken::new();
        let monitor = Monitor {
            pid,
            handle: handle_tx,
            terminate: terminate.clone(),
            sinks: self.sinks.clone(),
            terminate_timeout: self.config.terminate_timeout(),
            auto_restart: self.config.auto_restart,
        };
        let monitor = tokio::spawn(monitor.run(child, readers));

        self.current = Some(Supervised {
            pid,
            handle,
            terminate,
            monitor: Some(monitor),
            stop_requested: false,
        });
        Ok(pid)
    }

    /// Ask the running process to terminate, without waiting for it.
    ///
    /// No-op when nothing is running or a stop was already requested.
    pub fn stop(&mut self) {
        let Some(current) = self.current.as_mut() else {
            return;
        };
        if !current.is_active() {
            return;
        }
        tracing::info!(pid = current.pid, "Stopping process");
        current.request_stop(&self.sinks);
    }

    /// Wait until the current process has exited and been reported.
    pub async fn wait(&mut self) -> Option<ProcessHandle> {
        if let Some(current) = self.current.as_mut() {
            current.join().await;
        }
        self.handle()
    }

    /// Stop the current process and wait for it to exit.
    pub async fn shutdown(&mut self) -> Option<ProcessHandle> {
        self.stop();
        self.wait().await
    }
}

/// Owns the OS child for one supervised process.
struct Monitor {
    pid: u32,
    handle: watch::Sender<ProcessHandle>,
    terminate: CancellationToken,
    sinks: Sinks,
    terminate_timeout: Duration,
    auto_restart: bool,
}

impl Monitor {
    async fn run(self, mut child: Child, readers: Vec<JoinHandle<()>>) {
        let status = tokio::select! {
            status = child.wait() => status,
            () = self.terminate.cancelled() => {
                graceful_terminate(&mut child, self.terminate_timeout).await
            }
        };

        drain_readers(readers, OUTPUT_DRAIN_TIMEOUT).await;

        let exit_code = match status {
            Ok(status) => status.code(),
            Err(e) => {
                tracing::warn!(pid = self.pid, error = %e, "Failed to collect exit status");
                None
            }
        };
        let stop_requested = self.terminate.is_cancelled();
        self.handle
            .send_modify(|handle| handle.mark_exited(exit_code, stop_requested));

        let pid = self.pid;
        match classify_exit(exit_code, stop_requested) {
            ExitKind::Crashed => {
                tracing::warn!(pid, exit_code = ?exit_code, "Process crashed");
                if self.auto_restart {
                    tracing::debug!(pid, "auto_restart is set but no restart policy exists");
                }
                self.sinks.event(ProcessEvent::Crashed { pid, exit_code });
            }
            ExitKind::Clean | ExitKind::Stopped => {
                tracing::info!(pid, exit_code = ?exit_code, stop_requested, "Process exited");
                self.sinks.event(ProcessEvent::Exited {
                    pid,
                    exit_code,
                    stop_requested,
                });
            }
        }
    }
}

/// Terminate `child` gracefully, force-killing it after `timeout`.
///
/// On Unix, sends SIGTERM first. On other platforms, kills immediately.
async fn graceful_terminate(child: &mut Child, timeout: Duration) -> std::io::Result<ExitStatus> {
    let Some(pid) = child.id() else {
        return child.wait().await;
    };

    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let nix_pid = Pid::from_raw(i32::try_from(pid).unwrap_or(i32::MAX));
        if let Err(e) = kill(nix_pid, Signal::SIGTERM) {
            tracing::warn!(pid, error = %e, "Failed to send SIGTERM");
        }
        if let Ok(status) = tokio::time::timeout(timeout, child.wait()).await {
            return status;
        }
        tracing::warn!(pid, "Process ignored SIGTERM, killing");
    }

    #[cfg(not(unix))]
    let _ = (pid, timeout);

    child.kill().await?;
    child.wait().await
}
