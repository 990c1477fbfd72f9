//! Fire-and-forget shell commands with merged output.

use std::path::Path;

use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::output::{drain_readers, read_lines, OUTPUT_DRAIN_TIMEOUT};
use super::spec::resolve_python;
use super::{LaunchSpec, ProcessError};
use crate::config::BotConfig;

/// Progress of a running command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandEvent {
    /// A line from stdout or stderr.
    Output(String),
    /// The command ended. `None` means it was terminated by a signal.
    Finished { exit_code: Option<i32> },
}

/// Collected result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub lines: Vec<String>,
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// One in-flight command invocation.
#[derive(Debug)]
pub struct CommandRun {
    pid: Option<u32>,
    events: mpsc::UnboundedReceiver<CommandEvent>,
}

impl CommandRun {
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Next output line or the completion event.
    pub async fn next_event(&mut self) -> Option<CommandEvent> {
        self.events.recv().await
    }

    /// Drain all output and wait for completion.
    pub async fn collect(mut self) -> CommandOutput {
        let mut output = CommandOutput::default();
        while let Some(event) = self.events.recv().await {
            match event {
                CommandEvent::Output(line) => output.lines.push(line),
                CommandEvent::Finished { exit_code } => output.exit_code = exit_code,
            }
        }
        output
    }
}

/// Interpreter used to run command strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shell {
    program: String,
    args: Vec<String>,
}

impl Shell {
    #[must_use]
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    /// `powershell -Command` on Windows, `sh -c` elsewhere.
    #[must_use]
    pub fn host_default() -> Self {
        if cfg!(windows) {
            Self::new("powershell", &["-Command"])
        } else {
            Self::new("sh", &["-c"])
        }
    }

    fn spec_for(&self, command: &str) -> LaunchSpec {
        LaunchSpec::new(&self.program)
            .args(self.args.iter().cloned())
            .arg(command)
    }
}

impl Default for Shell {
    fn default() -> Self {
        Self::host_default()
    }
}

/// Runs short-lived commands. Every invocation is independent.
#[derive(Debug, Clone, Default)]
pub struct CommandRunner {
    shell: Shell,
}

impl CommandRunner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_shell(shell: Shell) -> Self {
        Self { shell }
    }

    /// Run `command` through the shell.
    ///
    /// # Errors
    ///
    /// Returns `ProcessError::StartFailed` if the shell cannot be executed.
    pub fn run(&self, command: &str) -> Result<CommandRun, ProcessError> {
        tracing::info!(command, "Running command");
        self.run_spec(&self.shell.spec_for(command))
    }

    /// Install a bot's `requirements.txt` with pip.
    ///
    /// # Errors
    ///
    /// Returns `NoRequirements` if the folder has no `requirements.txt`,
    /// `PythonNotFound` if no interpreter is available and `StartFailed` if
    /// it cannot be executed.
    pub fn install_requirements(
        &self,
        folder: &Path,
        config: &BotConfig,
    ) -> Result<CommandRun, ProcessError> {
        let requirements = folder.join("requirements.txt");
        if !requirements.is_file() {
            return Err(ProcessError::NoRequirements {
                folder: folder.to_path_buf(),
            });
        }
        let python = resolve_python(config)?;

        tracing::info!(path = %requirements.display(), "Installing requirements");
        let spec = LaunchSpec::new(python)
            .args(["-m", "pip", "install", "-r"])
            .arg(requirements.display().to_string())
            .working_directory(folder)
            .envs(&config.env_vars);
        self.run_spec(&spec)
    }

    /// Run an arbitrary spec with stdout and stderr merged.
    ///
    /// # Errors
    ///
    /// Returns `ProcessError::StartFailed` if the program cannot be executed.
    pub fn run_spec(&self, spec: &LaunchSpec) -> Result<CommandRun, ProcessError> {
        let (tx, events) = mpsc::unbounded_channel();
        let (mut child, readers) = spawn_merged(spec, &tx)
            .map_err(|e| ProcessError::start_failed(spec.program(), &e))?;
        let pid = child.id();

        tokio::spawn(async move {
            let status = child.wait().await;
            drain_readers(readers, OUTPUT_DRAIN_TIMEOUT).await;
            let exit_code = match status {
                Ok(status) => status.code(),
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to collect command exit status");
                    None
                }
            };
            tracing::info!(pid = ?pid, exit_code = ?exit_code, "Command finished");
            let _ = tx.send(CommandEvent::Finished { exit_code });
        });

        Ok(CommandRun { pid, events })
    }
}

fn forward_output(
    tx: &mpsc::UnboundedSender<CommandEvent>,
) -> impl FnMut(String) + Send + 'static {
    let tx = tx.clone();
    move |line| {
        let _ = tx.send(CommandEvent::Output(line));
    }
}

/// Spawn with stdout and stderr writing into one pipe, so lines arrive in
/// the order the program wrote them.
#[cfg(unix)]
fn spawn_merged(
    spec: &LaunchSpec,
    tx: &mpsc::UnboundedSender<CommandEvent>,
) -> std::io::Result<(Child, Vec<JoinHandle<()>>)> {
    use std::os::fd::OwnedFd;
    use tokio::net::unix::pipe;

    let (reader, writer) = std::io::pipe()?;
    let child = {
        let mut command = spec.command();
        command.stdout(writer.try_clone()?).stderr(writer);
        command.spawn()?
    };
    // The command is dropped, so only the child holds the write end now.
    let reader = pipe::Receiver::from_owned_fd(OwnedFd::from(reader))?;
    let task = tokio::spawn(read_lines(reader, forward_output(tx)));
    Ok((child, vec![task]))
}

#[cfg(not(unix))]
fn spawn_merged(
    spec: &LaunchSpec,
    tx: &mpsc::UnboundedSender<CommandEvent>,
) -> std::io::Result<(Child, Vec<JoinHandle<()>>)> {
    let mut child = spec.command().spawn()?;
    let mut readers = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        readers.push(tokio::spawn(read_lines(stdout, forward_output(tx))));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(tokio::spawn(read_lines(stderr, forward_output(tx))));
    }
    Ok((child, readers))
}
