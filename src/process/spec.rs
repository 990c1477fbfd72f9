//! Process launch specifications.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

use super::ProcessError;
use crate::config::BotConfig;

/// What to run, with which arguments, and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    program: PathBuf,
    args: Vec<String>,
    working_directory: Option<PathBuf>,
    env: BTreeMap<String, String>,
}

impl LaunchSpec {
    /// Create a spec for `program` with no arguments.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_directory: None,
            env: BTreeMap::new(),
        }
    }

    /// Append one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the working directory.
    #[must_use]
    pub fn working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    /// Add environment variables on top of the inherited environment.
    #[must_use]
    pub fn envs(mut self, vars: &BTreeMap<String, String>) -> Self {
        self.env
            .extend(vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    #[must_use]
    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    #[must_use]
    pub fn get_working_directory(&self) -> Option<&Path> {
        self.working_directory.as_deref()
    }

    #[must_use]
    pub fn get_env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Build a bot launch spec from a bot folder, or a file inside one.
    ///
    /// The entry point is the first `.py` file in the folder by name; it runs
    /// under the configured interpreter with the folder as working directory.
    ///
    /// # Errors
    ///
    /// Returns `NoPythonFile` if the folder has no script, `PythonNotFound`
    /// if no interpreter is available, and `Io` if the folder is unreadable.
    pub fn for_bot_folder(path: &Path, config: &BotConfig) -> Result<Self, ProcessError> {
        let folder = if path.is_dir() {
            path
        } else {
            path.parent().unwrap_or(path)
        };
        let entry = find_entry_script(folder)?;
        let python = resolve_python(config)?;

        Ok(Self::new(python)
            .arg(entry.display().to_string())
            .working_directory(folder)
            .envs(&config.env_vars))
    }

    /// Turn the spec into a command with piped output and no stdin.
    #[must_use]
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &self.working_directory {
            cmd.current_dir(dir);
        }

        cmd
    }
}

/// First `.py` file in `folder`, sorted by file name.
fn find_entry_script(folder: &Path) -> Result<PathBuf, ProcessError> {
    let mut scripts: Vec<PathBuf> = std::fs::read_dir(folder)?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "py"))
        .collect();
    scripts.sort();

    scripts
        .into_iter()
        .next()
        .ok_or_else(|| ProcessError::NoPythonFile {
            folder: folder.to_path_buf(),
        })
}

/// The configured interpreter, or `python` / `python3` from `PATH`.
///
/// # Errors
///
/// Returns `PythonNotFound` if neither is available.
pub fn resolve_python(config: &BotConfig) -> Result<PathBuf, ProcessError> {
    if let Some(python) = &config.python {
        return Ok(python.clone());
    }
    which::which("python")
        .or_else(|_| which::which("python3"))
        .map_err(|_| ProcessError::PythonNotFound)
}
