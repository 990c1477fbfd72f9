//! Bot Launcher - log in, then run and supervise bot processes.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use bot_launcher::auth::{AuthCoordinator, AuthError, Credentials};
use bot_launcher::config::{AuthConfig, ConfigError, ConfigLoader, LauncherConfig};
use bot_launcher::display;
use bot_launcher::process::{
    CommandEvent, CommandRun, CommandRunner, LaunchSpec, ProcessError, ProcessEvent,
    ProcessSupervisor,
};

#[derive(Parser)]
#[command(
    name = "bot-launcher",
    about = "Login-gated launcher and supervisor for bot processes",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Path to a config file (defaults to the standard search paths).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in through the browser and show the user.
    Login,
    /// Sign in, then run a bot until it exits or Ctrl-C is pressed.
    Run {
        /// Bot folder, or a file inside it.
        folder: PathBuf,
    },
    /// Run a shell command and stream its output.
    Exec {
        /// The command line to run.
        command: String,
    },
    /// Install a bot's requirements.txt with pip.
    Install {
        /// Bot folder containing requirements.txt.
        folder: PathBuf,
    },
}

#[derive(Debug, thiserror::Error)]
enum LauncherError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error("Command failed with exit code {0}")]
    CommandFailed(String),
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

async fn login(config: &AuthConfig) -> Result<Credentials, AuthError> {
    let mut coordinator = AuthCoordinator::new(config.clone())?;
    let mut attempt = coordinator.start_login().await?;
    display::print_login_url(attempt.authorize_url());

    loop {
        tokio::select! {
            state = attempt.next_state() => match state {
                Some(state) => {
                    display::print_auth_state(state);
                    if state.is_terminal() {
                        break;
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => coordinator.cancel().await,
        }
    }

    attempt.outcome().await
}

async fn run_bot(config: &LauncherConfig, folder: PathBuf) -> Result<(), LauncherError> {
    let spec = LaunchSpec::for_bot_folder(&folder, &config.bots)?;
    let (mut supervisor, mut channels) = ProcessSupervisor::new(config.bots.clone());
    supervisor.start(spec).await?;

    loop {
        tokio::select! {
            Some(line) = channels.stdout.recv() => display::print_stdout(&line),
            Some(line) = channels.stderr.recv() => display::print_stderr(&line),
            Some(event) = channels.events.recv() => {
                display::print_process_event(&event, config.notifications);
                if matches!(event, ProcessEvent::Exited { .. } | ProcessEvent::Crashed { .. }) {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => supervisor.stop(),
        }
    }

    // Exit is reported only after both readers finished, so this is the tail.
    while let Ok(line) = channels.stdout.try_recv() {
        display::print_stdout(&line);
    }
    while let Ok(line) = channels.stderr.try_recv() {
        display::print_stderr(&line);
    }
    Ok(())
}

async fn stream_command(mut run: CommandRun) -> Result<(), LauncherError> {
    while let Some(event) = run.next_event().await {
        display::print_command_event(&event);
        if let CommandEvent::Finished { exit_code } = event {
            if exit_code != Some(0) {
                return Err(LauncherError::CommandFailed(display::format_exit_code(
                    exit_code,
                )));
            }
        }
    }
    Ok(())
}

async fn run_cli(cli: Cli) -> Result<(), LauncherError> {
    let loader = cli
        .config
        .map_or_else(ConfigLoader::new, ConfigLoader::with_path);
    let config = loader.load()?;

    match cli.command {
        Commands::Login => {
            let credentials = login(&config.auth).await?;
            println!("Signed in as {}", credentials.profile.display_name());
        }
        Commands::Run { folder } => {
            let credentials = login(&config.auth).await?;
            tracing::info!(user = %credentials.profile.display_name(), "Authenticated");
            run_bot(&config, folder).await?;
        }
        Commands::Exec { command } => {
            println!("> {command}");
            stream_command(CommandRunner::new().run(&command)?).await?;
        }
        Commands::Install { folder } => {
            let run = CommandRunner::new().install_requirements(&folder, &config.bots)?;
            stream_command(run).await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run_cli(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
