//! Colored console output for the launcher.
//!
//! Stands in for the launcher's console pane: bot output, lifecycle notices,
//! crash banners and login progress all end up here.

use std::io::{self, Write};

use chrono::Utc;
use owo_colors::OwoColorize;

use crate::auth::AuthState;
use crate::process::{CommandEvent, OutputLine, ProcessEvent};

/// Get current timestamp in the same format as tracing.
fn timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Human-readable exit status.
#[must_use]
pub fn format_exit_code(exit_code: Option<i32>) -> String {
    exit_code.map_or_else(|| "signal".to_string(), |code| code.to_string())
}

/// Banner text shown when a bot crashes.
#[must_use]
pub fn crash_notice(exit_code: Option<i32>) -> String {
    format!(
        "Bot crashed or exited with code {}. Check errors above.",
        format_exit_code(exit_code)
    )
}

/// Print a line of normal bot output.
pub fn print_stdout(line: &OutputLine) {
    println!("{} {}", timestamp().dimmed(), line.text);
    let _ = io::stdout().flush();
}

/// Print a line of bot error output.
pub fn print_stderr(line: &OutputLine) {
    eprintln!("{} {}", timestamp().dimmed(), line.text.red());
}

/// Print a process lifecycle event; crash banners only when `notifications` is set.
pub fn print_process_event(event: &ProcessEvent, notifications: bool) {
    let ts = timestamp();
    match event {
        ProcessEvent::Started { pid, program } => println!(
            "{} {} Starting bot (pid {pid}): {}",
            ts.dimmed(),
            "[BOT]".green().bold(),
            program.display()
        ),
        ProcessEvent::Stopping { pid } => println!(
            "{} {} Bot stopped (pid {pid})",
            ts.dimmed(),
            "[BOT]".yellow().bold()
        ),
        ProcessEvent::Exited { exit_code, .. } => println!(
            "{} {} Bot exited (code {})",
            ts.dimmed(),
            "[BOT]".blue().bold(),
            format_exit_code(*exit_code)
        ),
        ProcessEvent::Crashed { exit_code, .. } => {
            println!(
                "{} {} Bot exited (code {})",
                ts.dimmed(),
                "[BOT]".red().bold(),
                format_exit_code(*exit_code)
            );
            if notifications {
                eprintln!("{} {}", "[NOTICE]".red().bold(), crash_notice(*exit_code));
            }
        }
    }
    let _ = io::stdout().flush();
}

/// Print output or completion of an ad hoc command.
pub fn print_command_event(event: &CommandEvent) {
    match event {
        CommandEvent::Output(line) => println!("{line}"),
        CommandEvent::Finished { exit_code } => println!(
            "{} Command finished (code {})",
            "[CMD]".cyan().bold(),
            format_exit_code(*exit_code)
        ),
    }
    let _ = io::stdout().flush();
}

/// Print a login state change.
pub fn print_auth_state(state: AuthState) {
    let label = match state {
        AuthState::Idle => return,
        AuthState::AwaitingCode => "Waiting for the browser login...".yellow().to_string(),
        AuthState::Exchanging => "Exchanging authorization code...".yellow().to_string(),
        AuthState::Authenticated => "Logged in".green().to_string(),
        AuthState::Failed => "Login failed".red().to_string(),
        AuthState::TimedOut => "Login timed out".red().to_string(),
        AuthState::Cancelled => "Login cancelled".dimmed().to_string(),
    };
    println!("{} {} {label}", timestamp().dimmed(), "[LOGIN]".blue().bold());
    let _ = io::stdout().flush();
}

/// Print the authorization URL as a manual fallback.
pub fn print_login_url(url: &str) {
    println!(
        "{} If your browser didn't open, visit: {}",
        "[LOGIN]".blue().bold(),
        url.cyan()
    );
    let _ = io::stdout().flush();
}
