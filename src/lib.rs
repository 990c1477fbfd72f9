//! Bot Launcher - login-gated launcher and supervisor for bot processes.

pub mod auth;
pub mod config;
pub mod display;
pub mod process;
