//! Configuration types.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the OAuth login flow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuthConfig {
    /// Public client identifier registered with the provider.
    pub client_id: String,
    /// Browser-facing authorization endpoint.
    pub authorize_url: String,
    /// Token exchange endpoint.
    pub token_url: String,
    /// Endpoint returning the authenticated user's profile.
    pub profile_url: String,
    /// Requested scope.
    pub scope: String,
    /// Loopback ports tried in order for the callback listener.
    pub candidate_ports: Vec<u16>,
    /// Seconds to wait for the browser redirect before giving up.
    pub login_timeout_secs: u64,
    /// Request timeout for the token exchange.
    pub token_timeout_secs: u64,
    /// Request timeout for the profile fetch.
    pub profile_timeout_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            client_id: "1429597807161114624".to_string(),
            authorize_url: "https://discord.com/oauth2/authorize".to_string(),
            token_url: "https://discord.com/api/oauth2/token".to_string(),
            profile_url: "https://discord.com/api/users/@me".to_string(),
            scope: "identify".to_string(),
            candidate_ports: vec![53135, 53136],
            login_timeout_secs: 60,
            token_timeout_secs: 8,
            profile_timeout_secs: 5,
        }
    }
}

impl AuthConfig {
    #[must_use]
    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout_secs)
    }

    #[must_use]
    pub fn token_timeout(&self) -> Duration {
        Duration::from_secs(self.token_timeout_secs)
    }

    #[must_use]
    pub fn profile_timeout(&self) -> Duration {
        Duration::from_secs(self.profile_timeout_secs)
    }
}

/// Configuration for launching and supervising bot processes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BotConfig {
    /// Interpreter used to run bots. Resolved from `PATH` when unset.
    pub python: Option<PathBuf>,
    /// Extra environment variables passed to every bot.
    pub env_vars: BTreeMap<String, String>,
    /// Restart a bot after it crashes.
    ///
    /// Parsed and exposed, but no restart policy is attached to it yet.
    pub auto_restart: bool,
    /// Seconds between SIGTERM and a forced kill.
    pub terminate_timeout_secs: u64,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            python: None,
            env_vars: BTreeMap::new(),
            auto_restart: false,
            terminate_timeout_secs: 5,
        }
    }
}

impl BotConfig {
    #[must_use]
    pub fn terminate_timeout(&self) -> Duration {
        Duration::from_secs(self.terminate_timeout_secs)
    }
}

/// Top-level launcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LauncherConfig {
    pub auth: AuthConfig,
    pub bots: BotConfig,
    /// Surface crash notices to the user.
    pub notifications: bool,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            auth: AuthConfig::default(),
            bots: BotConfig::default(),
            notifications: true,
        }
    }
}
