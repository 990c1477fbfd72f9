//! OAuth2 Authorization Code login with PKCE.
//!
//! # Flow
//!
//! ```text
//! Host               AuthCoordinator          CallbackServer        Provider
//!  |-- start_login ------->|                         |                   |
//!  |                       |-- bind 127.0.0.1 ------>|                   |
//!  |                       |-- open browser ---------------------------->|
//!  |                       |                         |<-- GET /callback -|
//!  |                       |<-- code (oneshot) ------|                   |
//!  |                       |-- POST token, GET profile ----------------->|
//!  |<-- Authenticated -----|                         |                   |
//! ```

mod browser;
mod client;
mod coordinator;
mod error;
mod pkce;
mod server;
mod session;

pub use browser::{BrowserLauncher, SystemBrowser};
pub use client::{AccessToken, Credentials, OAuthClient, UserProfile};
pub use coordinator::{build_authorize_url, AuthCoordinator, LoginAttempt};
pub use error::AuthError;
pub use pkce::{
    code_challenge, generate_code_verifier, PkcePair, MAX_VERIFIER_LEN, MIN_VERIFIER_LEN,
};
pub use server::{CallbackServer, CALLBACK_PATH, CONFIRMATION_BODY};
pub use session::{AuthSession, AuthState};
