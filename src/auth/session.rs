//! Login session state machine.

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::{PkcePair, UserProfile};

/// Progress of a single login attempt.
///
/// States only ever move forward; the terminal states are
/// `Authenticated`, `Failed`, `TimedOut` and `Cancelled`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    #[default]
    Idle,
    AwaitingCode,
    Exchanging,
    Authenticated,
    Failed,
    TimedOut,
    Cancelled,
}

impl AuthState {
    /// Whether the attempt has finished, successfully or not.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Authenticated | Self::Failed | Self::TimedOut | Self::Cancelled
        )
    }

    /// Whether `next` is a legal successor of `self`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Idle => matches!(next, Self::AwaitingCode | Self::Failed | Self::Cancelled),
            Self::AwaitingCode => matches!(
                next,
                Self::Exchanging | Self::Failed | Self::TimedOut | Self::Cancelled
            ),
            Self::Exchanging => {
                matches!(next, Self::Authenticated | Self::Failed | Self::Cancelled)
            }
            Self::Authenticated | Self::Failed | Self::TimedOut | Self::Cancelled => false,
        }
    }
}

/// Everything known about one login attempt.
#[derive(Debug, Clone)]
pub struct AuthSession {
    client_id: String,
    redirect_uri: Option<String>,
    pkce: PkcePair,
    authorization_code: Option<String>,
    access_token: Option<String>,
    user_profile: Option<UserProfile>,
    deadline: Option<Instant>,
    state: AuthState,
}

impl AuthSession {
    #[must_use]
    pub fn new(client_id: impl Into<String>, pkce: PkcePair) -> Self {
        Self {
            client_id: client_id.into(),
            redirect_uri: None,
            pkce,
            authorization_code: None,
            access_token: None,
            user_profile: None,
            deadline: None,
            state: AuthState::Idle,
        }
    }

    #[must_use]
    pub fn state(&self) -> AuthState {
        self.state
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn redirect_uri(&self) -> Option<&str> {
        self.redirect_uri.as_deref()
    }

    #[must_use]
    pub fn code_verifier(&self) -> &str {
        &self.pkce.verifier
    }

    #[must_use]
    pub fn code_challenge(&self) -> &str {
        &self.pkce.challenge
    }

    #[must_use]
    pub fn authorization_code(&self) -> Option<&str> {
        self.authorization_code.as_deref()
    }

    #[must_use]
    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    #[must_use]
    pub fn user_profile(&self) -> Option<&UserProfile> {
        self.user_profile.as_ref()
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Record where the provider will redirect and when to give up waiting.
    pub fn await_code(&mut self, redirect_uri: String, deadline: Instant) -> bool {
        self.redirect_uri = Some(redirect_uri);
        self.deadline = Some(deadline);
        self.transition(AuthState::AwaitingCode)
    }

    /// Store the authorization code. Only the first code is kept.
    pub fn set_authorization_code(&mut self, code: String) -> bool {
        if self.authorization_code.is_some() {
            return false;
        }
        self.authorization_code = Some(code);
        true
    }

    pub fn set_access_token(&mut self, token: String) {
        self.access_token = Some(token);
    }

    pub fn set_user_profile(&mut self, profile: UserProfile) {
        self.user_profile = Some(profile);
    }

    /// Move to `next`, refusing backwards or out-of-order moves.
    pub fn transition(&mut self, next: AuthState) -> bool {
        if !self.state.can_transition_to(next) {
            tracing::warn!(from = ?self.state, to = ?next, "Rejected auth state transition");
            return false;
        }
        tracing::debug!(from = ?self.state, to = ?next, "Auth state transition");
        self.state = next;
        true
    }
}
