//! Login error types.

/// Maximum number of response body characters kept in error messages.
pub(crate) const MAX_ERROR_BODY_CHARS: usize = 120;

/// Errors that terminate a login attempt.
///
/// Every variant is recoverable: the host may call `start_login` again.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// None of the candidate callback ports could be bound.
    #[error("Local port is busy (tried {ports:?})")]
    PortUnavailable { ports: Vec<u16> },

    /// The system browser could not be opened.
    #[error("Could not open the browser ({reason}). Open this URL manually: {url}")]
    BrowserLaunchFailed { url: String, reason: String },

    /// No authorization code arrived before the deadline.
    #[error("Timeout: no authorization code received")]
    Timeout,

    /// The token endpoint rejected the exchange.
    #[error("Token exchange failed: HTTP {status} {body}")]
    TokenExchangeFailed { status: u16, body: String },

    /// The token endpoint answered 200 without an access token.
    #[error("No access_token in token response")]
    MissingAccessToken,

    /// The profile endpoint rejected the bearer token.
    #[error("Profile fetch failed: HTTP {status}")]
    ProfileFetchFailed { status: u16 },

    /// Transport-level failure talking to the provider.
    #[error("Network error: {cause}")]
    Network { cause: String },

    /// A login attempt is already in flight.
    #[error("A login attempt is already in progress")]
    LoginInProgress,

    /// The attempt was cancelled by the host.
    #[error("Login cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network {
            cause: err.to_string(),
        }
    }
}

/// Truncate a response body for inclusion in an error message.
pub(crate) fn truncate_body(body: &str) -> String {
    body.chars().take(MAX_ERROR_BODY_CHARS).collect()
}
