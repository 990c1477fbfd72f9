//! Token exchange and profile fetch against the identity provider.

use std::fmt;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::error::truncate_body;
use super::AuthError;
use crate::config::AuthConfig;

/// Connection timeout for provider requests.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Raw token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    token_type: Option<String>,
    expires_in: Option<u64>,
    refresh_token: Option<String>,
    scope: Option<String>,
}

/// A bearer token issued by the provider.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: Option<u64>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// The authenticated user's profile.
///
/// Known fields are typed; anything else the provider returns is kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub global_name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl UserProfile {
    /// Name suitable for greeting the user.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.global_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.username)
    }
}

/// Result of a successful login.
#[derive(Debug, Clone, PartialEq)]
pub struct Credentials {
    pub token: AccessToken,
    pub profile: UserProfile,
}

/// HTTP client for the provider's token and profile endpoints.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    http: Client,
    client_id: String,
    token_url: String,
    profile_url: String,
    token_timeout: Duration,
    profile_timeout: Duration,
}

impl OAuthClient {
    /// Build a client for the endpoints in `config`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Network` if the HTTP client cannot be initialised.
    pub fn new(config: &AuthConfig) -> Result<Self, AuthError> {
        let http = Client::builder().connect_timeout(CONNECT_TIMEOUT).build()?;
        Ok(Self {
            http,
            client_id: config.client_id.clone(),
            token_url: config.token_url.clone(),
            profile_url: config.profile_url.clone(),
            token_timeout: config.token_timeout(),
            profile_timeout: config.profile_timeout(),
        })
    }

    /// Exchange an authorization code for an access token.
    ///
    /// # Errors
    ///
    /// Returns `TokenExchangeFailed` on a non-200 answer, `MissingAccessToken`
    /// if the answer carries no token, and `Network` on transport failure.
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        code_verifier: &str,
    ) -> Result<AccessToken, AuthError> {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("code_verifier", code_verifier),
            ("client_id", self.client_id.as_str()),
        ];

        let response = self
            .http
            .post(&self.token_url)
            .timeout(self.token_timeout)
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "Token exchange rejected");
            return Err(AuthError::TokenExchangeFailed {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        let token: TokenResponse = response.json().await?;
        let access_token = token
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingAccessToken)?;

        tracing::debug!("Token exchange succeeded");
        Ok(AccessToken {
            access_token,
            token_type: token.token_type.unwrap_or_else(|| "Bearer".to_string()),
            expires_in: token.expires_in,
            refresh_token: token.refresh_token,
            scope: token.scope,
        })
    }

    /// Fetch the profile of the token's owner.
    ///
    /// # Errors
    ///
    /// Returns `ProfileFetchFailed` on a non-200 answer and `Network` on
    /// transport failure.
    pub async fn fetch_profile(&self, access_token: &str) -> Result<UserProfile, AuthError> {
        let response = self
            .http
            .get(&self.profile_url)
            .timeout(self.profile_timeout)
            .bearer_auth(access_token)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            tracing::warn!(status = status.as_u16(), "Profile fetch rejected");
            return Err(AuthError::ProfileFetchFailed {
                status: status.as_u16(),
            });
        }

        Ok(response.json().await?)
    }
}
