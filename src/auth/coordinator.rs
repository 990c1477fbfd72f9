//! PKCE login orchestration.
//!
//! A login attempt binds a [`CallbackServer`], sends the user to the
//! provider's authorization page and then waits for exactly one of three
//! events: the redirect delivering a code, the deadline, or a cancel. A code
//! is exchanged for a token and the token is used to fetch the profile.
//!
//! Progress is published on two channels: every transition goes to the
//! attempt's own event stream, and the latest state is mirrored on a
//! `watch` channel the host can subscribe to at any time.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{
    AuthError, AuthSession, AuthState, BrowserLauncher, CallbackServer, Credentials, OAuthClient,
    PkcePair, SystemBrowser,
};
use crate::config::AuthConfig;

/// Build the browser-facing authorization URL.
#[must_use]
pub fn build_authorize_url(config: &AuthConfig, redirect_uri: &str, code_challenge: &str) -> String {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("client_id", &config.client_id)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("response_type", "code")
        .append_pair("scope", &config.scope)
        .append_pair("prompt", "consent")
        .append_pair("code_challenge", code_challenge)
        .append_pair("code_challenge_method", "S256")
        .finish();
    let separator = if config.authorize_url.contains('?') {
        '&'
    } else {
        '?'
    };
    format!("{}{separator}{query}", config.authorize_url)
}

/// Events that can end the wait for the redirect.
#[derive(Debug)]
enum LoginEvent {
    CodeReceived(String),
    DeadlineElapsed,
    Cancelled,
    ListenerClosed,
}

/// Fans a session's transitions out to the host.
#[derive(Debug, Clone)]
struct StatePublisher {
    latest: Arc<watch::Sender<AuthState>>,
    events: mpsc::UnboundedSender<AuthState>,
}

impl StatePublisher {
    fn advance(&self, session: &mut AuthSession, next: AuthState) {
        if session.transition(next) {
            self.publish(next);
        }
    }

    fn publish(&self, state: AuthState) {
        self.latest.send_replace(state);
        // The host may have dropped the attempt; the latest state is still kept.
        let _ = self.events.send(state);
    }
}

/// Owns one session and its callback server for the attempt's lifetime.
struct LoginDriver {
    session: AuthSession,
    server: CallbackServer,
    client: OAuthClient,
    publisher: StatePublisher,
}

impl LoginDriver {
    async fn run(
        mut self,
        code_rx: oneshot::Receiver<String>,
        deadline: Instant,
        cancel: CancellationToken,
    ) -> Result<Credentials, AuthError> {
        let event = tokio::select! {
            biased;

            () = cancel.cancelled() => LoginEvent::Cancelled,

            code = code_rx => match code {
                Ok(code) => LoginEvent::CodeReceived(code),
                Err(_) => LoginEvent::ListenerClosed,
            },

            () = tokio::time::sleep_until(deadline) => LoginEvent::DeadlineElapsed,
        };

        self.server.shutdown().await;

        match event {
            LoginEvent::Cancelled => {
                tracing::info!("Login cancelled");
                self.finish(AuthState::Cancelled);
                Err(AuthError::Cancelled)
            }
            LoginEvent::DeadlineElapsed => {
                tracing::warn!("No authorization code received before the deadline");
                self.finish(AuthState::TimedOut);
                Err(AuthError::Timeout)
            }
            LoginEvent::ListenerClosed => {
                self.finish(AuthState::Failed);
                Err(AuthError::Network {
                    cause: "callback listener closed before a code arrived".to_string(),
                })
            }
            LoginEvent::CodeReceived(code) => {
                self.session.set_authorization_code(code);
                self.finish(AuthState::Exchanging);

                let result = tokio::select! {
                    biased;
                    () = cancel.cancelled() => Err(AuthError::Cancelled),
                    result = self.exchange() => result,
                };

                match &result {
                    Ok(credentials) => {
                        tracing::info!(user = %credentials.profile.display_name(), "Login succeeded");
                        self.finish(AuthState::Authenticated);
                    }
                    Err(AuthError::Cancelled) => self.finish(AuthState::Cancelled),
                    Err(e) => {
                        tracing::warn!(error = %e, "Login failed");
                        self.finish(AuthState::Failed);
                    }
                }
                result
            }
        }
    }

    async fn exchange(&mut self) -> Result<Credentials, AuthError> {
        let code = self.session.authorization_code().unwrap_or_default().to_string();
        let redirect_uri = self.session.redirect_uri().unwrap_or_default().to_string();

        let token = self
            .client
            .exchange_code(&code, &redirect_uri, self.session.code_verifier())
            .await?;
        self.session.set_access_token(token.access_token.clone());

        let profile = self.client.fetch_profile(&token.access_token).await?;
        self.session.set_user_profile(profile.clone());

        Ok(Credentials { token, profile })
    }

    fn finish(&mut self, next: AuthState) {
        self.publisher.advance(&mut self.session, next);
    }
}

/// Handle to an in-flight login attempt.
#[derive(Debug)]
pub struct LoginAttempt {
    authorize_url: String,
    redirect_uri: String,
    port: u16,
    states: mpsc::UnboundedReceiver<AuthState>,
    outcome: oneshot::Receiver<Result<Credentials, AuthError>>,
}

impl LoginAttempt {
    /// URL the user must visit; show it if the browser did not open.
    #[must_use]
    pub fn authorize_url(&self) -> &str {
        &self.authorize_url
    }

    /// Redirect URI registered for this attempt's callback listener.
    #[must_use]
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Port the callback server is bound to.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Next state transition, or `None` once the attempt has ended and all
    /// transitions were read.
    pub async fn next_state(&mut self) -> Option<AuthState> {
        self.states.recv().await
    }

    /// Wait for the attempt to finish.
    ///
    /// # Errors
    ///
    /// Returns the error that terminated the attempt.
    pub async fn outcome(self) -> Result<Credentials, AuthError> {
        self.outcome.await.unwrap_or(Err(AuthError::Cancelled))
    }
}

#[derive(Debug)]
struct ActiveLogin {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Runs login attempts, at most one at a time.
pub struct AuthCoordinator {
    config: AuthConfig,
    client: OAuthClient,
    browser: Arc<dyn BrowserLauncher>,
    latest: Arc<watch::Sender<AuthState>>,
    active: Option<ActiveLogin>,
}

impl AuthCoordinator {
    /// Create a coordinator that opens the system browser.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Network` if the HTTP client cannot be built.
    pub fn new(config: AuthConfig) -> Result<Self, AuthError> {
        Self::with_browser(config, Arc::new(SystemBrowser))
    }

    /// Create a coordinator with a custom browser launcher.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Network` if the HTTP client cannot be built.
    pub fn with_browser(
        config: AuthConfig,
        browser: Arc<dyn BrowserLauncher>,
    ) -> Result<Self, AuthError> {
        let client = OAuthClient::new(&config)?;
        let (latest, _) = watch::channel(AuthState::Idle);
        Ok(Self {
            config,
            client,
            browser,
            latest: Arc::new(latest),
            active: None,
        })
    }

    /// Latest state of the current or most recent attempt.
    #[must_use]
    pub fn state(&self) -> AuthState {
        *self.latest.borrow()
    }

    /// Subscribe to state changes across attempts.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.latest.subscribe()
    }

    /// Whether an attempt is still running.
    #[must_use]
    pub fn is_login_active(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| !active.task.is_finished())
    }

    /// Begin a new login attempt.
    ///
    /// Returns once the callback server is listening and the browser was
    /// asked to open the authorization page. The rest of the flow runs in
    /// the background and is observed through the returned [`LoginAttempt`].
    ///
    /// # Errors
    ///
    /// Returns `LoginInProgress` if an attempt is already running,
    /// `PortUnavailable` if no callback port could be bound and
    /// `BrowserLaunchFailed` (carrying the URL) if the browser did not open.
    pub async fn start_login(&mut self) -> Result<LoginAttempt, AuthError> {
        if self.is_login_active() {
            return Err(AuthError::LoginInProgress);
        }
        self.active = None;

        let (events_tx, states) = mpsc::unbounded_channel();
        let publisher = StatePublisher {
            latest: Arc::clone(&self.latest),
            events: events_tx,
        };

        let mut session = AuthSession::new(self.config.client_id.clone(), PkcePair::generate());
        publisher.publish(session.state());

        let mut server = match CallbackServer::start(&self.config.candidate_ports).await {
            Ok(server) => server,
            Err(e) => {
                tracing::warn!(error = %e, "Could not start callback server");
                publisher.advance(&mut session, AuthState::Failed);
                return Err(e);
            }
        };

        let redirect_uri = server.redirect_uri();
        let authorize_url =
            build_authorize_url(&self.config, &redirect_uri, session.code_challenge());
        let deadline = Instant::now() + self.config.login_timeout();
        if session.await_code(redirect_uri.clone(), deadline) {
            publisher.publish(session.state());
        }

        if let Err(e) = self.browser.open(&authorize_url) {
            tracing::warn!(error = %e, "Could not open the browser");
            server.shutdown().await;
            publisher.advance(&mut session, AuthState::Failed);
            return Err(AuthError::BrowserLaunchFailed {
                url: authorize_url,
                reason: e.to_string(),
            });
        }

        let Some(code_rx) = server.take_code_receiver() else {
            server.shutdown().await;
            publisher.advance(&mut session, AuthState::Failed);
            return Err(AuthError::Network {
                cause: "callback channel unavailable".to_string(),
            });
        };

        let port = server.port();
        let driver = LoginDriver {
            session,
            server,
            client: self.client.clone(),
            publisher,
        };

        let cancel = CancellationToken::new();
        let (outcome_tx, outcome) = oneshot::channel();
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            let result = driver.run(code_rx, deadline, task_cancel).await;
            let _ = outcome_tx.send(result);
        });

        self.active = Some(ActiveLogin { cancel, task });

        Ok(LoginAttempt {
            authorize_url,
            redirect_uri,
            port,
            states,
            outcome,
        })
    }

    /// Abort the running attempt, if any, and wait until its listener is closed.
    ///
    /// Safe to call in any state.
    pub async fn cancel(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        active.cancel.cancel();
        if let Err(e) = active.task.await {
            tracing::warn!(error = %e, "Login task ended abnormally");
        }
    }
}

impl Drop for AuthCoordinator {
    fn drop(&mut self) {
        if let Some(active) = &self.active {
            active.cancel.cancel();
        }
    }
}
