//! Login flow tests against a local mock provider.

mod coordinator_test;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use bot_launcher::auth::BrowserLauncher;
use bot_launcher::config::AuthConfig;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const TEST_CODE: &str = "test-code";
pub const TEST_TOKEN: &str = "test-token";

/// How the mock provider answers.
#[derive(Debug, Clone)]
pub struct ProviderBehavior {
    pub token_status: StatusCode,
    pub token_body: serde_json::Value,
    pub profile_status: StatusCode,
}

impl Default for ProviderBehavior {
    fn default() -> Self {
        Self {
            token_status: StatusCode::OK,
            token_body: json!({
                "access_token": TEST_TOKEN,
                "token_type": "Bearer",
                "expires_in": 604_800,
                "scope": "identify",
            }),
            profile_status: StatusCode::OK,
        }
    }
}

#[derive(Clone)]
struct ProviderState {
    behavior: ProviderBehavior,
    token_requests: Arc<Mutex<Vec<HashMap<String, String>>>>,
}

async fn token(
    State(state): State<ProviderState>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    state.token_requests.lock().unwrap().push(form);
    let behavior = &state.behavior;
    if behavior.token_status == StatusCode::OK {
        Json(behavior.token_body.clone()).into_response()
    } else {
        (behavior.token_status, behavior.token_body.to_string()).into_response()
    }
}

async fn profile(State(state): State<ProviderState>, headers: HeaderMap) -> Response {
    let expected = format!("Bearer {TEST_TOKEN}");
    let authorized = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        == Some(expected.as_str());
    if !authorized {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if state.behavior.profile_status != StatusCode::OK {
        return state.behavior.profile_status.into_response();
    }
    Json(json!({
        "id": "80351110224678912",
        "username": "nelly",
        "global_name": "Nelly",
        "avatar": null,
        "locale": "en-US",
    }))
    .into_response()
}

/// Token and profile endpoints served on an ephemeral loopback port.
pub struct MockProvider {
    base_url: String,
    token_requests: Arc<Mutex<Vec<HashMap<String, String>>>>,
    task: JoinHandle<()>,
}

impl MockProvider {
    pub async fn start(behavior: ProviderBehavior) -> Self {
        let token_requests = Arc::new(Mutex::new(Vec::new()));
        let state = ProviderState {
            behavior,
            token_requests: Arc::clone(&token_requests),
        };
        let app = Router::new()
            .route("/token", post(token))
            .route("/users/@me", get(profile))
            .with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            token_requests,
            task,
        }
    }

    /// Login config pointing at this provider, with an ephemeral callback port.
    pub fn config(&self) -> AuthConfig {
        AuthConfig {
            client_id: "test-client".to_string(),
            authorize_url: format!("{}/authorize", self.base_url),
            token_url: format!("{}/token", self.base_url),
            profile_url: format!("{}/users/@me", self.base_url),
            candidate_ports: vec![0],
            login_timeout_secs: 5,
            ..AuthConfig::default()
        }
    }

    pub fn token_requests(&self) -> Vec<HashMap<String, String>> {
        self.token_requests.lock().unwrap().clone()
    }
}

impl Drop for MockProvider {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Query parameters of a URL.
pub fn query_params(url: &str) -> HashMap<String, String> {
    url::Url::parse(url).unwrap().query_pairs().into_owned().collect()
}

/// Plays the user: follows the authorization URL straight to the redirect.
#[derive(Default)]
pub struct FollowRedirectBrowser {
    pub opened: Mutex<Option<String>>,
}

impl BrowserLauncher for FollowRedirectBrowser {
    fn open(&self, url: &str) -> std::io::Result<()> {
        *self.opened.lock().unwrap() = Some(url.to_string());
        let redirect_uri = query_params(url)["redirect_uri"].clone();
        tokio::spawn(async move {
            let _ = reqwest::get(format!("{redirect_uri}?code={TEST_CODE}")).await;
        });
        Ok(())
    }
}

/// Opens nothing; the redirect never arrives unless the test sends it.
#[derive(Default)]
pub struct NoopBrowser {
    pub opened: Mutex<Option<String>>,
}

impl BrowserLauncher for NoopBrowser {
    fn open(&self, url: &str) -> std::io::Result<()> {
        *self.opened.lock().unwrap() = Some(url.to_string());
        Ok(())
    }
}

/// Simulates a machine without a usable browser.
pub struct FailingBrowser;

impl BrowserLauncher for FailingBrowser {
    fn open(&self, _url: &str) -> std::io::Result<()> {
        Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "no browser available",
        ))
    }
}

/// Whether anything still accepts HTTP requests at `url`.
pub async fn is_listening(url: &str) -> bool {
    reqwest::Client::new()
        .get(url)
        .timeout(std::time::Duration::from_secs(2))
        .send()
        .await
        .is_ok()
}
