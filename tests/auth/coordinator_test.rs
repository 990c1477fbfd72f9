//! End-to-end login attempts.

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use bot_launcher::auth::{code_challenge, AuthCoordinator, AuthError, AuthState, LoginAttempt};
use serde_json::json;

use super::{
    is_listening, query_params, FailingBrowser, FollowRedirectBrowser, MockProvider,
    NoopBrowser, ProviderBehavior, TEST_CODE, TEST_TOKEN,
};

/// Drain every transition of an attempt.
async fn collect_states(attempt: &mut LoginAttempt) -> Vec<AuthState> {
    let mut states = Vec::new();
    while let Some(state) = tokio::time::timeout(Duration::from_secs(15), attempt.next_state())
        .await
        .expect("login attempt should finish")
    {
        states.push(state);
    }
    states
}

#[tokio::test]
async fn successful_login_walks_every_state() {
    let provider = MockProvider::start(ProviderBehavior::default()).await;
    let browser = Arc::new(FollowRedirectBrowser::default());
    let mut coordinator =
        AuthCoordinator::with_browser(provider.config(), browser.clone()).unwrap();

    let mut attempt = coordinator.start_login().await.unwrap();
    let states = collect_states(&mut attempt).await;
    let redirect_uri = attempt.redirect_uri().to_string();
    let credentials = attempt.outcome().await.unwrap();

    assert_eq!(
        states,
        [
            AuthState::Idle,
            AuthState::AwaitingCode,
            AuthState::Exchanging,
            AuthState::Authenticated,
        ]
    );
    assert_eq!(coordinator.state(), AuthState::Authenticated);
    assert_eq!(credentials.token.access_token, TEST_TOKEN);
    assert_eq!(credentials.profile.username, "nelly");
    assert_eq!(credentials.profile.display_name(), "Nelly");
    assert_eq!(credentials.profile.extra["locale"], "en-US");

    // The verifier sent to the token endpoint matches the challenge in the URL.
    let opened = browser.opened.lock().unwrap().clone().unwrap();
    let authorize = query_params(&opened);
    let requests = provider.token_requests();
    assert_eq!(requests.len(), 1);
    let form = &requests[0];
    assert_eq!(form["grant_type"], "authorization_code");
    assert_eq!(form["code"], TEST_CODE);
    assert_eq!(form["client_id"], "test-client");
    assert_eq!(form["redirect_uri"], redirect_uri);
    assert_eq!(authorize["redirect_uri"], redirect_uri);
    assert_eq!(code_challenge(&form["code_verifier"]), authorize["code_challenge"]);

    assert!(!is_listening(&redirect_uri).await);
}

#[tokio::test]
async fn no_redirect_before_deadline_times_out() {
    let provider = MockProvider::start(ProviderBehavior::default()).await;
    let config = bot_launcher::config::AuthConfig {
        login_timeout_secs: 1,
        ..provider.config()
    };
    let mut coordinator =
        AuthCoordinator::with_browser(config, Arc::new(NoopBrowser::default())).unwrap();

    let mut attempt = coordinator.start_login().await.unwrap();
    let states = collect_states(&mut attempt).await;
    let redirect_uri = attempt.redirect_uri().to_string();
    let err = attempt.outcome().await.unwrap_err();

    assert_eq!(err, AuthError::Timeout);
    assert_eq!(states.last(), Some(&AuthState::TimedOut));
    assert!(!states.contains(&AuthState::Exchanging));
    assert!(provider.token_requests().is_empty());

    // A late redirect finds nobody listening.
    assert!(!is_listening(&format!("{redirect_uri}?code=late")).await);
}

#[tokio::test]
async fn rejected_code_is_token_exchange_failure() {
    let provider = MockProvider::start(ProviderBehavior {
        token_status: StatusCode::UNAUTHORIZED,
        token_body: json!({ "error": "invalid_grant" }),
        ..ProviderBehavior::default()
    })
    .await;
    let mut coordinator = AuthCoordinator::with_browser(
        provider.config(),
        Arc::new(FollowRedirectBrowser::default()),
    )
    .unwrap();

    let mut attempt = coordinator.start_login().await.unwrap();
    let states = collect_states(&mut attempt).await;
    let redirect_uri = attempt.redirect_uri().to_string();
    let err = attempt.outcome().await.unwrap_err();

    match err {
        AuthError::TokenExchangeFailed { status, body } => {
            assert_eq!(status, 401);
            assert!(body.contains("invalid_grant"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(states.last(), Some(&AuthState::Failed));
    assert_eq!(coordinator.state(), AuthState::Failed);
    assert!(!is_listening(&redirect_uri).await);
}

#[tokio::test]
async fn token_response_without_access_token_fails() {
    let provider = MockProvider::start(ProviderBehavior {
        token_body: json!({ "token_type": "Bearer" }),
        ..ProviderBehavior::default()
    })
    .await;
    let mut coordinator = AuthCoordinator::with_browser(
        provider.config(),
        Arc::new(FollowRedirectBrowser::default()),
    )
    .unwrap();

    let mut attempt = coordinator.start_login().await.unwrap();
    let states = collect_states(&mut attempt).await;
    let err = attempt.outcome().await.unwrap_err();

    assert_eq!(err, AuthError::MissingAccessToken);
    assert_eq!(states.last(), Some(&AuthState::Failed));
}

#[tokio::test]
async fn rejected_profile_request_fails() {
    let provider = MockProvider::start(ProviderBehavior {
        profile_status: StatusCode::FORBIDDEN,
        ..ProviderBehavior::default()
    })
    .await;
    let mut coordinator = AuthCoordinator::with_browser(
        provider.config(),
        Arc::new(FollowRedirectBrowser::default()),
    )
    .unwrap();

    let mut attempt = coordinator.start_login().await.unwrap();
    let states = collect_states(&mut attempt).await;
    let err = attempt.outcome().await.unwrap_err();

    assert_eq!(err, AuthError::ProfileFetchFailed { status: 403 });
    assert_eq!(states.last(), Some(&AuthState::Failed));
    assert_eq!(provider.token_requests().len(), 1);
}

#[tokio::test]
async fn unreachable_provider_is_network_error() {
    let provider = MockProvider::start(ProviderBehavior::default()).await;
    let dead = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let dead_url = format!("http://{}/token", dead.local_addr().unwrap());
    drop(dead);

    let config = bot_launcher::config::AuthConfig {
        token_url: dead_url,
        ..provider.config()
    };
    let mut coordinator =
        AuthCoordinator::with_browser(config, Arc::new(FollowRedirectBrowser::default()))
            .unwrap();

    let mut attempt = coordinator.start_login().await.unwrap();
    collect_states(&mut attempt).await;
    let err = attempt.outcome().await.unwrap_err();

    assert!(matches!(err, AuthError::Network { .. }), "got {err:?}");
}

#[tokio::test]
async fn cancel_while_waiting_releases_the_port() {
    let provider = MockProvider::start(ProviderBehavior::default()).await;
    let mut coordinator =
        AuthCoordinator::with_browser(provider.config(), Arc::new(NoopBrowser::default()))
            .unwrap();

    let mut attempt = coordinator.start_login().await.unwrap();
    let redirect_uri = attempt.redirect_uri().to_string();
    assert!(coordinator.is_login_active());

    coordinator.cancel().await;

    let states = collect_states(&mut attempt).await;
    assert_eq!(states.last(), Some(&AuthState::Cancelled));
    assert_eq!(attempt.outcome().await.unwrap_err(), AuthError::Cancelled);
    assert!(!coordinator.is_login_active());
    assert!(!is_listening(&redirect_uri).await);
}

#[tokio::test]
async fn second_login_while_active_is_rejected() {
    let provider = MockProvider::start(ProviderBehavior::default()).await;
    let mut coordinator =
        AuthCoordinator::with_browser(provider.config(), Arc::new(NoopBrowser::default()))
            .unwrap();

    let _attempt = coordinator.start_login().await.unwrap();
    let err = coordinator.start_login().await.unwrap_err();
    assert_eq!(err, AuthError::LoginInProgress);
    assert_eq!(coordinator.state(), AuthState::AwaitingCode);

    coordinator.cancel().await;

    // A new attempt may begin once the previous one ended.
    let retry = coordinator.start_login().await;
    assert!(retry.is_ok());
    coordinator.cancel().await;
}

#[tokio::test]
async fn browser_failure_exposes_url_and_closes_listener() {
    let provider = MockProvider::start(ProviderBehavior::default()).await;
    let mut coordinator =
        AuthCoordinator::with_browser(provider.config(), Arc::new(FailingBrowser)).unwrap();

    let err = coordinator.start_login().await.unwrap_err();

    let AuthError::BrowserLaunchFailed { url, reason } = err else {
        panic!("expected BrowserLaunchFailed, got {err:?}");
    };
    assert!(reason.contains("no browser available"));
    let params = query_params(&url);
    assert_eq!(params["code_challenge_method"], "S256");
    assert_eq!(coordinator.state(), AuthState::Failed);
    assert!(!coordinator.is_login_active());
    assert!(!is_listening(&params["redirect_uri"]).await);
}

#[tokio::test]
async fn no_free_port_fails_before_browser_opens() {
    let provider = MockProvider::start(ProviderBehavior::default()).await;
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let config = bot_launcher::config::AuthConfig {
        candidate_ports: vec![taken.local_addr().unwrap().port()],
        ..provider.config()
    };
    let browser = Arc::new(NoopBrowser::default());
    let mut coordinator = AuthCoordinator::with_browser(config, browser.clone()).unwrap();

    let err = coordinator.start_login().await.unwrap_err();

    assert!(matches!(err, AuthError::PortUnavailable { .. }));
    assert_eq!(coordinator.state(), AuthState::Failed);
    assert!(browser.opened.lock().unwrap().is_none());
}

#[tokio::test]
async fn subscribers_see_the_latest_state() {
    let provider = MockProvider::start(ProviderBehavior::default()).await;
    let mut coordinator = AuthCoordinator::with_browser(
        provider.config(),
        Arc::new(FollowRedirectBrowser::default()),
    )
    .unwrap();
    let mut latest = coordinator.subscribe();

    let attempt = coordinator.start_login().await.unwrap();
    attempt.outcome().await.unwrap();

    tokio::time::timeout(
        Duration::from_secs(5),
        latest.wait_for(|state| *state == AuthState::Authenticated),
    )
    .await
    .unwrap()
    .unwrap();
}
