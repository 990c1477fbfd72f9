//! Loopback HTTP listener that catches the OAuth redirect.

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use super::AuthError;

/// Path the provider redirects to.
pub const CALLBACK_PATH: &str = "/callback";

/// Body returned once a code has been received.
pub const CONFIRMATION_BODY: &str =
    "<html><body>Login processed. You can close this window.</body></html>";

/// How long `shutdown` waits for in-flight connections before aborting.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Single-use slot for the captured code. The handler is the only writer.
#[derive(Clone)]
struct CallbackState {
    code_tx: Arc<Mutex<Option<oneshot::Sender<String>>>>,
}

impl CallbackState {
    fn capture(&self, code: String) {
        let sender = match self.code_tx.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        match sender {
            Some(tx) => {
                tracing::debug!("Authorization code captured");
                // The receiver may already be gone after a cancel.
                let _ = tx.send(code);
            }
            None => tracing::debug!("Ignoring repeated callback"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: Option<String>,
}

async fn handle_callback(
    State(state): State<CallbackState>,
    Query(params): Query<CallbackParams>,
) -> Response {
    match params.code.filter(|code| !code.is_empty()) {
        Some(code) => {
            state.capture(code);
            (StatusCode::OK, Html(CONFIRMATION_BODY)).into_response()
        }
        None => StatusCode::BAD_REQUEST.into_response(),
    }
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

fn build_router(state: CallbackState) -> Router {
    Router::new()
        .route(CALLBACK_PATH, get(handle_callback).fallback(not_found))
        .fallback(not_found)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Bind the first free port on 127.0.0.1 from `candidates`, in order.
async fn bind_first(candidates: &[u16]) -> Result<TcpListener, AuthError> {
    for &port in candidates {
        match TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await {
            Ok(listener) => return Ok(listener),
            Err(e) => tracing::debug!(port, error = %e, "Callback port unavailable"),
        }
    }
    Err(AuthError::PortUnavailable {
        ports: candidates.to_vec(),
    })
}

/// A running callback listener.
///
/// Dropping the server signals shutdown; call [`CallbackServer::shutdown`]
/// to also wait for the listener to close.
#[derive(Debug)]
pub struct CallbackServer {
    port: u16,
    code_rx: Option<oneshot::Receiver<String>>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl CallbackServer {
    /// Bind to the first available candidate port and start serving.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::PortUnavailable` if every candidate is taken.
    pub async fn start(candidate_ports: &[u16]) -> Result<Self, AuthError> {
        let listener = bind_first(candidate_ports).await?;
        let port = listener
            .local_addr()
            .map_err(|_| AuthError::PortUnavailable {
                ports: candidate_ports.to_vec(),
            })?
            .port();

        let (code_tx, code_rx) = oneshot::channel();
        let router = build_router(CallbackState {
            code_tx: Arc::new(Mutex::new(Some(code_tx))),
        });

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let task = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await;
            if let Err(e) = result {
                tracing::warn!(error = %e, "Callback server stopped with error");
            }
        });

        tracing::info!(port, "Callback server listening");

        Ok(Self {
            port,
            code_rx: Some(code_rx),
            shutdown,
            task: Some(task),
        })
    }

    /// The port actually bound.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The redirect URI the provider must be given.
    #[must_use]
    pub fn redirect_uri(&self) -> String {
        format!("http://127.0.0.1:{}{CALLBACK_PATH}", self.port)
    }

    /// Take the receiving end for the captured code.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_code_receiver(&mut self) -> Option<oneshot::Receiver<String>> {
        self.code_rx.take()
    }

    /// Whether the listener task is still alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop accepting connections and wait for the listener to close.
    ///
    /// Safe to call more than once, and before any request arrived.
    pub async fn shutdown(&mut self) {
        self.shutdown.cancel();
        let Some(mut task) = self.task.take() else {
            return;
        };
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
            tracing::warn!(port = self.port, "Callback server did not drain, aborting");
            task.abort();
        }
        tracing::info!(port = self.port, "Callback server stopped");
    }
}

impl Drop for CallbackServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
