//! Loopback listener for the authorization redirect
//!
//! Binds `127.0.0.1:<port>`, serves in a background task, and hands the first
//! request to `/` to the waiting authenticator through a oneshot channel.
//! The listener never stops itself: `wait` consumes the handle and always
//! shuts the server down gracefully (so the browser's response is flushed)
//! before returning. Dropping the server handle signals shutdown on
//! early-return paths.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use common::Secret;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::constants::redirect_uri;
use crate::error::{Error, Result};

/// How long shutdown waits for in-flight responses before aborting the server.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

const COMPLETE_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Authentication complete</title></head>
<body style="font-family: system-ui; text-align: center; padding-top: 80px;">
<h2>Authentication complete</h2>
<p>You can close this tab and return to the terminal.</p>
</body>
</html>"#;

const FAILED_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Authentication failed</title></head>
<body style="font-family: system-ui; text-align: center; padding-top: 80px;">
<h2>Authentication failed</h2>
<p>This sign-in link does not belong to the running command. Return to the terminal and try again.</p>
</body>
</html>"#;

/// Parameters delivered by the provider's redirect.
#[derive(Debug, Default)]
pub struct CallbackResult {
    pub code: Option<Secret<String>>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackResult {
    /// Authorization code, or the provider's error.
    pub fn into_code(self) -> Result<Secret<String>> {
        if let Some(error) = self.error {
            return Err(Error::Provider(self.error_description.unwrap_or(error)));
        }
        self.code.ok_or(Error::MissingCode)
    }
}

type ResultSender = oneshot::Sender<Result<CallbackResult>>;

#[derive(Clone)]
struct CallbackState {
    expected_state: Arc<Secret<String>>,
    sender: Arc<Mutex<Option<ResultSender>>>,
}

/// Running single-use callback server.
pub struct CallbackListener {
    addr: SocketAddr,
    result_rx: oneshot::Receiver<Result<CallbackResult>>,
    server: ServerHandle,
}

/// Background serve task plus its shutdown trigger.
struct ServerHandle {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ServerHandle {
    async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
                warn!("callback listener did not drain in time, aborting");
                task.abort();
                let _ = task.await;
            }
        }
        debug!(addr = %self.addr, "callback listener stopped");
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl CallbackListener {
    /// Bind the loopback port and start serving in the background.
    ///
    /// Fails immediately if the port is taken (another sign-in attempt, or
    /// another program); attempts never queue behind each other.
    pub async fn start(port: u16, expected_state: Secret<String>) -> Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port))
            .await
            .map_err(|e| {
                Error::CallbackBind(format!(
                    "port {port} on 127.0.0.1 is unavailable ({e}); is another sign-in running?"
                ))
            })?;
        let addr = listener
            .local_addr()
            .map_err(|e| Error::CallbackBind(format!("reading bound address: {e}")))?;

        let (result_tx, result_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let app = router(CallbackState {
            expected_state: Arc::new(expected_state),
            sender: Arc::new(Mutex::new(Some(result_tx))),
        });

        let server = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = served {
                warn!(error = %e, "callback listener stopped with error");
            }
        });

        debug!(%addr, "callback listener started");
        Ok(Self {
            addr,
            result_rx,
            server: ServerHandle {
                addr,
                shutdown_tx: Some(shutdown_tx),
                task: Some(server),
            },
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Redirect URI pointing at this listener.
    pub fn redirect_uri(&self) -> String {
        redirect_uri(self.addr.port())
    }

    /// Wait up to `timeout` for the callback, then stop the server.
    ///
    /// The port is released before this returns, whatever the outcome.
    pub async fn wait(self, timeout: Duration) -> Result<CallbackResult> {
        let Self {
            result_rx, server, ..
        } = self;
        let outcome = match tokio::time::timeout(timeout, result_rx).await {
            Ok(Ok(result)) => result,
            // Sender dropped without a result: the server task died.
            Ok(Err(_)) => Err(Error::CallbackBind(
                "callback listener stopped before a callback arrived".into(),
            )),
            Err(_) => Err(Error::Timeout(timeout)),
        };
        server.shutdown().await;
        outcome
    }
}

fn router(state: CallbackState) -> Router {
    Router::new()
        .route("/", get(handle_callback))
        .with_state(state)
}

/// GET / — the provider's redirect.
///
/// Only the first request resolves the waiting attempt; later ones (a
/// reload, a second tab) just get the page.
async fn handle_callback(
    State(state): State<CallbackState>,
    Query(query): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let state_matches = query
        .get("state")
        .is_some_and(|s| s == state.expected_state.expose());

    let result = if state_matches {
        Ok(CallbackResult {
            code: query.get("code").cloned().map(Secret::new),
            error: query.get("error").cloned(),
            error_description: query.get("error_description").cloned(),
        })
    } else {
        warn!("callback state does not match this sign-in attempt");
        Err(Error::StateMismatch)
    };

    match state.sender.lock().await.take() {
        Some(sender) => {
            let _ = sender.send(result);
        }
        None => debug!("ignoring repeated callback request"),
    }

    if state_matches {
        (StatusCode::OK, Html(COMPLETE_PAGE))
    } else {
        (StatusCode::BAD_REQUEST, Html(FAILED_PAGE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn start(state: &str) -> CallbackListener {
        CallbackListener::start(0, Secret::new(state.to_owned()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn delivers_code_for_matching_state() {
        let listener = start("state-1").await;
        let url = format!("{}/?code=abc123&state=state-1", listener.redirect_uri());

        let browser = tokio::spawn(async move { reqwest::get(url).await.unwrap() });
        let result = listener.wait(Duration::from_secs(5)).await.unwrap();
        assert_eq!(result.into_code().unwrap().expose(), "abc123");

        let response = browser.await.unwrap();
        assert_eq!(response.status(), 200);
        assert!(
            response
                .text()
                .await
                .unwrap()
                .contains("Authentication complete")
        );
    }

    #[tokio::test]
    async fn mismatched_state_unblocks_with_state_mismatch() {
        let listener = start("expected").await;
        let url = format!("{}/?code=abc123&state=forged", listener.redirect_uri());

        let browser = tokio::spawn(async move { reqwest::get(url).await.unwrap() });
        let started = std::time::Instant::now();
        let err = listener.wait(Duration::from_secs(30)).await.unwrap_err();
        assert!(matches!(err, Error::StateMismatch), "got: {err:?}");
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(browser.await.unwrap().status(), 400);
    }

    #[tokio::test]
    async fn missing_state_counts_as_mismatch() {
        let listener = start("expected").await;
        let url = format!("{}/?code=abc123", listener.redirect_uri());

        tokio::spawn(async move { reqwest::get(url).await });
        let err = listener.wait(Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, Error::StateMismatch));
    }

    #[tokio::test]
    async fn provider_error_is_delivered() {
        let listener = start("s").await;
        let url = format!(
            "{}/?error=access_denied&error_description=User%20declined&state=s",
            listener.redirect_uri()
        );

        tokio::spawn(async move { reqwest::get(url).await });
        let result = listener.wait(Duration::from_secs(5)).await.unwrap();
        let err = result.into_code().unwrap_err();
        assert!(matches!(err, Error::Provider(ref d) if d == "User declined"));
    }

    #[tokio::test]
    async fn times_out_and_releases_port() {
        let listener = start("s").await;
        let port = listener.local_addr().port();

        let err = listener.wait(Duration::from_millis(100)).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));

        // Port is free again for the next attempt
        let again = CallbackListener::start(port, Secret::new("s2".into()))
            .await
            .unwrap();
        drop(again);
    }

    #[tokio::test]
    async fn dropped_listener_stops_serving() {
        let listener = start("s").await;
        let port = listener.local_addr().port();
        drop(listener);

        let mut rebound = None;
        for _ in 0..50 {
            if let Ok(again) = CallbackListener::start(port, Secret::new("s2".into())).await {
                rebound = Some(again);
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(rebound.is_some(), "port {port} was never released");
    }

    #[tokio::test]
    async fn second_bind_on_same_port_fails_fast() {
        let first = start("s").await;
        let port = first.local_addr().port();

        let second = CallbackListener::start(port, Secret::new("other".into())).await;
        assert!(matches!(second, Err(Error::CallbackBind(_))));
        drop(first);
    }

    #[tokio::test]
    async fn other_paths_do_not_resolve_the_wait() {
        let listener = start("s").await;
        let base = listener.redirect_uri();

        let favicon = reqwest::get(format!("{base}/favicon.ico")).await.unwrap();
        assert_eq!(favicon.status(), 404);

        let url = format!("{base}/?code=c1&state=s");
        tokio::spawn(async move { reqwest::get(url).await });
        let result = listener.wait(Duration::from_secs(5)).await.unwrap();
        assert_eq!(result.into_code().unwrap().expose(), "c1");
    }

    #[test]
    fn callback_without_code_or_error_is_missing_code() {
        let err = CallbackResult::default().into_code().unwrap_err();
        assert!(matches!(err, Error::MissingCode));
    }
}
