//! In-process fakes for the identity provider and the operator's browser.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Form, Json};
use reqwest::Url;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::browser::BrowserOpener;
use crate::error::Result;

pub type FormFields = HashMap<String, String>;

/// Mock token endpoint at `/oauth/token` that records every form it receives
/// and answers with whatever `responder` returns for it.
pub struct MockProvider {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<FormFields>>>,
    server: JoinHandle<()>,
}

impl MockProvider {
    pub async fn start<F>(responder: F) -> Self
    where
        F: Fn(&FormFields) -> (StatusCode, serde_json::Value) + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = requests.clone();
        let responder = Arc::new(responder);

        let app = Router::new().route(
            "/oauth/token",
            post(move |Form(form): Form<FormFields>| {
                let recorded = recorded.clone();
                let responder = responder.clone();
                async move {
                    let (status, body) = responder(&form);
                    recorded.lock().unwrap().push(form);
                    (status, Json(body))
                }
            }),
        );

        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            requests,
            server,
        }
    }

    pub fn auth_url(&self) -> String {
        format!("http://{}/oauth", self.addr)
    }

    pub fn token_endpoint(&self) -> String {
        format!("{}/token", self.auth_url())
    }

    pub fn requests(&self) -> Vec<FormFields> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_with_grant(&self, grant_type: &str) -> Vec<FormFields> {
        self.requests()
            .into_iter()
            .filter(|form| form.get("grant_type").map(String::as_str) == Some(grant_type))
            .collect()
    }
}

impl Drop for MockProvider {
    fn drop(&mut self) {
        self.server.abort();
    }
}

type Reply = Box<dyn Fn(&str) -> String + Send + Sync>;

/// Browser stand-in. Records every URL it is asked to open and, when given
/// a reply, immediately follows the redirect with the query the reply
/// builds from the request's `state`.
pub struct FakeBrowser {
    reply: Option<Reply>,
    opened: Mutex<Vec<Url>>,
}

impl FakeBrowser {
    /// Never calls back, as if the operator walked away.
    pub fn silent() -> Arc<Self> {
        Arc::new(Self {
            reply: None,
            opened: Mutex::new(Vec::new()),
        })
    }

    pub fn replying(reply: impl Fn(&str) -> String + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            reply: Some(Box::new(reply)),
            opened: Mutex::new(Vec::new()),
        })
    }

    /// Approves the request, redirecting with `code` and the correct state.
    pub fn approving(code: &'static str) -> Arc<Self> {
        Self::replying(move |state| format!("code={code}&state={state}"))
    }

    pub fn opened(&self) -> Vec<Url> {
        self.opened.lock().unwrap().clone()
    }
}

impl BrowserOpener for FakeBrowser {
    fn open(&self, url: &Url) -> Result<()> {
        self.opened.lock().unwrap().push(url.clone());
        if let Some(reply) = &self.reply {
            let params: HashMap<String, String> = url.query_pairs().into_owned().collect();
            let callback = format!("{}/?{}", params["redirect_uri"], reply(&params["state"]));
            tokio::spawn(async move {
                let _ = reqwest::get(callback).await;
            });
        }
        Ok(())
    }
}
