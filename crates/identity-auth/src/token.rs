//! Token endpoint client
//!
//! Handles the three token endpoint interactions, all form-encoded POSTs to
//! `{auth_url}/token` answered with JSON:
//! 1. Authorization code exchange (interactive sign-in completion)
//! 2. Refresh of the primary identity tokens
//! 3. Token exchange of the identity access token for an audience token
//!
//! Non-success responses are mapped to `Error::TokenRequest` carrying the
//! provider's `error_description`, or to `Error::InvalidDestination` when
//! that description is about the `destination` hint. The client does not
//! know which shop is stored; the authenticator fills that in.

use common::Secret;
use serde::Deserialize;
use tracing::debug;

use crate::constants::{
    GRANT_AUTHORIZATION_CODE, GRANT_REFRESH_TOKEN, GRANT_TOKEN_EXCHANGE, TOKEN_TYPE_ACCESS_TOKEN,
};
use crate::error::{Error, Result};

/// Primary identity tokens returned by code exchange and refresh.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: Secret<String>,
    pub refresh_token: Secret<String>,
}

/// Audience token returned by a token exchange.
#[derive(Debug, Deserialize)]
pub struct ExchangeTokenResponse {
    pub access_token: Secret<String>,
}

/// Error body the provider sends with non-success statuses.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// Parameters of one token-exchange request.
#[derive(Debug)]
pub struct ExchangeRequest<'a> {
    /// Current identity access token
    pub subject_token: &'a str,
    /// Identity client id
    pub client_id: &'a str,
    /// Audience client id
    pub audience: &'a str,
    /// Space-separated scope string
    pub scope: &'a str,
    /// Provider-specific tenant hint, sent only when present
    pub destination: Option<&'a str>,
}

/// Client for the provider's token endpoint.
#[derive(Debug, Clone)]
pub struct TokenClient {
    http: reqwest::Client,
    token_endpoint: String,
}

impl TokenClient {
    pub fn new(http: reqwest::Client, token_endpoint: impl Into<String>) -> Self {
        Self {
            http,
            token_endpoint: token_endpoint.into(),
        }
    }

    pub fn token_endpoint(&self) -> &str {
        &self.token_endpoint
    }

    /// Exchange an authorization code for the primary tokens.
    ///
    /// `verifier` proves this process started the flow the code belongs to;
    /// `redirect_uri` must equal the one sent in the authorization request.
    pub async fn exchange_code(
        &self,
        code: &str,
        verifier: &str,
        client_id: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse> {
        self.post(&[
            ("grant_type", GRANT_AUTHORIZATION_CODE),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", client_id),
            ("code_verifier", verifier),
        ])
        .await
    }

    /// Refresh the primary tokens. The provider expects the current access
    /// token alongside the refresh token.
    pub async fn refresh(
        &self,
        access_token: &str,
        refresh_token: &str,
        client_id: &str,
    ) -> Result<TokenResponse> {
        self.post(&[
            ("grant_type", GRANT_REFRESH_TOKEN),
            ("access_token", access_token),
            ("refresh_token", refresh_token),
            ("client_id", client_id),
        ])
        .await
    }

    /// Derive an audience-scoped access token from the identity access token.
    pub async fn exchange_token(&self, request: &ExchangeRequest<'_>) -> Result<ExchangeTokenResponse> {
        let mut params = vec![
            ("grant_type", GRANT_TOKEN_EXCHANGE),
            ("requested_token_type", TOKEN_TYPE_ACCESS_TOKEN),
            ("subject_token_type", TOKEN_TYPE_ACCESS_TOKEN),
            ("client_id", request.client_id),
            ("audience", request.audience),
            ("scope", request.scope),
            ("subject_token", request.subject_token),
        ];
        if let Some(destination) = request.destination {
            params.push(("destination", destination));
        }
        self.post(&params).await
    }

    async fn post<T: serde::de::DeserializeOwned>(&self, params: &[(&str, &str)]) -> Result<T> {
        let grant_type = params
            .iter()
            .find(|(k, _)| *k == "grant_type")
            .map(|(_, v)| *v)
            .unwrap_or_default();
        debug!(grant_type, endpoint = %self.token_endpoint, "token request");

        let response = self
            .http
            .post(&self.token_endpoint)
            .form(params)
            .send()
            .await
            .map_err(|e| Error::Http(format!("token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            return Err(classify_error(status, &body));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| Error::TokenRequest(format!("invalid token response: {e}")))
    }
}

/// Map a non-success token endpoint response to an error.
///
/// Any description mentioning `destination` means the provider refused the
/// shop, whichever grant was requested; that case gets its own variant so the
/// caller can clear the stored shop instead of retrying.
fn classify_error(status: reqwest::StatusCode, body: &str) -> Error {
    let description = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error_description.or(b.error));

    match description {
        Some(description) if description.contains("destination") => {
            debug!(%description, "token endpoint refused the destination");
            Error::InvalidDestination(None)
        }
        Some(description) => Error::TokenRequest(description),
        None => Error::TokenRequest(format!("token endpoint returned {status}: {body}")),
    }
}
