//! Authentication orchestration
//!
//! `authenticate` tries the cheapest strategy first and falls through:
//! 1. Every audience already has an exchange token: re-derive them from the
//!    stored identity access token.
//! 2. Both identity tokens are stored: refresh them, then re-derive the
//!    exchange tokens.
//! 3. Interactive sign-in: PKCE session, loopback listener, browser, code
//!    exchange, then exchange tokens for every audience.
//!
//! Failures of the cached strategies delete the keys they used and fall
//! through silently. Only the last strategy's failure reaches the caller.
//! `InvalidDestination` is the exception: it always propagates, because
//! retrying cannot fix a shop the provider refuses. Every token endpoint call
//! goes through `check_destination`, which clears the stored shop on that
//! error whichever grant was refused.

use std::sync::Arc;

use common::Secret;
use reqwest::Url;
use tracing::{debug, info, warn};

use crate::audience::{Audience, AudienceRegistry};
use crate::browser::BrowserOpener;
use crate::callback::CallbackListener;
use crate::constants::{IDENTITY_ACCESS_TOKEN, IDENTITY_REFRESH_TOKEN, IDENTITY_TOKEN_KEYS, SHOP_KEY};
use crate::error::{Error, Result};
use crate::pkce::AuthSession;
use crate::settings::AuthSettings;
use crate::store::CredentialStore;
use crate::token::{ExchangeRequest, TokenClient, TokenResponse};

/// Which strategy produced usable credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Stored exchange tokens were renewed from the identity access token
    ReusedExchangeTokens,
    /// Identity tokens were refreshed and exchange tokens re-derived
    Refreshed,
    /// The operator signed in through the browser
    SignedIn,
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    CheckingCachedExchange,
    CheckingCachedAccess,
    Listening,
    AwaitingCallback,
    ExchangingCode,
    ExchangingAudiences,
}

/// Drives sign-in and token renewal against one credential store.
pub struct Authenticator {
    settings: AuthSettings,
    audiences: AudienceRegistry,
    store: Arc<dyn CredentialStore>,
    tokens: TokenClient,
    browser: Arc<dyn BrowserOpener>,
}

impl Authenticator {
    pub fn new(
        settings: AuthSettings,
        audiences: AudienceRegistry,
        store: Arc<dyn CredentialStore>,
        http: reqwest::Client,
        browser: Arc<dyn BrowserOpener>,
    ) -> Self {
        let tokens = TokenClient::new(http, settings.token_endpoint());
        Self {
            settings,
            audiences,
            store,
            tokens,
            browser,
        }
    }

    pub fn settings(&self) -> &AuthSettings {
        &self.settings
    }

    pub fn audiences(&self) -> &AudienceRegistry {
        &self.audiences
    }

    /// Make sure usable credentials are stored, signing in interactively
    /// when nothing cached can be renewed.
    pub async fn authenticate(&self) -> Result<AuthOutcome> {
        if let Some(outcome) = self.reuse_cached().await? {
            return Ok(outcome);
        }
        self.sign_in().await?;
        Ok(AuthOutcome::SignedIn)
    }

    /// Renew stored credentials without ever opening a browser.
    pub async fn reauthenticate(&self) -> Result<AuthOutcome> {
        self.reuse_cached()
            .await?
            .ok_or(Error::ReauthenticationRequired)
    }

    /// Derive a fresh token for every audience from the stored identity
    /// access token.
    ///
    /// The shop-bound audience is skipped while no shop is stored. Tokens
    /// stored before a failing audience stay stored; the first failure is
    /// returned after the remaining audiences have been tried.
    pub async fn request_exchange_tokens(&self) -> Result<()> {
        debug!(phase = ?Phase::ExchangingAudiences, "requesting exchange tokens");
        let subject = self
            .store
            .get(IDENTITY_ACCESS_TOKEN)
            .await?
            .map(Secret::new)
            .ok_or(Error::NotSignedIn)?;

        let mut failure = None;
        for audience in self.audiences.iter() {
            match self.request_exchange_token(audience, subject.expose()).await {
                Ok(()) => {}
                Err(e @ Error::InvalidDestination(_)) => return Err(e),
                Err(e) => {
                    warn!(audience = %audience.name, error = %e, "token exchange failed");
                    if failure.is_none() {
                        failure = Some(e);
                    }
                }
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Delete every identity and exchange token.
    pub async fn revoke(&self) -> Result<()> {
        delete_all_tokens(self.store.as_ref(), &self.audiences).await
    }

    /// Authorization request URL for `session`, redirecting to `redirect_uri`.
    pub fn authorization_url(&self, session: &AuthSession, redirect_uri: &str) -> Result<Url> {
        let endpoint = self.settings.authorize_endpoint();
        let mut url =
            Url::parse(&endpoint).map_err(|e| Error::InvalidUrl(format!("{endpoint}: {e}")))?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.settings.client_id)
            .append_pair(
                "scope",
                &self.settings.scope_string(self.audiences.all_scopes()),
            )
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("state", session.state().expose())
            .append_pair("response_type", "code")
            .append_pair("code_challenge", session.challenge())
            .append_pair("code_challenge_method", "S256");
        Ok(url)
    }

    async fn reuse_cached(&self) -> Result<Option<AuthOutcome>> {
        debug!(phase = ?Phase::CheckingCachedExchange, "checking stored exchange tokens");
        if self.refresh_exchange_tokens().await? {
            info!("renewed stored exchange tokens");
            return Ok(Some(AuthOutcome::ReusedExchangeTokens));
        }

        debug!(phase = ?Phase::CheckingCachedAccess, "checking stored identity tokens");
        if self.refresh_access_tokens().await? {
            info!("refreshed identity tokens");
            return Ok(Some(AuthOutcome::Refreshed));
        }

        Ok(None)
    }

    async fn refresh_exchange_tokens(&self) -> Result<bool> {
        let keys = self.audiences.exchange_token_keys();
        for key in &keys {
            if !self.store.exists(key).await? {
                return Ok(false);
            }
        }

        match self.request_exchange_tokens().await {
            Ok(()) => Ok(true),
            Err(e @ Error::InvalidDestination(_)) => Err(e),
            Err(e) => {
                warn!(error = %e, "stored exchange tokens could not be renewed, discarding them");
                let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
                self.store.delete(&keys).await?;
                Ok(false)
            }
        }
    }

    async fn refresh_access_tokens(&self) -> Result<bool> {
        let access = self.store.get(IDENTITY_ACCESS_TOKEN).await?.map(Secret::new);
        let refresh = self.store.get(IDENTITY_REFRESH_TOKEN).await?.map(Secret::new);
        let (access, refresh) = match (access, refresh) {
            (Some(access), Some(refresh)) => (access, refresh),
            (None, None) => return Ok(false),
            _ => {
                warn!("only one identity token is stored, discarding it");
                self.store.delete(&IDENTITY_TOKEN_KEYS).await?;
                return Ok(false);
            }
        };

        let refreshed = self
            .tokens
            .refresh(access.expose(), refresh.expose(), &self.settings.client_id)
            .await;
        let tokens = match self.check_destination(refreshed).await {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(error = %e, "identity token refresh failed, discarding stored tokens");
                self.store.delete(&IDENTITY_TOKEN_KEYS).await?;
                return match e {
                    Error::InvalidDestination(_) => Err(e),
                    _ => Ok(false),
                };
            }
        };
        self.store_identity_tokens(&tokens).await?;

        match self.request_exchange_tokens().await {
            Ok(()) => Ok(true),
            // The pair was just refreshed and stays usable
            Err(e @ Error::InvalidDestination(_)) => Err(e),
            Err(e) => {
                warn!(error = %e, "exchange after refresh failed, discarding stored tokens");
                self.store.delete(&IDENTITY_TOKEN_KEYS).await?;
                Ok(false)
            }
        }
    }

    async fn sign_in(&self) -> Result<()> {
        let session = AuthSession::new();

        debug!(phase = ?Phase::Listening, port = self.settings.callback_port, "starting callback listener");
        let listener =
            CallbackListener::start(self.settings.callback_port, session.state().clone()).await?;
        let redirect_uri = listener.redirect_uri();
        let url = self.authorization_url(&session, &redirect_uri)?;

        if let Err(e) = self.browser.open(&url) {
            warn!(error = %e, "browser did not open, waiting for the URL to be opened by hand");
        }

        debug!(
            phase = ?Phase::AwaitingCallback,
            timeout_secs = self.settings.callback_timeout.as_secs(),
            "waiting for browser callback"
        );
        let code = listener
            .wait(self.settings.callback_timeout)
            .await?
            .into_code()?;

        debug!(phase = ?Phase::ExchangingCode, "exchanging authorization code");
        let exchanged = self
            .tokens
            .exchange_code(
                code.expose(),
                session.verifier().expose(),
                &self.settings.client_id,
                &redirect_uri,
            )
            .await;
        let tokens = self.check_destination(exchanged).await?;
        self.store_identity_tokens(&tokens).await?;
        info!("signed in");

        self.request_exchange_tokens().await
    }

    async fn store_identity_tokens(&self, tokens: &TokenResponse) -> Result<()> {
        self.store
            .set_all(&[
                (IDENTITY_ACCESS_TOKEN, tokens.access_token.expose().as_str()),
                (IDENTITY_REFRESH_TOKEN, tokens.refresh_token.expose().as_str()),
            ])
            .await
    }

    async fn request_exchange_token(&self, audience: &Audience, subject_token: &str) -> Result<()> {
        let shop = if audience.requires_shop {
            match self.store.get(SHOP_KEY).await? {
                Some(shop) => Some(shop),
                None => {
                    debug!(audience = %audience.name, "no shop selected, skipping exchange");
                    return Ok(());
                }
            }
        } else {
            None
        };

        let destination = shop.as_ref().map(|shop| format!("https://{shop}/admin"));
        let scope = self
            .settings
            .scope_string(audience.scopes.iter().map(String::as_str));
        let request = ExchangeRequest {
            subject_token,
            client_id: &self.settings.client_id,
            audience: audience.client_id_for(&self.settings.environment),
            scope: &scope,
            destination: destination.as_deref(),
        };

        let exchanged = self.tokens.exchange_token(&request).await;
        let token = self.check_destination(exchanged).await?;
        let key = audience.exchange_token_key();
        self.store.set(&key, token.access_token.expose()).await?;
        debug!(key = %key, "stored exchange token");
        Ok(())
    }

    /// Clear the stored shop when the provider refused the destination, and
    /// name that shop in the error. Other results pass through.
    async fn check_destination<T>(&self, result: Result<T>) -> Result<T> {
        match result {
            Err(Error::InvalidDestination(_)) => {
                let shop = self.store.get(SHOP_KEY).await?;
                if shop.is_some() {
                    self.store.delete(&[SHOP_KEY]).await?;
                }
                warn!(shop = ?shop, "provider rejected the shop destination, clearing stored shop");
                Err(Error::InvalidDestination(shop))
            }
            other => other,
        }
    }
}

/// Delete the identity token pair and every audience's exchange token.
pub async fn delete_all_tokens(
    store: &dyn CredentialStore,
    audiences: &AudienceRegistry,
) -> Result<()> {
    let exchange_keys = audiences.exchange_token_keys();
    let mut keys: Vec<&str> = IDENTITY_TOKEN_KEYS.to_vec();
    keys.extend(exchange_keys.iter().map(String::as_str));
    store.delete(&keys).await?;
    info!("deleted stored identity and exchange tokens");
    Ok(())
}
