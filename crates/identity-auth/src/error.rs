//! Error types for identity authentication
//!
//! Display strings double as the user-facing abort messages printed by the
//! CLI, so they are written for the operator rather than the developer.

use std::time::Duration;

/// Errors from authentication and token lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// Non-success response from the token endpoint
    #[error("token request failed: {0}")]
    TokenRequest(String),

    /// Provider rejected the shop-scoped destination. Carries the stored shop
    /// once the authenticator has cleared it; `None` straight from the token
    /// endpoint, or when no shop was stored.
    #[error("{}", invalid_destination_message(.0.as_deref()))]
    InvalidDestination(Option<String>),

    #[error("timed out after {}s waiting for the browser to complete sign-in", .0.as_secs())]
    Timeout(Duration),

    /// Provider redirected back with an `error` parameter
    #[error("sign-in was rejected by the identity provider: {0}")]
    Provider(String),

    #[error("sign-in callback did not match this attempt (state mismatch), start sign-in again")]
    StateMismatch,

    #[error("sign-in callback carried neither a code nor an error")]
    MissingCode,

    #[error("could not start the sign-in callback listener: {0}")]
    CallbackBind(String),

    #[error("your session could not be refreshed, please sign in again")]
    ReauthenticationRequired,

    #[error("no identity access token is stored, sign in first")]
    NotSignedIn,

    #[error("credential store error: {0}")]
    Store(String),

    #[error("could not open a browser: {0}")]
    Browser(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;

fn invalid_destination_message(shop: Option<&str>) -> String {
    match shop {
        Some(shop) => format!(
            "the shop {shop} is not available to your account, select a different shop and try again"
        ),
        None => String::from(
            "the identity provider rejected the selected shop, select a different shop and try again",
        ),
    }
}
