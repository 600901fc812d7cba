//! Identity authentication for the command-line tool
//!
//! Signs the operator in with the OAuth2 authorization code flow (PKCE,
//! loopback redirect), derives a scoped access token for every downstream
//! audience through token exchange, and renews both across invocations.
//! The library has no dependency on the CLI binary; the credential store
//! and the browser are injected.
//!
//! Sign-in flow:
//! 1. `Authenticator::authenticate()` tries to renew stored credentials
//! 2. Otherwise a `pkce::AuthSession` is created and a
//!    `callback::CallbackListener` bound on 127.0.0.1
//! 3. The authorization URL is handed to a `browser::BrowserOpener`
//! 4. The callback's code goes to `token::TokenClient::exchange_code()`
//! 5. `Authenticator::request_exchange_tokens()` derives audience tokens
//! 6. Everything is persisted through `store::CredentialStore`

pub mod audience;
pub mod browser;
pub mod callback;
pub mod constants;
pub mod error;
pub mod orchestrator;
pub mod pkce;
pub mod settings;
pub mod store;
pub mod token;

#[cfg(test)]
mod test_support;

pub use audience::{Audience, AudienceRegistry};
pub use browser::{BrowserOpener, SystemBrowser};
pub use callback::{CallbackListener, CallbackResult};
pub use error::{Error, Result};
pub use orchestrator::{AuthOutcome, Authenticator, delete_all_tokens};
pub use pkce::{AuthSession, compute_challenge, generate_state, generate_verifier};
pub use settings::{AuthSettings, IdentityEnvironment};
pub use store::{CredentialStore, FileStore, MemoryStore};
pub use token::{ExchangeRequest, ExchangeTokenResponse, TokenClient, TokenResponse};
