//! Per-process authentication settings
//!
//! Which identity instance to talk to is decided outside this crate (the CLI
//! reads it from config and environment). Everything downstream of that
//! choice, the OAuth root, the identity client id and the audience client
//! ids, is derived here.

use std::time::Duration;

use crate::constants::{
    CALLBACK_PORT, CALLBACK_TIMEOUT, CLIENT_ID, CLIENT_ID_DEV, EMPLOYEE_SCOPE, LOCAL_AUTH_URL,
    OPENID_SCOPE, PRODUCTION_AUTH_URL,
};

/// Identity instance the CLI authenticates against.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum IdentityEnvironment {
    #[default]
    Production,
    /// Identity service running on the developer's machine
    Local,
    /// Identity service inside a spin workspace reachable at `host`
    Spin { host: String },
}

impl IdentityEnvironment {
    /// Local and spin instances use the development client ids.
    pub fn is_development(&self) -> bool {
        !matches!(self, Self::Production)
    }

    /// OAuth root (`/authorize` and `/token` live under it).
    pub fn auth_url(&self) -> String {
        match self {
            Self::Production => PRODUCTION_AUTH_URL.to_owned(),
            Self::Local => LOCAL_AUTH_URL.to_owned(),
            Self::Spin { host } => format!("https://identity.{host}/oauth"),
        }
    }

    /// Identity client id for this instance.
    pub fn client_id(&self) -> &'static str {
        if self.is_development() {
            CLIENT_ID_DEV
        } else {
            CLIENT_ID
        }
    }
}

/// Settings for one `Authenticator`.
///
/// `callback_port` and `callback_timeout` default to the fixed values the
/// provider allowlist and the interactive flow expect. Tests override them
/// to bind an ephemeral port and wait briefly.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub environment: IdentityEnvironment,
    /// OAuth root without trailing slash
    pub auth_url: String,
    /// Identity client id sent on every token request
    pub client_id: String,
    pub callback_port: u16,
    pub callback_timeout: Duration,
    /// Operator is acting as a staff member (adds the `employee` scope)
    pub staff: bool,
}

impl AuthSettings {
    pub fn for_environment(environment: IdentityEnvironment) -> Self {
        Self {
            auth_url: environment.auth_url(),
            client_id: environment.client_id().to_owned(),
            environment,
            callback_port: CALLBACK_PORT,
            callback_timeout: CALLBACK_TIMEOUT,
            staff: false,
        }
    }

    /// Point at a different OAuth root, keeping the environment's client ids.
    pub fn with_auth_url(mut self, auth_url: impl Into<String>) -> Self {
        self.auth_url = auth_url.into().trim_end_matches('/').to_owned();
        self
    }

    pub fn with_staff(mut self, staff: bool) -> Self {
        self.staff = staff;
        self
    }

    pub fn authorize_endpoint(&self) -> String {
        format!("{}/authorize", self.auth_url)
    }

    pub fn token_endpoint(&self) -> String {
        format!("{}/token", self.auth_url)
    }

    /// Space-separated scope string: `openid`, the requested scopes, then
    /// `employee` for staff operators.
    pub fn scope_string<'a>(&self, requested: impl IntoIterator<Item = &'a str>) -> String {
        let mut scopes = vec![OPENID_SCOPE];
        scopes.extend(requested);
        if self.staff {
            scopes.push(EMPLOYEE_SCOPE);
        }
        scopes.join(" ")
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self::for_environment(IdentityEnvironment::Production)
    }
}
