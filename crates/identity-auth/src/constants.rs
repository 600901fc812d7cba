//! Identity provider constants
//!
//! Public client identifiers, endpoint roots and credential store keys. None
//! of these are secrets; the tokens themselves only ever live in the store.

use std::time::Duration;

/// Identity client id used for production sign-in
pub const CLIENT_ID: &str = "fbdb2649-e327-4907-8f67-908d24cfd7e3";

/// Identity client id used against local and spin identity instances
pub const CLIENT_ID_DEV: &str = "e5380e02-312a-7408-5718-e07017e9cf52";

/// OAuth root for production sign-in
pub const PRODUCTION_AUTH_URL: &str = "https://accounts.shopify.com/oauth";

/// OAuth root for a locally running identity service
pub const LOCAL_AUTH_URL: &str = "https://identity.myshopify.io/oauth";

/// Loopback port registered in the provider's redirect URI allowlist.
/// Must match the allowlist exactly, so it is not configurable per run.
pub const CALLBACK_PORT: u16 = 3456;

/// How long the browser round trip may take before the attempt is abandoned.
pub const CALLBACK_TIMEOUT: Duration = Duration::from_secs(240);

/// Scope requested on every authorization and exchange request
pub const OPENID_SCOPE: &str = "openid";

/// Extra scope requested when the operator acts as a staff member
pub const EMPLOYEE_SCOPE: &str = "employee";

pub const GRANT_AUTHORIZATION_CODE: &str = "authorization_code";
pub const GRANT_REFRESH_TOKEN: &str = "refresh_token";
pub const GRANT_TOKEN_EXCHANGE: &str = "urn:ietf:params:oauth:grant-type:token-exchange";
pub const TOKEN_TYPE_ACCESS_TOKEN: &str = "urn:ietf:params:oauth:token-type:access_token";

/// Store key for the primary identity access token
pub const IDENTITY_ACCESS_TOKEN: &str = "identity_access_token";

/// Store key for the primary identity refresh token
pub const IDENTITY_REFRESH_TOKEN: &str = "identity_refresh_token";

/// Both primary token keys. Always written and deleted together.
pub const IDENTITY_TOKEN_KEYS: [&str; 2] = [IDENTITY_ACCESS_TOKEN, IDENTITY_REFRESH_TOKEN];

/// Store key holding the selected shop domain. Owned by other commands;
/// this crate only reads it and deletes it when the provider rejects it.
pub const SHOP_KEY: &str = "shop";

/// Redirect URI for a callback listener bound to `port` on loopback.
pub fn redirect_uri(port: u16) -> String {
    format!("http://127.0.0.1:{port}")
}
