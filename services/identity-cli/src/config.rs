//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults. The
//! config file is optional; a missing file means every default applies.

use std::path::{Path, PathBuf};

use identity_auth::{AuthSettings, IdentityEnvironment};
use serde::Deserialize;

/// Root configuration
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

/// Which identity instance to sign in against
#[derive(Debug, Default, Deserialize)]
pub struct IdentityConfig {
    /// "production", "local" or "spin"
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Host of the spin workspace, required for the "spin" environment
    #[serde(default)]
    pub spin_host: Option<String>,
    /// OAuth root override
    #[serde(default)]
    pub auth_url: Option<String>,
    /// Request the staff-only `employee` scope
    #[serde(default)]
    pub staff: bool,
}

/// Credential store location
#[derive(Debug, Default, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_environment() -> String {
    "production".into()
}

impl Config {
    /// Load configuration from `path` if it exists, then overlay environment
    /// variables and validate.
    pub fn load(path: &Path) -> common::Result<Self> {
        let mut config: Config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str(&contents)?
        } else {
            Config::default()
        };
        if config.identity.environment.is_empty() {
            config.identity.environment = default_environment();
        }

        if let Ok(environment) = std::env::var("IDENTITY_ENVIRONMENT") {
            config.identity.environment = environment;
        }
        if let Ok(host) = std::env::var("SPIN_HOST") {
            config.identity.spin_host = Some(host);
        }
        if let Ok(url) = std::env::var("IDENTITY_AUTH_URL") {
            config.identity.auth_url = Some(url);
        }
        if let Ok(staff) = std::env::var("IDENTITY_STAFF") {
            config.identity.staff = parse_flag("IDENTITY_STAFF", &staff)?;
        }
        if let Ok(path) = std::env::var("IDENTITY_STORE_PATH") {
            config.store.path = Some(PathBuf::from(path));
        }

        if let Some(url) = &config.identity.auth_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(common::Error::Config(format!(
                    "auth_url must start with http:// or https://, got: {url}"
                )));
            }
        }
        // Fail on a bad environment name at load time, not at first use
        config.environment()?;

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("identity-cli.toml")
    }

    pub fn environment(&self) -> common::Result<IdentityEnvironment> {
        match self.identity.environment.as_str() {
            "production" => Ok(IdentityEnvironment::Production),
            "local" => Ok(IdentityEnvironment::Local),
            "spin" => match &self.identity.spin_host {
                Some(host) if !host.trim().is_empty() => Ok(IdentityEnvironment::Spin {
                    host: host.trim().to_owned(),
                }),
                _ => Err(common::Error::Config(
                    "the spin environment needs spin_host (or SPIN_HOST)".into(),
                )),
            },
            other => Err(common::Error::InvalidValue {
                key: "identity.environment".into(),
                value: other.into(),
            }),
        }
    }

    /// Authenticator settings for the configured environment.
    pub fn auth_settings(&self) -> common::Result<AuthSettings> {
        let mut settings =
            AuthSettings::for_environment(self.environment()?).with_staff(self.identity.staff);
        if let Some(url) = &self.identity.auth_url {
            settings = settings.with_auth_url(url.as_str());
        }
        Ok(settings)
    }

    /// Credential file path: configured, or under `$HOME/.config`.
    pub fn store_path(&self) -> PathBuf {
        if let Some(path) = &self.store.path {
            return path.clone();
        }
        let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_default();
        home.join(".config")
            .join("identity-cli")
            .join("credentials.json")
    }
}

fn parse_flag(key: &str, value: &str) -> common::Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" | "" => Ok(false),
        _ => Err(common::Error::InvalidValue {
            key: key.into(),
            value: value.into(),
        }),
    }
}
