//! Identity CLI
//!
//! Thin command-line front end over `identity-auth`:
//! - `login`  renew stored credentials, or sign in through the browser
//! - `reauth` renew stored credentials, never opening a browser
//! - `logout` delete stored identity and exchange tokens
//! - `status` list which credentials are stored (never their values)

mod config;

use std::sync::Arc;

use anyhow::{Context, Result};
use identity_auth::{
    AudienceRegistry, AuthOutcome, Authenticator, FileStore, SystemBrowser, constants,
};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

const USER_AGENT: &str = concat!("identity-cli/", env!("CARGO_PKG_VERSION"));

const USAGE: &str = "usage: identity-cli [--config <path>] <login|reauth|logout|status>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Login,
    Reauth,
    Logout,
    Status,
    Help,
}

/// Parse `[--config <path>] <command>` from the raw argument list
/// (program name first). Returns the config path and the command.
fn parse_args(args: &[String]) -> Result<(Option<&str>, Command)> {
    let mut config_path = None;
    let mut command = None;
    let mut rest = args.iter().skip(1);

    while let Some(arg) = rest.next() {
        match arg.as_str() {
            "--config" => {
                let path = rest.next().context("--config needs a path")?;
                config_path = Some(path.as_str());
            }
            "-h" | "--help" | "help" => return Ok((config_path, Command::Help)),
            name if command.is_none() => {
                command = Some(match name {
                    "login" => Command::Login,
                    "reauth" => Command::Reauth,
                    "logout" => Command::Logout,
                    "status" => Command::Status,
                    other => anyhow::bail!("unknown command {other:?}\n{USAGE}"),
                });
            }
            other => anyhow::bail!("unexpected argument {other:?}\n{USAGE}"),
        }
    }

    Ok((config_path, command.unwrap_or(Command::Help)))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("LOG_LEVEL")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args: Vec<String> = std::env::args().collect();
    let (cli_config_path, command) = parse_args(&args)?;
    if command == Command::Help {
        println!("{USAGE}");
        return Ok(());
    }

    let config_path = Config::resolve_path(cli_config_path);
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    let settings = config.auth_settings()?;
    info!(
        environment = ?settings.environment,
        auth_url = %settings.auth_url,
        "configuration loaded"
    );

    let store_path = config.store_path();
    let store = Arc::new(
        FileStore::load(store_path.clone())
            .await
            .with_context(|| format!("failed to open credential store {}", store_path.display()))?,
    );
    let audiences = AudienceRegistry::reference();

    if command == Command::Status {
        print_status(&store, &audiences).await;
        return Ok(());
    }

    let http = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .context("failed to build HTTP client")?;
    let authenticator = Authenticator::new(
        settings,
        audiences,
        store,
        http,
        Arc::new(SystemBrowser),
    );

    match command {
        Command::Login => {
            let outcome = authenticator.authenticate().await?;
            println!("{}", outcome_message(outcome));
        }
        Command::Reauth => {
            let outcome = authenticator.reauthenticate().await?;
            println!("{}", outcome_message(outcome));
        }
        Command::Logout => {
            authenticator.revoke().await?;
            println!("Signed out.");
        }
        Command::Status | Command::Help => {}
    }

    Ok(())
}

fn outcome_message(outcome: AuthOutcome) -> &'static str {
    match outcome {
        AuthOutcome::ReusedExchangeTokens => "Session renewed.",
        AuthOutcome::Refreshed => "Session refreshed.",
        AuthOutcome::SignedIn => "Signed in.",
    }
}

async fn print_status(store: &FileStore, audiences: &AudienceRegistry) {
    let keys = store.keys().await;
    let present = |key: &str| {
        if keys.iter().any(|k| k == key) {
            "stored"
        } else {
            "missing"
        }
    };

    println!("credentials: {}", store.path().display());
    for key in constants::IDENTITY_TOKEN_KEYS {
        println!("  {key}: {}", present(key));
    }
    for key in audiences.exchange_token_keys() {
        println!("  {key}: {}", present(key.as_str()));
    }
    println!("  {}: {}", constants::SHOP_KEY, present(constants::SHOP_KEY));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("identity-cli")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn parses_command_and_config() {
        let argv = args(&["--config", "/tmp/id.toml", "login"]);
        let (path, command) = parse_args(&argv).unwrap();
        assert_eq!(path, Some("/tmp/id.toml"));
        assert_eq!(command, Command::Login);
    }

    #[test]
    fn config_flag_may_follow_command() {
        let argv = args(&["logout", "--config", "x.toml"]);
        let (path, command) = parse_args(&argv).unwrap();
        assert_eq!(path, Some("x.toml"));
        assert_eq!(command, Command::Logout);
    }

    #[test]
    fn no_command_means_help() {
        let argv = args(&[]);
        assert_eq!(parse_args(&argv).unwrap(), (None, Command::Help));
    }

    #[test]
    fn unknown_command_is_rejected() {
        let argv = args(&["deploy"]);
        let err = parse_args(&argv).unwrap_err().to_string();
        assert!(err.contains("unknown command"), "got: {err}");
    }

    #[test]
    fn config_flag_without_value_is_rejected() {
        let argv = args(&["status", "--config"]);
        assert!(parse_args(&argv).is_err());
    }

    #[test]
    fn extra_positional_is_rejected() {
        let argv = args(&["login", "now"]);
        assert!(parse_args(&argv).is_err());
    }

    #[test]
    fn outcome_messages_differ() {
        assert_ne!(
            outcome_message(AuthOutcome::Refreshed),
            outcome_message(AuthOutcome::SignedIn)
        );
    }

    #[test]
    fn user_agent_names_the_cli() {
        assert!(USER_AGENT.starts_with("identity-cli/"));
    }
}
