//! Browser delegate
//!
//! Opening the authorization URL is handed off to whatever owns the
//! terminal. Failure to launch a browser is not fatal: the URL is also shown
//! so the operator can open it by hand while the listener waits.

use reqwest::Url;
use tracing::debug;

use crate::error::{Error, Result};

/// Opens the authorization URL for the operator.
pub trait BrowserOpener: Send + Sync {
    fn open(&self, url: &Url) -> Result<()>;
}

/// Prints the URL to stderr and launches the system's default browser.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBrowser;

impl BrowserOpener for SystemBrowser {
    fn open(&self, url: &Url) -> Result<()> {
        eprintln!("Opening your browser to sign in. If it does not open, visit:\n\n  {url}\n");
        debug!("launching system browser");
        // Detached: some launchers only return once the browser exits
        open::that_detached(url.as_str()).map_err(|e| Error::Browser(e.to_string()))
    }
}
