use super::error::{AuthError, AuthResult};
use tracing::info;

/// Opens a login URL for the user
pub trait UrlOpener: Send + Sync {
    fn open(&self, url: &str) -> AuthResult<()>;
}

/// Hands the URL to the platform's default browser, or to a named one
#[derive(Debug, Default, Clone)]
pub struct SystemBrowser {
    app: Option<String>,
}

impl SystemBrowser {
    pub fn new(app: Option<String>) -> Self {
        Self {
            app: app.filter(|a| !a.trim().is_empty()),
        }
    }
}

impl UrlOpener for SystemBrowser {
    fn open(&self, url: &str) -> AuthResult<()> {
        match &self.app {
            Some(app) => open::with(url, app),
            None => open::that(url),
        }
        .map_err(|e| AuthError::Browser(e.to_string()))?;

        info!(%url, app = ?self.app, "opened login url in browser");
        Ok(())
    }
}

/// Leaves the URL on screen only
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBrowser;

impl UrlOpener for NoBrowser {
    fn open(&self, _url: &str) -> AuthResult<()> {
        Ok(())
    }
}
