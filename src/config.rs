use crate::auth::error::{AuthError, AuthResult};
use crate::auth::transport::TransportKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

pub const ENV_SERVER_URL: &str = "ANYON_SERVER_URL";
pub const ENV_TRANSPORT: &str = "ANYON_AUTH_TRANSPORT";
pub const ENV_LOCALE: &str = "ANYON_LOCALE";
pub const ENV_BROWSER: &str = "BROWSER";

/// Settings for the Claude login bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub server_url: String,
    pub transport: TransportKind,
    /// Character budget of the live output buffer
    pub live_log_budget: usize,
    /// Maximum number of entries kept in the line log
    pub line_log_cap: usize,
    pub reconnect_delay_ms: u64,
    pub max_reconnect_attempts: u32,
    pub success_settle_ms: u64,
    pub meta_prefix: String,
    pub locale: String,
    pub success_markers: HashMap<String, Vec<String>>,
    pub login_url_hosts: Vec<String>,
    pub auto_open_login_url: bool,
    /// Browser used for login URLs instead of the system default
    pub browser: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        let mut success_markers = HashMap::new();
        success_markers.insert(
            "ko".to_string(),
            vec!["로그인 성공".to_string(), "Credential이 저장".to_string()],
        );
        success_markers.insert(
            "en".to_string(),
            vec![
                "Login successful".to_string(),
                "Credentials saved".to_string(),
            ],
        );

        Self {
            server_url: "http://127.0.0.1:3001".to_string(),
            transport: TransportKind::PtySocket,
            live_log_budget: 8000,
            line_log_cap: 400,
            reconnect_delay_ms: 1000,
            max_reconnect_attempts: 1,
            success_settle_ms: 500,
            meta_prefix: "__CLAUDE_META__:".to_string(),
            locale: "ko".to_string(),
            success_markers,
            login_url_hosts: vec![
                "claude.ai".to_string(),
                "console.anthropic.com".to_string(),
                "auth.anthropic.com".to_string(),
            ],
            auto_open_login_url: true,
            browser: None,
            request_timeout_secs: 30,
        }
    }
}

impl BridgeConfig {
    /// `$CONFIG_DIR/anyon/auth.toml`, when a config directory exists
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("anyon").join("auth.toml"))
    }

    /// Reads the TOML file (explicit path, or the default one when present),
    /// then applies environment overrides and validates the result.
    pub fn load(path: Option<&Path>) -> AuthResult<Self> {
        let candidate = match path {
            Some(p) => Some(p.to_path_buf()),
            None => Self::default_path().filter(|p| p.exists()),
        };

        let mut config = match candidate {
            Some(p) => {
                info!(path = %p.display(), "loading bridge config");
                let raw = std::fs::read_to_string(&p).map_err(|e| {
                    AuthError::Config(format!("failed to read {}: {}", p.display(), e))
                })?;
                Self::from_toml_str(&raw)?
            }
            None => {
                debug!("no config file found, using defaults");
                Self::default()
            }
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> AuthResult<Self> {
        toml::from_str(raw).map_err(|e| AuthError::Config(e.to_string()))
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> AuthResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_SERVER_URL) {
            self.server_url = url;
        }
        if let Some(kind) = lookup(ENV_TRANSPORT) {
            self.transport = kind.parse().map_err(AuthError::Config)?;
        }
        if let Some(locale) = lookup(ENV_LOCALE) {
            self.locale = locale;
        }
        if let Some(browser) = lookup(ENV_BROWSER) {
            self.browser = Some(browser);
        }
        Ok(())
    }

    pub fn validate(&self) -> AuthResult<()> {
        if self.live_log_budget == 0 {
            return Err(AuthError::Config("live_log_budget must be positive".to_string()));
        }
        if self.line_log_cap == 0 {
            return Err(AuthError::Config("line_log_cap must be positive".to_string()));
        }
        if self.meta_prefix.is_empty() {
            return Err(AuthError::Config("meta_prefix must not be empty".to_string()));
        }
        let parsed = url::Url::parse(&self.server_url)
            .map_err(|e| AuthError::Config(format!("invalid server_url '{}': {}", self.server_url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(AuthError::Config(format!(
                "server_url must be http or https, got '{}'",
                parsed.scheme()
            )));
        }
        Ok(())
    }

    /// Success markers for the configured locale; every known marker when
    /// the locale has no entry.
    pub fn markers(&self) -> Vec<String> {
        match self.success_markers.get(&self.locale) {
            Some(markers) => markers.clone(),
            None => {
                let mut all: Vec<String> = self.success_markers.values().flatten().cloned().collect();
                all.sort();
                all.dedup();
                all
            }
        }
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.success_settle_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn base_url(&self) -> &str {
        self.server_url.trim_end_matches('/')
    }

    /// WebSocket endpoint of the PTY bridge, optionally bound to a session
    pub fn pty_socket_url(&self, session_id: Option<&str>) -> AuthResult<String> {
        let mut url = url::Url::parse(&format!("{}/api/auth/claude/pty", self.base_url()))
            .map_err(|e| AuthError::Config(e.to_string()))?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| AuthError::Config(format!("cannot derive websocket url from {}", self.server_url)))?;
        if let Some(id) = session_id {
            url.query_pairs_mut().append_pair("session_id", id);
        }
        Ok(url.to_string())
    }
}
