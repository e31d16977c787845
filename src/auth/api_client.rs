use super::error::{AuthError, AuthResult};
use super::types::*;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

/// Backend endpoints the login flow depends on
#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn start_session(&self) -> AuthResult<StartSessionResponse>;
    async fn cancel_session(&self, session_id: &str) -> AuthResult<()>;
    async fn send_input(&self, session_id: &str, value: &str) -> AuthResult<()>;
    async fn get_session_log(&self, session_id: &str) -> AuthResult<Vec<ServerLogEntry>>;
    async fn logout(&self) -> AuthResult<()>;
    /// Refreshes application-wide auth/config state after a login
    async fn reload_system(&self) -> AuthResult<()>;
}

pub struct HttpAuthApi {
    client: Client,
    base_url: String,
}

impl HttpAuthApi {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> AuthResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn request<T: DeserializeOwned>(&self, request: RequestBuilder) -> AuthResult<Option<T>> {
        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ApiResponse<serde_json::Value>>(&body)
                .ok()
                .and_then(|r| r.error)
                .unwrap_or(body);
            return Err(AuthError::Api(format!("request failed with status {}: {}", status, detail)));
        }

        let envelope = response
            .json::<ApiResponse<T>>()
            .await
            .map_err(|e| AuthError::Api(format!("failed to parse response: {}", e)))?;

        if !envelope.success {
            return Err(AuthError::Api(
                envelope.error.unwrap_or_else(|| "request was not successful".to_string()),
            ));
        }
        Ok(envelope.data)
    }
}

#[async_trait]
impl AuthApi for HttpAuthApi {
    async fn start_session(&self) -> AuthResult<StartSessionResponse> {
        let url = self.url("/api/auth/claude/sessions");
        debug!(%url, "starting claude login session");
        self.request::<StartSessionResponse>(self.client.post(&url))
            .await
            .map_err(|e| AuthError::SessionStart(e.to_string()))?
            .ok_or_else(|| AuthError::SessionStart("response did not include a session".to_string()))
    }

    async fn cancel_session(&self, session_id: &str) -> AuthResult<()> {
        let url = self.url(&format!("/api/auth/claude/sessions/{}/cancel", session_id));
        self.request::<serde_json::Value>(self.client.post(&url))
            .await
            .map_err(|e| AuthError::Cancel(e.to_string()))?;
        Ok(())
    }

    async fn send_input(&self, session_id: &str, value: &str) -> AuthResult<()> {
        let url = self.url(&format!("/api/auth/claude/sessions/{}/input", session_id));
        let body = json!({ "input": value });
        self.request::<serde_json::Value>(self.client.post(&url).json(&body))
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;
        Ok(())
    }

    async fn get_session_log(&self, session_id: &str) -> AuthResult<Vec<ServerLogEntry>> {
        let url = self.url(&format!("/api/auth/claude/pty/{}/logs", session_id));
        let entries = self.request::<Vec<ServerLogEntry>>(self.client.get(&url)).await?;
        Ok(entries.unwrap_or_default())
    }

    async fn logout(&self) -> AuthResult<()> {
        let url = self.url("/api/auth/claude/logout");
        self.request::<serde_json::Value>(self.client.post(&url)).await?;
        Ok(())
    }

    async fn reload_system(&self) -> AuthResult<()> {
        let url = self.url("/api/info");
        self.request::<serde_json::Value>(self.client.get(&url)).await?;
        Ok(())
    }
}
