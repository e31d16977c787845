use super::types::SessionStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    /// The backend refused or failed to create a login session.
    #[error("failed to start login session: {0}")]
    SessionStart(String),

    /// Connectivity lost, or a write was attempted without an open channel.
    #[error("transport error: {0}")]
    Transport(String),

    /// A push-channel payload could not be understood.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("failed to cancel session: {0}")]
    Cancel(String),

    #[error("request failed: {0}")]
    Api(String),

    #[error("cannot {action} while session is {status}")]
    InvalidState {
        action: &'static str,
        status: SessionStatus,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to open browser: {0}")]
    Browser(String),
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        AuthError::Api(err.to_string())
    }
}

pub type AuthResult<T> = Result<T, AuthError>;
