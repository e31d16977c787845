use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of one login attempt
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Starting,
    Streaming,
    Success,
    Error,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Success | SessionStatus::Error)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Starting => "starting",
            SessionStatus::Streaming => "streaming",
            SessionStatus::Success => "success",
            SessionStatus::Error => "error",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogDirection {
    Output,
    Input,
    Meta,
}

/// Transcript entry recorded by the backend for a PTY session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerLogEntry {
    pub timestamp: f64,
    pub direction: LogDirection,
    #[serde(default)]
    pub data: String,
}

impl ServerLogEntry {
    pub fn recorded_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        let secs = self.timestamp.trunc() as i64;
        let nanos = (self.timestamp.fract() * 1_000_000_000.0) as u32;
        chrono::DateTime::from_timestamp(secs, nanos)
    }
}

/// One line of the client-side log
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogLine {
    pub direction: LogDirection,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MenuOption {
    pub value: String,
    pub label: String,
}

impl MenuOption {
    pub fn new(value: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: label.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionResponse {
    pub session_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(default, alias = "message")]
    pub error: Option<String>,
}

/// How the dialog was dismissed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DialogOutcome {
    Success,
    Cancelled,
    Failed(String),
}

/// Everything the presentation layer renders
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DialogState {
    pub status: SessionStatus,
    pub session_id: Option<String>,
    pub live_log: String,
    pub lines: Vec<LogLine>,
    pub server_logs: Vec<ServerLogEntry>,
    pub menu_options: Vec<MenuOption>,
    pub login_url: Option<String>,
    pub error: Option<String>,
    pub notice: Option<String>,
}

/// Incremental updates pushed to subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum DialogEvent {
    StatusChanged(SessionStatus),
    SessionBound(String),
    Output(String),
    MenuOptions(Vec<MenuOption>),
    LoginUrl(String),
    HistoryLoaded(usize),
    Notice(String),
    Reconnecting { delay_ms: u64 },
}
